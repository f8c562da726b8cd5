use crate::{
    error::{OverlayError, Result},
    gemini::{Transport, UpstreamReply, UpstreamRequest},
    models::InlineImage,
};
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;

/// Replays scripted replies in order and records every request it sees.
pub(crate) struct StubTransport {
    replies: Mutex<VecDeque<Result<UpstreamReply>>>,
    requests: Mutex<Vec<UpstreamRequest>>,
    credential: bool,
}

impl StubTransport {
    pub fn new(replies: Vec<Result<UpstreamReply>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            credential: true,
        }
    }

    pub fn without_credential() -> Self {
        Self {
            credential: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn call(&self, request: UpstreamRequest) -> Result<UpstreamReply> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OverlayError::RequestError("no scripted reply".into())))
    }

    fn has_credential(&self) -> bool {
        self.credential
    }
}

pub(crate) fn png_bytes(img: &RgbaImage) -> Vec<u8> {
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

/// Opaque red square on white, the typical "forgot the alpha" model output.
pub(crate) fn opaque_overlay(size: u32) -> InlineImage {
    let mut img = RgbaImage::from_pixel(size, size, Rgba([255, 255, 255, 255]));
    let quarter = size / 4;
    for y in quarter..size - quarter {
        for x in quarter..size - quarter {
            img.put_pixel(x, y, Rgba([200, 30, 30, 255]));
        }
    }
    InlineImage::from_bytes("image/png", &png_bytes(&img))
}

/// Fully transparent image: cleanup leaves it alone.
pub(crate) fn transparent_overlay(w: u32, h: u32) -> InlineImage {
    let img = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0]));
    InlineImage::from_bytes("image/png", &png_bytes(&img))
}

pub(crate) fn locate_json(brief: &str, confidence: f64) -> String {
    serde_json::json!({
        "overlay_brief": brief,
        "placement": {"x": 40, "y": 30, "width": 120, "height": 60, "rotation": 0},
        "negative_constraints": ["no background"],
        "style_notes": "flat colors",
        "confidence": confidence,
        "why": "subject is centered",
        "assumptions": "front-facing"
    })
    .to_string()
}
