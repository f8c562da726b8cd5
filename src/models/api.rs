use crate::models::{coerce_number, Anchor, ImageSize, Placement};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Body of both generate endpoints. Sizes and anchors are read leniently.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub image_size: Option<Value>,
    #[serde(default)]
    pub anchor: Option<Value>,
}

impl GenerateRequest {
    pub fn new(image: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            prompt: Some(prompt.into()),
            image_size: None,
            anchor: None,
        }
    }

    pub fn with_image_size(mut self, size: ImageSize) -> Self {
        self.image_size = Some(json!({ "w": size.w, "h": size.h }));
        self
    }

    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = Some(json!({ "x": anchor.x, "y": anchor.y }));
        self
    }

    /// The declared base image size, or 512x512 when absent or non-positive.
    pub fn resolved_image_size(&self) -> ImageSize {
        let Some(size) = self.image_size.as_ref() else {
            return ImageSize::DEFAULT;
        };
        let w = coerce_number(size.get("w"), 0.0).round();
        let h = coerce_number(size.get("h"), 0.0).round();
        if w >= 1.0 && h >= 1.0 && w <= u32::MAX as f64 && h <= u32::MAX as f64 {
            ImageSize::new(w as u32, h as u32)
        } else {
            ImageSize::DEFAULT
        }
    }

    pub fn resolved_anchor(&self) -> Option<Anchor> {
        let anchor = self.anchor.as_ref()?;
        let parsed = Anchor {
            x: coerce_number(anchor.get("x"), f64::NAN),
            y: coerce_number(anchor.get("y"), f64::NAN),
        };
        parsed.is_finite().then_some(parsed)
    }
}

/// Fields shared by the buffered response and the streamed result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayPayload {
    pub overlay_png_base64: String,
    pub overlay_size: Option<ImageSize>,
    pub placement: Placement,
    pub confidence: f64,
    pub warnings: Vec<String>,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayResponse {
    #[serde(flatten)]
    pub payload: OverlayPayload,
    pub why: String,
    pub assumptions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub logs: Vec<String>,
}

/// One line of the NDJSON progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamRecord {
    Log { message: String },
    Result { data: OverlayPayload },
    Error { error: String, logs: Vec<String> },
}

impl StreamRecord {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamRecord::Log { .. })
    }

    pub fn to_ndjson_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            json!({ "type": "error", "error": e.to_string(), "logs": [] }).to_string()
        });
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_size_defaults_when_absent_or_non_positive() {
        let req = GenerateRequest::new("AAAA", "add a hat");
        assert_eq!(req.resolved_image_size(), ImageSize::new(512, 512));

        let req: GenerateRequest =
            serde_json::from_value(json!({"image": "AAAA", "prompt": "p", "imageSize": {"w": 0, "h": 300}}))
                .unwrap();
        assert_eq!(req.resolved_image_size(), ImageSize::DEFAULT);

        let req: GenerateRequest =
            serde_json::from_value(json!({"imageSize": {"w": "640", "h": 480}})).unwrap();
        assert_eq!(req.resolved_image_size(), ImageSize::new(640, 480));
    }

    #[test]
    fn anchor_requires_finite_coordinates() {
        let req: GenerateRequest =
            serde_json::from_value(json!({"anchor": {"x": 10.4, "y": 20}})).unwrap();
        assert_eq!(req.resolved_anchor(), Some(Anchor { x: 10.4, y: 20.0 }));

        let req: GenerateRequest =
            serde_json::from_value(json!({"anchor": {"x": "left", "y": 20}})).unwrap();
        assert_eq!(req.resolved_anchor(), None);
    }

    #[test]
    fn stream_records_are_tagged_lines() {
        let line = StreamRecord::Log {
            message: "[10:00:00] started".into(),
        }
        .to_ndjson_line();
        assert_eq!(line, "{\"type\":\"log\",\"message\":\"[10:00:00] started\"}\n");

        let err = StreamRecord::Error {
            error: "boom".into(),
            logs: vec![],
        };
        assert!(err.is_terminal());
        let parsed: StreamRecord = serde_json::from_str(err.to_ndjson_line().trim()).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn buffered_response_flattens_payload() {
        let response = OverlayResponse {
            payload: OverlayPayload {
                overlay_png_base64: "data:image/png;base64,AAAA".into(),
                overlay_size: None,
                placement: Placement::new(1.0, 2.0, 30.0, 40.0, 0.0),
                confidence: 0.8,
                warnings: vec![],
                logs: vec!["a".into()],
            },
            why: "because".into(),
            assumptions: String::new(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["overlay_size"], Value::Null);
        assert_eq!(value["placement"]["width"], json!(30.0));
        assert_eq!(value["why"], json!("because"));
        assert_eq!(value["logs"], json!(["a"]));
    }
}
