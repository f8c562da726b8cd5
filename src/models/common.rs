use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub w: u32,
    pub h: u32,
}

impl ImageSize {
    pub const DEFAULT: ImageSize = ImageSize { w: 512, h: 512 };

    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
}

impl Anchor {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// An image travelling to or from a model: declared MIME type plus base64 data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, BASE64.encode(bytes))
    }

    /// Accepts `data:<mime>;base64,<payload>` or bare base64 (assumed PNG).
    pub fn from_data_url_or_base64(input: &str) -> Self {
        match split_data_url(input) {
            Some((mime, data)) => Self::new(mime, data),
            None => Self::new("image/png", input),
        }
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode(&self) -> Option<Vec<u8>> {
        BASE64.decode(self.data.trim()).ok()
    }

    pub fn is_png(&self) -> bool {
        self.mime_type.contains("png")
    }
}

fn split_data_url(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    if mime.is_empty() || mime.contains(';') || data.is_empty() {
        return None;
    }
    Some((mime, data))
}

/// Reads a loosely-typed JSON value as a finite number, or returns `fallback`.
pub fn coerce_number(value: Option<&Value>, fallback: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    parsed.filter(|n| n.is_finite()).unwrap_or(fallback)
}

/// `min(hi, max(lo, n))`; unlike `f64::clamp` this never panics when lo > hi.
pub fn clamp(n: f64, lo: f64, hi: f64) -> f64 {
    n.max(lo).min(hi)
}
