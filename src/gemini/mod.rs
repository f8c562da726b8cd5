pub mod client;
#[cfg(test)]
pub(crate) mod stub;

use crate::{error::Result, models::InlineImage};
use async_trait::async_trait;

pub use client::GeminiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputModality {
    Json,
    Image,
}

/// One generative call, independent of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub model: String,
    pub image: Option<InlineImage>,
    pub instruction: String,
    pub modality: OutputModality,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPart {
    Text(String),
    Image(InlineImage),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamReply {
    pub parts: Vec<ReplyPart>,
}

impl UpstreamReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ReplyPart::Text(text.into())],
        }
    }

    pub fn image(image: InlineImage) -> Self {
        Self {
            parts: vec![ReplyPart::Image(image)],
        }
    }

    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            ReplyPart::Text(text) => Some(text.as_str()),
            ReplyPart::Image(_) => None,
        })
    }

    /// First inline image that actually carries data.
    pub fn first_image(&self) -> Option<&InlineImage> {
        self.parts.iter().find_map(|part| match part {
            ReplyPart::Image(image) if !image.data.is_empty() => Some(image),
            _ => None,
        })
    }
}

/// The remote model boundary. Errors reported by the model service must come
/// back as `OverlayError::UpstreamError` so the orchestrator can classify them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: UpstreamRequest) -> Result<UpstreamReply>;

    fn has_credential(&self) -> bool {
        true
    }
}
