use crate::{
    models::{ImageSize, InlineImage},
    transparency::BackgroundKind,
};

/// What the synthesis stage hands back: the raw image exactly as the model
/// produced it, plus the size read from the PNG header when available.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub image: InlineImage,
    pub size: Option<ImageSize>,
}

/// Overlay bitmap after background cleanup.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedOverlay {
    pub image: InlineImage,
    pub size: Option<ImageSize>,
    pub background: Option<BackgroundKind>,
}

impl CleanedOverlay {
    pub fn cleaned(&self) -> bool {
        self.background.is_some()
    }
}
