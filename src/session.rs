use crate::{
    composite,
    error::{OverlayError, Result},
    geometry,
    models::{ImageSize, InlineImage, OverlayPayload, Placement, PlacementPatch},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PLACEMENT: Placement = Placement {
    x: 100.0,
    y: 100.0,
    width: 200.0,
    height: 200.0,
    rotation: 0.0,
};

/// Downloadable record of where an overlay was put.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementManifest {
    pub prompt: String,
    pub base_image_size: ImageSize,
    pub overlay_size: Option<ImageSize>,
    pub placement: Placement,
    pub warnings: Vec<String>,
}

/// Editing state for one base image: the overlay asset and where it sits.
/// Placements are edited freely; bounds are only enforced on generation.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySession {
    base_size: ImageSize,
    placement: Placement,
    generated: Option<Placement>,
    overlay: Option<String>,
    overlay_size: Option<ImageSize>,
    warnings: Vec<String>,
}

impl OverlaySession {
    pub fn new(base_size: ImageSize) -> Self {
        Self {
            base_size,
            placement: DEFAULT_PLACEMENT,
            generated: None,
            overlay: None,
            overlay_size: None,
            warnings: Vec::new(),
        }
    }

    pub fn base_size(&self) -> ImageSize {
        self.base_size
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn generated_placement(&self) -> Option<Placement> {
        self.generated
    }

    /// Overlay as a data URL, once one was generated.
    pub fn overlay(&self) -> Option<&str> {
        self.overlay.as_deref()
    }

    pub fn overlay_size(&self) -> Option<ImageSize> {
        self.overlay_size
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn apply_generation(&mut self, result: &OverlayPayload) {
        self.overlay = Some(result.overlay_png_base64.clone());
        self.overlay_size = result.overlay_size;
        self.warnings = result.warnings.clone();
        self.placement = result.placement;
        self.generated = Some(result.placement);
    }

    pub fn update(&mut self, patch: &PlacementPatch) {
        self.placement = geometry::patch(self.placement, patch);
    }

    pub fn set_placement(&mut self, placement: Placement) {
        self.placement = placement;
    }

    pub fn reset_rotation(&mut self) {
        self.placement = geometry::reset_rotation(self.placement);
    }

    pub fn reset_all(&mut self) {
        self.placement = geometry::reset_all(DEFAULT_PLACEMENT);
    }

    pub fn center(&mut self) {
        self.placement = geometry::center(self.placement, self.base_size);
    }

    /// Back to the generated placement, or the default when nothing was generated.
    pub fn restore_generated(&mut self) {
        match self.generated {
            Some(generated) => self.placement = generated,
            None => self.reset_all(),
        }
    }

    /// Drops the overlay and every edit.
    pub fn clear(&mut self) {
        *self = Self::new(self.base_size);
    }

    pub fn is_valid(&self) -> bool {
        geometry::is_renderable(&self.placement)
    }

    pub fn manifest(&self, prompt: &str) -> PlacementManifest {
        PlacementManifest {
            prompt: prompt.to_string(),
            base_image_size: self.base_size,
            overlay_size: self.overlay_size,
            placement: self.placement,
            warnings: self.warnings.clone(),
        }
    }

    /// Flattens the current overlay onto `base` (encoded image bytes) as PNG.
    pub fn export_png(&self, base: &[u8]) -> Result<Vec<u8>> {
        let overlay = self
            .overlay
            .as_deref()
            .map(InlineImage::from_data_url_or_base64)
            .ok_or_else(|| OverlayError::invalid_input("No overlay has been generated yet"))?;
        if !self.is_valid() {
            return Err(OverlayError::invalid_input("Overlay placement is not drawable"));
        }
        let overlay_bytes = overlay
            .decode()
            .ok_or_else(|| OverlayError::ImageError("overlay is not valid base64".into()))?;
        composite::export_png(base, &overlay_bytes, &self.placement)
    }
}
