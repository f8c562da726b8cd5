use crate::{
    error::{OverlayError, Result},
    gemini::{OutputModality, UpstreamReply, UpstreamRequest},
    models::{ImageSize, InlineImage, SynthesisResult},
    stages::Stage,
};

const TEMPERATURE: f32 = 0.2;
const MAX_NEGATIVES: usize = 10;
const DEFAULT_STYLE: &str = "Match the original image style.";
const DEFAULT_NEGATIVES: &str =
    "- No background\n- No original image content\n- No watermark\n- No extra decoration";
const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Debug, Clone)]
pub struct SynthesisInput {
    pub overlay_brief: String,
    pub style_notes: Option<String>,
    pub negative_constraints: Vec<String>,
    /// Displayed width/height of the resolved placement.
    pub target_width: f64,
    pub target_height: f64,
}

/// Asks an image model for the overlay object alone on a transparent canvas.
#[derive(Debug, Clone)]
pub struct SynthesisStage {
    model: String,
}

impl SynthesisStage {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn instruction(input: &SynthesisInput) -> String {
        let negatives = input
            .negative_constraints
            .iter()
            .filter(|item| !item.is_empty())
            .take(MAX_NEGATIVES)
            .map(|item| format!("- {}", item))
            .collect::<Vec<_>>()
            .join("\n");
        let negatives = if negatives.is_empty() {
            DEFAULT_NEGATIVES.to_string()
        } else {
            negatives
        };

        let style = input
            .style_notes
            .as_deref()
            .filter(|notes| !notes.is_empty())
            .unwrap_or(DEFAULT_STYLE);

        format!(
            r#"Generate a single object as a transparent PNG overlay.

OBJECT BRIEF:
{brief}

STYLE MATCH NOTES:
{style}

NEGATIVE CONSTRAINTS:
{negatives}

HARD REQUIREMENTS:
1) Output must be a PNG with TRUE transparent background (alpha). Do NOT use any solid background, no paper texture, no checkerboard/transparency grid, no dithering pattern, no matte.
2) Only the object itself. Do not include any part of the original image.
3) Tight crop: the PNG should be closely cropped around the object (minimal empty padding).
4) Clean edges, no halo. No drop shadow unless explicitly required by style.
5) The object must be complete, not cut off.
6) Approximate output size suggestion: {w}x{h} px.

Return only the image. If you cannot produce a transparent PNG, do not return an image."#,
            brief = input.overlay_brief,
            style = style,
            negatives = negatives,
            w = input.target_width.round(),
            h = input.target_height.round(),
        )
    }
}

impl Stage for SynthesisStage {
    type Input = SynthesisInput;
    type Output = SynthesisResult;

    fn name(&self) -> &'static str {
        "synthesis"
    }

    fn build(&self, input: &SynthesisInput) -> UpstreamRequest {
        UpstreamRequest {
            model: self.model.clone(),
            image: None,
            instruction: Self::instruction(input),
            modality: OutputModality::Image,
            temperature: TEMPERATURE,
        }
    }

    fn parse(&self, reply: UpstreamReply) -> Result<SynthesisResult> {
        let image = reply
            .first_image()
            .cloned()
            .ok_or(OverlayError::NoImageReturned)?;
        let size = png_size(&image);
        Ok(SynthesisResult { image, size })
    }
}

/// Width and height from the IHDR chunk of a PNG payload. Reporting only.
pub fn png_size(image: &InlineImage) -> Option<ImageSize> {
    if !image.is_png() {
        return None;
    }
    let bytes = image.decode()?;
    if bytes.len() < 24 || bytes[..8] != PNG_SIGNATURE {
        return None;
    }
    let w = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let h = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    (w > 0 && h > 0).then(|| ImageSize::new(w, h))
}
