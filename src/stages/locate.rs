use crate::{
    error::{OverlayError, Result},
    gemini::{OutputModality, UpstreamReply, UpstreamRequest},
    models::{Anchor, ImageSize, InlineImage, LocateSpecResult},
    stages::{extract_json, Stage},
};

const TEMPERATURE: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct LocateInput {
    pub image: InlineImage,
    pub instruction: String,
    pub image_size: ImageSize,
    pub anchor: Option<Anchor>,
}

/// Asks a vision model where the new object goes and what it should look like.
#[derive(Debug, Clone)]
pub struct LocateStage {
    model: String,
}

impl LocateStage {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn instruction(input: &LocateInput) -> String {
        let anchor_hint = match input.anchor.filter(Anchor::is_finite) {
            Some(anchor) => format!(
                "The user marked an anchor point (pixels, origin at the top-left corner of the base image): anchor=({}, {}). Place the new object near this anchor unless the instruction clearly asks for a different position.",
                anchor.x.round(),
                anchor.y.round()
            ),
            None => String::new(),
        };

        format!(
            r#"You are a precise image-editing placement assistant. Respond with JSON only: no Markdown, no explanations, no extra fields.

Task: from the uploaded base image and the user's instruction, write the specification of a transparent PNG overlay layer and decide where it is placed.

User instruction: {instruction}
Base image size: {w}x{h} px
{anchor_hint}

Output JSON shape (follow it exactly):
{{
  "overlay_brief": "Detailed English description of the object to generate (material, color, style, edges, perspective). It must ask for a transparent PNG with no background, tightly cropped around the object.",
  "placement": {{"x":0,"y":0,"width":0,"height":0,"rotation":0}},
  "negative_constraints": ["no background","no content from the base image","do not change the base image size or composition","no extra decoration","no text or watermark"],
  "style_notes": "English notes on matching the base image style (cartoon or photographic, line weight, lighting and shadows)",
  "confidence": 0.0,
  "why": "One sentence on why this placement fits",
  "assumptions": "Anything you had to assume"
}}

Rules:
- placement uses the base image's pixel grid with (0,0) at the top-left corner.
- x/y is the top-left corner of the overlay when it is put back onto the base image.
- width/height is the displayed size of the overlay on the base image.
- x must satisfy 0 <= x <= (W - width) and y must satisfy 0 <= y <= (H - height).
- rotation is in degrees, positive is clockwise. Default rotation is 0.
- For symmetric objects (sunglasses, glasses, crowns, hats) keep rotation between -8 and 8 unless the head is clearly tilted.
- If you are unsure about the position, set a low confidence (0.2-0.4) and give a conservative, visible placement.
- Do not let the new object cover key features of the subject (eyes, face) unless the user asks for it.
- Output JSON only."#,
            instruction = input.instruction,
            w = input.image_size.w,
            h = input.image_size.h,
            anchor_hint = anchor_hint,
        )
    }
}

impl Stage for LocateStage {
    type Input = LocateInput;
    type Output = LocateSpecResult;

    fn name(&self) -> &'static str {
        "locate"
    }

    fn build(&self, input: &LocateInput) -> UpstreamRequest {
        UpstreamRequest {
            model: self.model.clone(),
            image: Some(input.image.clone()),
            instruction: Self::instruction(input),
            modality: OutputModality::Json,
            temperature: TEMPERATURE,
        }
    }

    fn parse(&self, reply: UpstreamReply) -> Result<LocateSpecResult> {
        let text = reply.first_text().unwrap_or_default();
        log::debug!("Locate reply: {}", text);

        let value = extract_json(text)
            .ok_or_else(|| OverlayError::parse("model did not return parseable JSON"))?;
        LocateSpecResult::from_value(&value)
    }
}
