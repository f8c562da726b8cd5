use crate::{
    error::{OverlayError, Result},
    models::{clamp, coerce_number, RawPlacement},
};
use serde::Serialize;
use serde_json::{Map, Value};

const BRIEF_KEYS: [&str; 3] = ["overlay_brief", "overlay_prompt", "overlayPrompt"];
const NEGATIVE_KEYS: [&str; 2] = ["negative_constraints", "negativeConstraints"];
const STYLE_KEYS: [&str; 2] = ["style_notes", "styleNotes"];
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Structured answer of the locate stage, normalized from whatever JSON the
/// model produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocateSpecResult {
    pub overlay_brief: String,
    #[serde(skip)]
    pub placement: RawPlacement,
    pub negative_constraints: Vec<String>,
    pub style_notes: Option<String>,
    pub confidence: f64,
    pub why: String,
    pub assumptions: String,
}

impl LocateSpecResult {
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| OverlayError::parse("model JSON is not an object"))?;

        let overlay_brief = BRIEF_KEYS
            .iter()
            .filter_map(|key| obj.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|brief| !brief.is_empty())
            .ok_or(OverlayError::NoOverlayBrief)?
            .to_string();

        let negative_constraints = match first_present(obj, &NEGATIVE_KEYS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|item| !item.trim().is_empty())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        };

        let style_notes = first_present(obj, &STYLE_KEYS)
            .and_then(Value::as_str)
            .filter(|notes| !notes.trim().is_empty())
            .map(String::from);

        let confidence = clamp(
            coerce_number(obj.get("confidence"), DEFAULT_CONFIDENCE),
            0.0,
            1.0,
        );

        Ok(Self {
            overlay_brief,
            placement: RawPlacement::from_value(obj.get("placement")),
            negative_constraints,
            style_notes,
            confidence,
            why: text_field(obj, "why"),
            assumptions: text_field(obj, "assumptions"),
        })
    }
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_brief_synonyms_in_order() {
        let spec = LocateSpecResult::from_value(&json!({
            "overlay_brief": "   ",
            "overlayPrompt": "a red santa hat, transparent PNG"
        }))
        .unwrap();
        assert_eq!(spec.overlay_brief, "a red santa hat, transparent PNG");
    }

    #[test]
    fn missing_brief_is_an_error() {
        let err = LocateSpecResult::from_value(&json!({"placement": {"x": 1}})).unwrap_err();
        assert!(matches!(err, OverlayError::NoOverlayBrief));
        let err = LocateSpecResult::from_value(&json!({"overlay_brief": 42})).unwrap_err();
        assert!(matches!(err, OverlayError::NoOverlayBrief));
    }

    #[test]
    fn confidence_is_coerced_and_clamped() {
        let cases = [
            (json!(1.7), 1.0),
            (json!(-0.2), 0.0),
            (json!("0.3"), 0.3),
            (json!("high"), 0.5),
            (json!(null), 0.5),
        ];
        for (raw, expected) in cases {
            let spec = LocateSpecResult::from_value(&json!({
                "overlay_brief": "hat",
                "confidence": raw
            }))
            .unwrap();
            assert_eq!(spec.confidence, expected);
        }
        let spec = LocateSpecResult::from_value(&json!({"overlay_brief": "hat"})).unwrap();
        assert_eq!(spec.confidence, 0.5);
    }

    #[test]
    fn optional_fields_read_from_either_spelling() {
        let spec = LocateSpecResult::from_value(&json!({
            "overlay_prompt": "glasses",
            "negativeConstraints": ["no background", "", 3, "no text"],
            "styleNotes": "flat cartoon, thick outlines",
            "why": "eyes are at the top third",
            "assumptions": ["not a string"]
        }))
        .unwrap();
        assert_eq!(spec.negative_constraints, vec!["no background", "no text"]);
        assert_eq!(spec.style_notes.as_deref(), Some("flat cartoon, thick outlines"));
        assert_eq!(spec.why, "eyes are at the top third");
        assert_eq!(spec.assumptions, "");
    }

    #[test]
    fn non_object_is_a_parse_error() {
        let err = LocateSpecResult::from_value(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, OverlayError::ParseError(_)));
    }
}
