use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an overlay sits on the base image, in base-image pixels.
/// `rotation` is in degrees, clockwise positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
}

impl Placement {
    pub fn new(x: f64, y: f64, width: f64, height: f64, rotation: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            rotation,
        }
    }
}

/// The model's placement guess before it is trusted. Any field may be missing,
/// a numeric string, or garbage.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPlacement {
    #[serde(default)]
    pub x: Option<Value>,
    #[serde(default)]
    pub y: Option<Value>,
    #[serde(default)]
    pub width: Option<Value>,
    #[serde(default)]
    pub height: Option<Value>,
    #[serde(default)]
    pub rotation: Option<Value>,
}

impl RawPlacement {
    /// Non-object values read as an empty guess.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Object(map)) => RawPlacement {
                x: map.get("x").cloned(),
                y: map.get("y").cloned(),
                width: map.get("width").cloned(),
                height: map.get("height").cloned(),
                rotation: map.get("rotation").cloned(),
            },
            _ => RawPlacement::default(),
        }
    }
}

/// Partial update for free-form editing after generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
}

impl PlacementPatch {
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Default::default()
        }
    }

    pub fn size(width: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    pub fn rotation(rotation: f64) -> Self {
        Self {
            rotation: Some(rotation),
            ..Default::default()
        }
    }
}
