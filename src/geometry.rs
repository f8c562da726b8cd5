//! Placement math: turning the model's loose guess into a rectangle that fits
//! the base image, and the free-form edits a user makes afterwards.

use crate::models::{clamp, coerce_number, ImageSize, Placement, PlacementPatch, RawPlacement};

pub const MIN_SIDE: f64 = 8.0;
const MIN_DEFAULT_WIDTH: f64 = 64.0;
const DEFAULT_WIDTH_RATIO: f64 = 0.35;
const DEFAULT_ASPECT: f64 = 0.6;

/// Clamps a raw placement into `size`. Total: every missing or non-numeric
/// field falls back to its default before clamping.
pub fn resolve(raw: &RawPlacement, size: ImageSize) -> Placement {
    let w = size.w as f64;
    let h = size.h as f64;

    let default_width = MIN_DEFAULT_WIDTH.max((w.min(h) * DEFAULT_WIDTH_RATIO).round());
    let width = clamp(coerce_number(raw.width.as_ref(), default_width), MIN_SIDE, w);
    let height = clamp(
        coerce_number(raw.height.as_ref(), (width * DEFAULT_ASPECT).round()),
        MIN_SIDE,
        h,
    );

    let x = clamp(coerce_number(raw.x.as_ref(), 0.0), 0.0, (w - width).max(0.0));
    let y = clamp(coerce_number(raw.y.as_ref(), 0.0), 0.0, (h - height).max(0.0));

    let rotation = normalize_rotation(coerce_number(raw.rotation.as_ref(), 0.0));

    Placement {
        x,
        y,
        width,
        height,
        rotation,
    }
}

/// Maps degrees into (-180, 180].
pub fn normalize_rotation(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Shallow merge; bounds are deliberately not re-checked.
pub fn patch(current: Placement, updates: &PlacementPatch) -> Placement {
    Placement {
        x: updates.x.unwrap_or(current.x),
        y: updates.y.unwrap_or(current.y),
        width: updates.width.unwrap_or(current.width),
        height: updates.height.unwrap_or(current.height),
        rotation: updates.rotation.unwrap_or(current.rotation),
    }
}

pub fn center(current: Placement, size: ImageSize) -> Placement {
    if size.w == 0 || size.h == 0 {
        return current;
    }
    Placement {
        x: (size.w as f64 - current.width) / 2.0,
        y: (size.h as f64 - current.height) / 2.0,
        ..current
    }
}

pub fn reset_rotation(current: Placement) -> Placement {
    Placement {
        rotation: 0.0,
        ..current
    }
}

pub fn reset_all(defaults: Placement) -> Placement {
    defaults
}

/// Whether the placement can be drawn at all.
pub fn is_renderable(placement: &Placement) -> bool {
    placement.x.is_finite()
        && placement.y.is_finite()
        && placement.width > 0.0
        && placement.height > 0.0
}
