//! Best-effort background removal for generated overlays.
//!
//! Image models asked for a transparent PNG often return an opaque picture on
//! white, or paint a fake transparency checkerboard. This module detects both
//! cases from the image border and knocks the background out. It never fails:
//! anything it cannot handle is returned unchanged.

pub mod palette;

use image::{ImageFormat, RgbaImage};
use std::borrow::Cow;
use std::io::Cursor;

pub use palette::{BackgroundPalette, Color, PaletteColor};

/// Heuristic constants. The defaults are empirical; keep them for parity and
/// tune here rather than in the algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct TransparencyParams {
    /// Alpha below this counts as already transparent.
    pub transparent_alpha: u8,
    /// Fraction of transparent pixels at which an image is left alone.
    pub already_transparent_fraction: f64,
    pub sample_divisor: u32,
    pub quantize_grid: f64,
    pub checker_primary_min: f64,
    pub checker_secondary_min: f64,
    pub checker_combined_min: f64,
    pub checker_min_distance: f64,
    pub checker_min_luminance: f64,
    pub neutral_max_spread: u8,
    pub solid_min_luminance: f64,
    pub checker_threshold: f64,
    pub solid_threshold: f64,
    pub feather: f64,
    pub very_white_min: u8,
    pub light_gray_min: u8,
    pub light_gray_max_delta: i16,
    /// Edits touching this fraction of pixels or less are discarded.
    pub min_changed_fraction: f64,
}

impl Default for TransparencyParams {
    fn default() -> Self {
        Self {
            transparent_alpha: 250,
            already_transparent_fraction: 0.01,
            sample_divisor: 40,
            quantize_grid: 16.0,
            checker_primary_min: 0.32,
            checker_secondary_min: 0.18,
            checker_combined_min: 0.72,
            checker_min_distance: 14.0,
            checker_min_luminance: 170.0,
            neutral_max_spread: 42,
            solid_min_luminance: 220.0,
            checker_threshold: 34.0,
            solid_threshold: 38.0,
            feather: 28.0,
            very_white_min: 245,
            light_gray_min: 210,
            light_gray_max_delta: 18,
            min_changed_fraction: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundKind {
    Checkerboard,
    Solid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cleanup<'a> {
    pub bytes: Cow<'a, [u8]>,
    pub applied: bool,
    pub background: Option<BackgroundKind>,
}

impl<'a> Cleanup<'a> {
    fn unchanged(bytes: &'a [u8]) -> Self {
        Self {
            bytes: Cow::Borrowed(bytes),
            applied: false,
            background: None,
        }
    }
}

pub fn ensure_transparent(bytes: &[u8]) -> Cleanup<'_> {
    ensure_transparent_with(bytes, &TransparencyParams::default())
}

/// Decodes `bytes`, removes a detected background and re-encodes as PNG.
/// Any decode or encode failure yields the input unchanged.
pub fn ensure_transparent_with<'a>(bytes: &'a [u8], params: &TransparencyParams) -> Cleanup<'a> {
    let img = match image::load_from_memory(bytes) {
        Ok(decoded) => decoded.to_rgba8(),
        Err(e) => {
            log::warn!("Overlay decode failed, skipping background cleanup: {}", e);
            return Cleanup::unchanged(bytes);
        }
    };

    let Some((cleaned, background)) = remove_background(&img, params) else {
        return Cleanup::unchanged(bytes);
    };

    let mut encoded = Vec::new();
    if let Err(e) = cleaned.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png) {
        log::warn!("Overlay re-encode failed, keeping original: {}", e);
        return Cleanup::unchanged(bytes);
    }

    Cleanup {
        bytes: Cow::Owned(encoded),
        applied: true,
        background: Some(background),
    }
}

/// Pixel-level core: `None` when the image is already transparent or no
/// background was confidently removed.
pub fn remove_background(
    img: &RgbaImage,
    params: &TransparencyParams,
) -> Option<(RgbaImage, BackgroundKind)> {
    let pixel_count = img.width() as usize * img.height() as usize;
    if pixel_count == 0 || has_alpha(img, params) {
        return None;
    }

    let palette = BackgroundPalette::estimate(
        img,
        2,
        params.sample_divisor,
        params.quantize_grid,
    );

    if is_likely_checkerboard(&palette, params) {
        let candidates = palette.candidates();
        if let Some(cleaned) = remove_by_palette(img, &candidates, params.checker_threshold, params)
        {
            log::debug!("Removed checkerboard background {:?}", candidates);
            return Some((cleaned, BackgroundKind::Checkerboard));
        }
    }

    let background = palette
        .colors
        .first()
        .map(|c| c.color)
        .unwrap_or(Color::WHITE);
    if background.luminance() <= params.solid_min_luminance {
        return None;
    }

    let cleaned = remove_by_palette(img, &[background], params.solid_threshold, params)?;
    log::debug!("Removed solid background {:?}", background);
    Some((cleaned, BackgroundKind::Solid))
}

fn has_alpha(img: &RgbaImage, params: &TransparencyParams) -> bool {
    let transparent = img
        .pixels()
        .filter(|p| p[3] < params.transparent_alpha)
        .count();
    let total = img.width() as f64 * img.height() as f64;
    transparent as f64 / total >= params.already_transparent_fraction
}

pub fn is_likely_checkerboard(palette: &BackgroundPalette, params: &TransparencyParams) -> bool {
    let (Some(c1), Some(c2)) = (palette.colors.first(), palette.colors.get(1)) else {
        return false;
    };
    if palette.sample_count == 0 {
        return false;
    }

    let f1 = palette.frequency(0);
    let f2 = palette.frequency(1);
    if f1 < params.checker_primary_min || f2 < params.checker_secondary_min {
        return false;
    }
    if f1 + f2 < params.checker_combined_min {
        return false;
    }
    if c1.color.distance(&c2.color) < params.checker_min_distance {
        return false;
    }

    let background_like = |c: &Color| {
        c.spread() < params.neutral_max_spread && c.luminance() > params.checker_min_luminance
    };
    background_like(&c1.color) && background_like(&c2.color)
}

fn is_light_gray(c: &Color, params: &TransparencyParams) -> bool {
    c.all_above(params.light_gray_min)
        && (c.r as i16 - c.g as i16).abs() < params.light_gray_max_delta
        && (c.g as i16 - c.b as i16).abs() < params.light_gray_max_delta
}

fn remove_by_palette(
    img: &RgbaImage,
    colors: &[Color],
    threshold: f64,
    params: &TransparencyParams,
) -> Option<RgbaImage> {
    let mut out = img.clone();
    let mut changed = 0usize;

    for pixel in out.pixels_mut() {
        let alpha = pixel[3];
        if alpha == 0 {
            continue;
        }

        let px = Color::new(pixel[0], pixel[1], pixel[2]);
        let min_dist = colors
            .iter()
            .map(|bg| px.distance(bg))
            .fold(f64::INFINITY, f64::min);

        if min_dist <= threshold || px.all_above(params.very_white_min) || is_light_gray(&px, params)
        {
            pixel[3] = 0;
            changed += 1;
            continue;
        }

        if min_dist <= threshold + params.feather {
            let t = ((min_dist - threshold) / params.feather).clamp(0.0, 1.0);
            let next = (alpha as f64 * t).round() as u8;
            if next != alpha {
                pixel[3] = next;
                changed += 1;
            }
        }
    }

    let pixel_count = out.width() as f64 * out.height() as f64;
    (changed as f64 / pixel_count > params.min_changed_fraction).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn encode(img: &RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn decode(bytes: &[u8]) -> RgbaImage {
        image::load_from_memory(bytes).unwrap().to_rgba8()
    }

    fn white_with_square(size: u32, square: u32, color: [u8; 4]) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(size, size, Rgba([255, 255, 255, 255]));
        let start = (size - square) / 2;
        for y in start..start + square {
            for x in start..start + square {
                img.put_pixel(x, y, Rgba(color));
            }
        }
        img
    }

    fn checkerboard(size: u32, cell: u32, a: [u8; 3], b: [u8; 3]) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            let c = if (x / cell + y / cell) % 2 == 0 { a } else { b };
            Rgba([c[0], c[1], c[2], 255])
        })
    }

    #[test]
    fn already_transparent_is_returned_byte_identical() {
        let mut img = white_with_square(40, 10, [200, 30, 30, 255]);
        // 40 of 1600 pixels = 2.5%
        for x in 0..40 {
            img.put_pixel(x, 0, Rgba([255, 255, 255, 0]));
        }
        let bytes = encode(&img);
        let out = ensure_transparent(&bytes);
        assert!(!out.applied);
        assert_eq!(out.background, None);
        assert_eq!(out.bytes.as_ref(), bytes.as_slice());
    }

    #[test]
    fn white_background_is_removed_around_square() {
        let bytes = encode(&white_with_square(64, 24, [200, 30, 30, 255]));
        let out = ensure_transparent(&bytes);
        assert!(out.applied);
        assert_eq!(out.background, Some(BackgroundKind::Solid));

        let cleaned = decode(&out.bytes);
        for (x, y) in [(0, 0), (63, 0), (0, 63), (63, 63)] {
            assert_eq!(cleaned.get_pixel(x, y)[3], 0, "corner ({}, {})", x, y);
        }
        assert_eq!(*cleaned.get_pixel(32, 32), Rgba([200, 30, 30, 255]));
    }

    #[test]
    fn feather_applies_to_saturated_near_background() {
        let mut img = white_with_square(64, 24, [200, 30, 30, 255]);
        // distance to white = 50, not light gray (blue channel 205)
        img.put_pixel(5, 5, Rgba([255, 255, 205, 255]));
        let (cleaned, _) = remove_background(&img, &TransparencyParams::default()).unwrap();
        let expected = (255.0_f64 * ((50.0 - 38.0) / 28.0)).round() as u8;
        assert_eq!(cleaned.get_pixel(5, 5)[3], expected);
    }

    #[test]
    fn checkerboard_background_is_removed() {
        let mut img = checkerboard(64, 8, [255, 255, 255], [204, 204, 204]);
        for y in 24..40 {
            for x in 24..40 {
                img.put_pixel(x, y, Rgba([20, 120, 60, 255]));
            }
        }
        let params = TransparencyParams::default();
        let palette = BackgroundPalette::estimate(&img, 2, params.sample_divisor, params.quantize_grid);
        assert!(is_likely_checkerboard(&palette, &params));

        let bytes = encode(&img);
        let out = ensure_transparent(&bytes);
        assert!(out.applied);
        assert_eq!(out.background, Some(BackgroundKind::Checkerboard));
        let cleaned = decode(&out.bytes);
        assert_eq!(cleaned.get_pixel(0, 0)[3], 0);
        assert_eq!(cleaned.get_pixel(8, 0)[3], 0);
        assert_eq!(cleaned.get_pixel(32, 32)[3], 255);
    }

    #[test]
    fn varied_colorful_border_is_left_alone() {
        let img = RgbaImage::from_fn(80, 80, |x, y| {
            Rgba([((x * 7) % 200) as u8, ((y * 11) % 180) as u8, ((x + y) % 60) as u8, 255])
        });
        let bytes = encode(&img);
        let out = ensure_transparent(&bytes);
        assert!(!out.applied);
        assert_eq!(out.bytes.as_ref(), bytes.as_slice());
    }

    #[test]
    fn dark_solid_background_is_not_a_candidate() {
        let img = white_with_square(64, 24, [200, 30, 30, 255]);
        let dark = RgbaImage::from_fn(64, 64, |x, y| {
            if img.get_pixel(x, y)[0] == 255 {
                Rgba([20, 20, 20, 255])
            } else {
                *img.get_pixel(x, y)
            }
        });
        assert!(remove_background(&dark, &TransparencyParams::default()).is_none());
    }

    #[test]
    fn light_gray_pixels_are_always_cleared() {
        let mut img = white_with_square(64, 24, [200, 30, 30, 255]);
        // distance to white ~ 69, outside the feather band, but light gray
        img.put_pixel(5, 5, Rgba([215, 215, 215, 255]));
        // not light gray: below 210
        img.put_pixel(6, 5, Rgba([180, 180, 180, 255]));
        let (cleaned, _) = remove_background(&img, &TransparencyParams::default()).unwrap();
        assert_eq!(cleaned.get_pixel(5, 5)[3], 0);
        assert_eq!(cleaned.get_pixel(6, 5)[3], 255);
    }

    #[test]
    fn edits_touching_two_percent_or_less_are_discarded() {
        let framed = |size: u32| {
            RgbaImage::from_fn(size, size, |x, y| {
                if x == 0 || y == 0 || x == size - 1 || y == size - 1 {
                    Rgba([255, 255, 255, 255])
                } else {
                    Rgba([30, 40, 50, 255])
                }
            })
        };
        let params = TransparencyParams::default();
        // 796 of 40000 pixels: 1.99%
        assert!(remove_background(&framed(200), &params).is_none());
        // 396 of 10000 pixels: 3.96%
        assert!(remove_background(&framed(100), &params).is_some());
    }

    #[test]
    fn garbage_bytes_are_passed_through() {
        let bytes = b"definitely not an image".to_vec();
        let out = ensure_transparent(&bytes);
        assert!(!out.applied);
        assert_eq!(out.bytes.as_ref(), bytes.as_slice());
    }
}
