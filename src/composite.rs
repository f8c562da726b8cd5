//! Flattening an overlay onto its base image for download.

use crate::{
    error::{OverlayError, Result},
    geometry,
    models::Placement,
};
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

/// Draws `overlay` scaled to the placement size and rotated clockwise about
/// its center, source-over, onto a copy of `base`.
pub fn composite(base: &RgbaImage, overlay: &RgbaImage, placement: &Placement) -> RgbaImage {
    let mut out = base.clone();
    let (ow, oh) = overlay.dimensions();
    if ow == 0 || oh == 0 || !geometry::is_renderable(placement) || !placement.rotation.is_finite()
    {
        return out;
    }

    let (w, h) = (placement.width, placement.height);
    let cx = placement.x + w / 2.0;
    let cy = placement.y + h / 2.0;
    let (sin, cos) = placement.rotation.to_radians().sin_cos();

    let ex = (w / 2.0 * cos).abs() + (h / 2.0 * sin).abs();
    let ey = (w / 2.0 * sin).abs() + (h / 2.0 * cos).abs();
    let (bw, bh) = (out.width() as f64, out.height() as f64);
    let x0 = (cx - ex).floor().max(0.0) as u32;
    let y0 = (cy - ey).floor().max(0.0) as u32;
    let x1 = (cx + ex).ceil().min(bw).max(0.0) as u32;
    let y1 = (cy + ey).ceil().min(bh).max(0.0) as u32;

    let scale_x = ow as f64 / w;
    let scale_y = oh as f64 / h;

    for py in y0..y1 {
        for px in x0..x1 {
            let dx = px as f64 + 0.5 - cx;
            let dy = py as f64 + 0.5 - cy;
            // back into the unrotated overlay rectangle
            let u = dx * cos + dy * sin + w / 2.0;
            let v = -dx * sin + dy * cos + h / 2.0;
            if u < 0.0 || v < 0.0 || u >= w || v >= h {
                continue;
            }
            let src = sample_bilinear(overlay, u * scale_x - 0.5, v * scale_y - 0.5);
            blend_over(out.get_pixel_mut(px, py), src);
        }
    }
    out
}

/// Decodes both images, composites, and encodes the result as PNG.
pub fn export_png(base: &[u8], overlay: &[u8], placement: &Placement) -> Result<Vec<u8>> {
    let base = image::load_from_memory(base)
        .map_err(|e| OverlayError::ImageError(format!("base image: {}", e)))?
        .to_rgba8();
    let overlay = image::load_from_memory(overlay)
        .map_err(|e| OverlayError::ImageError(format!("overlay image: {}", e)))?
        .to_rgba8();

    let flattened = composite(&base, &overlay, placement);
    let mut encoded = Vec::new();
    flattened.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;
    Ok(encoded)
}

fn sample_bilinear(img: &RgbaImage, x: f64, y: f64) -> [f64; 4] {
    let max_x = (img.width() - 1) as f64;
    let max_y = (img.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let (x0, y0) = (x.floor(), y.floor());
    let (x1, y1) = ((x0 + 1.0).min(max_x), (y0 + 1.0).min(max_y));
    let (fx, fy) = (x - x0, y - y0);

    let p00 = img.get_pixel(x0 as u32, y0 as u32);
    let p10 = img.get_pixel(x1 as u32, y0 as u32);
    let p01 = img.get_pixel(x0 as u32, y1 as u32);
    let p11 = img.get_pixel(x1 as u32, y1 as u32);

    let mut out = [0.0; 4];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *value = top * (1.0 - fy) + bottom * fy;
    }
    out
}

fn blend_over(dst: &mut Rgba<u8>, src: [f64; 4]) {
    let sa = src[3] / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let blended = (src[c] * sa + dst[c] as f64 * da * (1.0 - sa)) / out_a;
        dst[c] = blended.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
