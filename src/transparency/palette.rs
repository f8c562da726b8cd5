use image::RgbaImage;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
    };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn luminance(&self) -> f64 {
        0.2126 * self.r as f64 + 0.7152 * self.g as f64 + 0.0722 * self.b as f64
    }

    pub fn distance(&self, other: &Color) -> f64 {
        let dr = self.r as f64 - other.r as f64;
        let dg = self.g as f64 - other.g as f64;
        let db = self.b as f64 - other.b as f64;
        (dr * dr + dg * dg + db * db).sqrt()
    }

    /// Spread between the strongest and weakest channel.
    pub fn spread(&self) -> u8 {
        let max = self.r.max(self.g).max(self.b);
        let min = self.r.min(self.g).min(self.b);
        max - min
    }

    pub fn all_above(&self, min: u8) -> bool {
        self.r > min && self.g > min && self.b > min
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaletteColor {
    pub color: Color,
    pub count: usize,
}

/// Dominant border colors of one image, most frequent first.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundPalette {
    pub colors: Vec<PaletteColor>,
    pub sample_count: usize,
}

impl BackgroundPalette {
    pub fn estimate(img: &RgbaImage, max_colors: usize, sample_divisor: u32, grid: f64) -> Self {
        let samples = collect_edge_samples(img, sample_divisor);

        struct Bucket {
            r: f64,
            g: f64,
            b: f64,
            count: usize,
        }

        let mut index: HashMap<(i32, i32, i32), usize> = HashMap::new();
        let mut buckets: Vec<Bucket> = Vec::new();

        for s in &samples {
            let key = (
                quantize(s.r, grid),
                quantize(s.g, grid),
                quantize(s.b, grid),
            );
            match index.get(&key) {
                Some(&i) => {
                    let bucket = &mut buckets[i];
                    let n = bucket.count as f64;
                    bucket.r = (bucket.r * n + s.r as f64) / (n + 1.0);
                    bucket.g = (bucket.g * n + s.g as f64) / (n + 1.0);
                    bucket.b = (bucket.b * n + s.b as f64) / (n + 1.0);
                    bucket.count += 1;
                }
                None => {
                    index.insert(key, buckets.len());
                    buckets.push(Bucket {
                        r: s.r as f64,
                        g: s.g as f64,
                        b: s.b as f64,
                        count: 1,
                    });
                }
            }
        }

        // stable: equal counts keep first-seen order
        buckets.sort_by(|a, b| b.count.cmp(&a.count));

        let colors = buckets
            .into_iter()
            .take(max_colors)
            .map(|bucket| PaletteColor {
                color: Color::new(
                    round_channel(bucket.r),
                    round_channel(bucket.g),
                    round_channel(bucket.b),
                ),
                count: bucket.count,
            })
            .collect();

        Self {
            colors,
            sample_count: samples.len(),
        }
    }

    pub fn frequency(&self, index: usize) -> f64 {
        match self.colors.get(index) {
            Some(c) if self.sample_count > 0 => c.count as f64 / self.sample_count as f64,
            _ => 0.0,
        }
    }

    pub fn candidates(&self) -> Vec<Color> {
        self.colors.iter().map(|c| c.color).collect()
    }
}

fn collect_edge_samples(img: &RgbaImage, sample_divisor: u32) -> Vec<Color> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let step = (width.min(height) / sample_divisor.max(1)).max(1) as usize;
    let at = |x: u32, y: u32| {
        let p = img.get_pixel(x, y);
        Color::new(p[0], p[1], p[2])
    };

    let mut samples = Vec::new();
    for x in (0..width).step_by(step) {
        samples.push(at(x, 0));
        samples.push(at(x, height - 1));
    }
    for y in (0..height).step_by(step) {
        samples.push(at(0, y));
        samples.push(at(width - 1, y));
    }
    samples
}

fn quantize(v: u8, grid: f64) -> i32 {
    ((v as f64 / grid).round() * grid) as i32
}

fn round_channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
