//! Steered BRIEF descriptors

use image::GrayImage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub const DESCRIPTOR_BYTES: usize = 32;

/// 256-bit binary descriptor
pub type Descriptor = [u8; DESCRIPTOR_BYTES];

pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Sampling pairs inside a disc, one pair per descriptor bit
#[derive(Debug, Clone)]
pub struct BriefPattern {
    pairs: Vec<[(f32, f32); 2]>,
}

impl BriefPattern {
    pub fn generate(seed: u64, radius: i32) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let r = radius as f32;
        let mut point = move || loop {
            let x = rng.random_range(-r..=r);
            let y = rng.random_range(-r..=r);
            if x * x + y * y <= r * r {
                return (x, y);
            }
        };

        let pairs = (0..DESCRIPTOR_BYTES * 8)
            .map(|_| [point(), point()])
            .collect();
        Self { pairs }
    }

    /// Describe the patch centred on `(cx, cy)` rotated by `angle` radians
    ///
    /// The caller keeps `(cx, cy)` at least the pattern radius from the
    /// edges; samples falling outside the image read as zero.
    pub fn describe(&self, image: &GrayImage, cx: i32, cy: i32, angle: f64) -> Descriptor {
        let (sin_a, cos_a) = (angle.sin() as f32, angle.cos() as f32);
        let sample = |(x, y): (f32, f32)| -> u8 {
            let rx = (cos_a * x - sin_a * y).round() as i32 + cx;
            let ry = (sin_a * x + cos_a * y).round() as i32 + cy;
            if rx < 0 || ry < 0 || rx >= image.width() as i32 || ry >= image.height() as i32 {
                return 0;
            }
            image.get_pixel(rx as u32, ry as u32)[0]
        };

        let mut desc = [0u8; DESCRIPTOR_BYTES];
        for (bit, [p, q]) in self.pairs.iter().enumerate() {
            if sample(*p) < sample(*q) {
                desc[bit / 8] |= 1 << (7 - bit % 8);
            }
        }
        desc
    }
}

/// Orientation of the intensity centroid of a disc around `(cx, cy)`
pub(super) fn intensity_centroid_angle(image: &GrayImage, cx: i32, cy: i32, radius: i32) -> f64 {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let mut m01 = 0.0f64;
    let mut m10 = 0.0f64;

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let (px, py) = (cx + dx, cy + dy);
            if px < 0 || py < 0 || px >= w || py >= h {
                continue;
            }
            let v = image.get_pixel(px as u32, py as u32)[0] as f64;
            m10 += v * dx as f64;
            m01 += v * dy as f64;
        }
    }
    m01.atan2(m10)
}
