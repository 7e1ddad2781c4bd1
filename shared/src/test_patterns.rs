//! Deterministic synthetic specimens
//!
//! Used by the unit tests and by the simulated microscope. Everything here is
//! seeded so a given call always produces the same pixels.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Full scale of the synthetic sensor (12-bit)
pub const FULL_SCALE: f64 = 4095.0;

/// Textured field of overlapping rectangles and soft blobs on a dim,
/// slightly noisy background
pub fn textured_specimen(width: usize, height: usize, seed: u64) -> Array2<u16> {
    let field = textured_field(width, height, seed);
    to_u16(&field)
}

/// Floating point version of [`textured_specimen`] for resampling
pub fn textured_field(width: usize, height: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut field = Array2::from_shape_fn((height, width), |_| 150.0 + rng.random_range(-8.0..8.0));

    let n_rects = (width * height / 300).max(4);
    for _ in 0..n_rects {
        let rw = rng.random_range(3..18usize);
        let rh = rng.random_range(3..18usize);
        let x0 = rng.random_range(0..width.max(1));
        let y0 = rng.random_range(0..height.max(1));
        let level = rng.random_range(400.0..3800.0);
        for y in y0..(y0 + rh).min(height) {
            for x in x0..(x0 + rw).min(width) {
                field[[y, x]] = level;
            }
        }
    }

    let n_blobs = (width * height / 1500).max(2);
    for _ in 0..n_blobs {
        let cx = rng.random_range(0.0..width as f64);
        let cy = rng.random_range(0.0..height as f64);
        let sigma = rng.random_range(1.5..4.0);
        let amplitude = rng.random_range(-600.0..1200.0);
        add_gaussian_spot(&mut field, cx, cy, sigma, amplitude);
    }

    field.mapv_inplace(|v| v.clamp(0.0, FULL_SCALE));
    field
}

/// Add `amplitude * exp(-r^2 / 2 sigma^2)` around `(cx, cy)`, limited to 4 sigma
pub fn add_gaussian_spot(field: &mut Array2<f64>, cx: f64, cy: f64, sigma: f64, amplitude: f64) {
    let (h, w) = field.dim();
    let reach = (4.0 * sigma).ceil();
    let x_lo = (cx - reach).floor().max(0.0) as usize;
    let y_lo = (cy - reach).floor().max(0.0) as usize;
    let x_hi = ((cx + reach).ceil() as usize).min(w.saturating_sub(1));
    let y_hi = ((cy + reach).ceil() as usize).min(h.saturating_sub(1));
    if w == 0 || h == 0 || x_lo > x_hi || y_lo > y_hi {
        return;
    }

    let denom = 2.0 * sigma * sigma;
    for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            let r2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
            field[[y, x]] += amplitude * (-r2 / denom).exp();
        }
    }
}

/// Shift content by `(dx, dy)` pixels: `out[y + dy, x + dx] = img[y, x]`
///
/// Uncovered pixels are set to `fill`.
pub fn translate(img: &Array2<u16>, dx: i64, dy: i64, fill: u16) -> Array2<u16> {
    let (h, w) = img.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let sx = x as i64 - dx;
        let sy = y as i64 - dy;
        if sx < 0 || sy < 0 || sx >= w as i64 || sy >= h as i64 {
            fill
        } else {
            img[[sy as usize, sx as usize]]
        }
    })
}

/// Rotate content by `angle_deg` (counter-clockwise in image axes, y down)
/// about the frame centre with bilinear sampling
pub fn rotate_about_center(img: &Array2<u16>, angle_deg: f64, fill: u16) -> Array2<u16> {
    let (h, w) = img.dim();
    let field = img.mapv(f64::from);
    let (cx, cy) = ((w / 2) as f64, (h / 2) as f64);
    let (sin_a, cos_a) = angle_deg.to_radians().sin_cos();

    Array2::from_shape_fn((h, w), |(y, x)| {
        let (ox, oy) = (x as f64 - cx, y as f64 - cy);
        // inverse rotation back into the source frame
        let sx = cos_a * ox + sin_a * oy + cx;
        let sy = -sin_a * ox + cos_a * oy + cy;
        match sample_bilinear(&field, sx, sy) {
            Some(v) => v.round().clamp(0.0, u16::MAX as f64) as u16,
            None => fill,
        }
    })
}

/// Bilinear sample at a fractional position, `None` outside the field
pub fn sample_bilinear(field: &Array2<f64>, x: f64, y: f64) -> Option<f64> {
    let (h, w) = field.dim();
    if w == 0 || h == 0 || x < 0.0 || y < 0.0 || x > (w - 1) as f64 || y > (h - 1) as f64 {
        return None;
    }
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);

    let top = field[[y0, x0]] * (1.0 - fx) + field[[y0, x1]] * fx;
    let bottom = field[[y1, x0]] * (1.0 - fx) + field[[y1, x1]] * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Round and clamp a floating point field into `u16`
pub fn to_u16(field: &Array2<f64>) -> Array2<u16> {
    field.mapv(|v| v.round().clamp(0.0, u16::MAX as f64) as u16)
}
