//! Translation estimate by phase correlation
//!
//! The normalised cross-power spectrum of two frames has an inverse
//! transform that peaks at their relative shift. A Hann window suppresses
//! the edge discontinuity and a parabolic fit around the peak gives the
//! sub-pixel part.

use ndarray::{s, Array2};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

/// Which parts of the two frames are correlated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CropMode {
    /// Whole frames
    #[default]
    Full,
    /// Left half of the first frame against the right half of the second;
    /// the half width is added back to the horizontal shift
    HalfFrame,
}

/// Shift of `b` relative to `a` with the normalised correlation peak height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseShift {
    pub dx: f64,
    pub dy: f64,
    pub peak: f64,
}

/// Estimate the translation taking `a` onto `b`
///
/// Both planes must have the same shape; `None` if either is empty.
pub fn phase_correlate(a: &Array2<f64>, b: &Array2<f64>, crop: CropMode) -> Option<PhaseShift> {
    if a.dim() != b.dim() || a.is_empty() {
        return None;
    }

    match crop {
        CropMode::Full => correlate(a, b),
        CropMode::HalfFrame => {
            let half = a.ncols() / 2;
            if half == 0 {
                return None;
            }
            let left = a.slice(s![.., ..half]).to_owned();
            let right = b.slice(s![.., half..2 * half]).to_owned();
            correlate(&left, &right).map(|shift| PhaseShift {
                dx: shift.dx + half as f64,
                ..shift
            })
        }
    }
}

fn correlate(a: &Array2<f64>, b: &Array2<f64>) -> Option<PhaseShift> {
    let (h, w) = a.dim();
    let window = hann_window(h, w);

    let mut fa = windowed_spectrum_input(a, &window);
    let mut fb = windowed_spectrum_input(b, &window);

    let mut planner = FftPlanner::new();
    fft2(&mut planner, &mut fa, h, w, false);
    fft2(&mut planner, &mut fb, h, w, false);

    let mut cross: Vec<Complex<f64>> = fa
        .iter()
        .zip(&fb)
        .map(|(x, y)| {
            let r = x.conj() * y;
            let mag = r.norm();
            if mag > 1e-12 {
                r / mag
            } else {
                Complex::new(0.0, 0.0)
            }
        })
        .collect();
    fft2(&mut planner, &mut cross, h, w, true);

    let surface: Vec<f64> = cross.iter().map(|c| c.re / (h * w) as f64).collect();
    let (peak_idx, &peak) = surface
        .iter()
        .enumerate()
        .max_by(|x, y| x.1.total_cmp(y.1))?;
    let (py, px) = (peak_idx / w, peak_idx % w);

    let at = |y: usize, x: usize| surface[y * w + x];
    let sub_x = parabolic_offset(at(py, (px + w - 1) % w), peak, at(py, (px + 1) % w));
    let sub_y = parabolic_offset(at((py + h - 1) % h, px), peak, at((py + 1) % h, px));

    Some(PhaseShift {
        dx: wrap(px, w) + sub_x,
        dy: wrap(py, h) + sub_y,
        peak,
    })
}

fn windowed_spectrum_input(plane: &Array2<f64>, window: &Array2<f64>) -> Vec<Complex<f64>> {
    let mean = plane.mean().unwrap_or(0.0);
    plane
        .iter()
        .zip(window.iter())
        .map(|(&v, &wv)| Complex::new((v - mean) * wv, 0.0))
        .collect()
}

fn hann_window(h: usize, w: usize) -> Array2<f64> {
    let hann = |n: usize, len: usize| -> f64 {
        if len < 2 {
            return 1.0;
        }
        0.5 * (1.0 - (2.0 * std::f64::consts::PI * n as f64 / (len - 1) as f64).cos())
    };
    Array2::from_shape_fn((h, w), |(y, x)| hann(y, h) * hann(x, w))
}

/// In-place 2-D FFT of a row-major `h x w` buffer
fn fft2(planner: &mut FftPlanner<f64>, data: &mut [Complex<f64>], h: usize, w: usize, inverse: bool) {
    let row_fft = if inverse {
        planner.plan_fft_inverse(w)
    } else {
        planner.plan_fft_forward(w)
    };
    for row in data.chunks_exact_mut(w) {
        row_fft.process(row);
    }

    let col_fft = if inverse {
        planner.plan_fft_inverse(h)
    } else {
        planner.plan_fft_forward(h)
    };
    let mut column = vec![Complex::new(0.0, 0.0); h];
    for x in 0..w {
        for y in 0..h {
            column[y] = data[y * w + x];
        }
        col_fft.process(&mut column);
        for y in 0..h {
            data[y * w + x] = column[y];
        }
    }
}

/// Map an FFT index to a signed shift
fn wrap(idx: usize, len: usize) -> f64 {
    if idx > len / 2 {
        idx as f64 - len as f64
    } else {
        idx as f64
    }
}

/// Vertex offset of the parabola through three equally spaced samples
fn parabolic_offset(left: f64, centre: f64, right: f64) -> f64 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}
