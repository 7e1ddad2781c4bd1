//! Minimal-sample selection for RANSAC.

use rand::Rng;

use super::{PointPair, MIN_SAMPLE_SIZE};

/// Draw 4 distinct pairs uniformly at random
pub(super) fn draw_sample<R: Rng + ?Sized>(rng: &mut R, pairs: &[PointPair]) -> Vec<PointPair> {
    rand::seq::index::sample(rng, pairs.len(), MIN_SAMPLE_SIZE)
        .into_iter()
        .map(|i| pairs[i])
        .collect()
}

/// True when any three points of the sample are (nearly) collinear on
/// either side of the correspondence
pub(super) fn sample_is_degenerate(sample: &[PointPair]) -> bool {
    const AREA_EPSILON: f64 = 1e-6;

    let n = sample.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let src_area = triangle_area2(
                    [sample[i].src.x, sample[i].src.y],
                    [sample[j].src.x, sample[j].src.y],
                    [sample[k].src.x, sample[k].src.y],
                );
                let dst_area = triangle_area2(
                    [sample[i].dst.x, sample[i].dst.y],
                    [sample[j].dst.x, sample[j].dst.y],
                    [sample[k].dst.x, sample[k].dst.y],
                );
                if src_area.abs() < AREA_EPSILON || dst_area.abs() < AREA_EPSILON {
                    return true;
                }
            }
        }
    }
    false
}

/// Iterations needed to hit an outlier-free sample with `confidence`,
/// given the current inlier ratio
pub(super) fn adaptive_iterations(
    inliers: usize,
    total: usize,
    confidence: f64,
    max_iterations: usize,
) -> usize {
    if total == 0 {
        return max_iterations;
    }
    let w = inliers as f64 / total as f64;
    let p_good = w.powi(MIN_SAMPLE_SIZE as i32);
    if p_good >= 1.0 {
        return 1;
    }
    if p_good <= 0.0 {
        return max_iterations;
    }
    let n = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if !n.is_finite() {
        return max_iterations;
    }
    (n.ceil() as usize).clamp(1, max_iterations)
}

/// Twice the signed area of the triangle `abc`
fn triangle_area2(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}
