//! Normalised direct linear transform.
//!
//! Points are conditioned (centroid at the origin, mean distance sqrt(2))
//! before the linear system is solved, then the solution is mapped back.

use nalgebra::{DMatrix, Matrix3, Vector2, Vector3};

use super::{HomographyError, PointPair, MIN_SAMPLE_SIZE};

/// Fit a homography exactly (4 pairs) or in the least-squares sense (more)
///
/// # Errors
/// * `HomographyError::InsufficientPoints` - fewer than 4 pairs
/// * `HomographyError::Degenerate` - all points coincide, or the solution
///   sends the origin to infinity
/// * `HomographyError::SvdFailed` - decomposition did not yield V^T
pub fn fit_homography(pairs: &[PointPair]) -> Result<Matrix3<f64>, HomographyError> {
    if pairs.len() < MIN_SAMPLE_SIZE {
        return Err(HomographyError::InsufficientPoints {
            required: MIN_SAMPLE_SIZE,
            got: pairs.len(),
        });
    }

    let src: Vec<Vector2<f64>> = pairs.iter().map(|p| p.src).collect();
    let dst: Vec<Vector2<f64>> = pairs.iter().map(|p| p.dst).collect();
    let t_src = conditioning_transform(&src)?;
    let t_dst = conditioning_transform(&dst)?;

    let mut a = DMatrix::<f64>::zeros(2 * pairs.len(), 9);
    for (i, (s, d)) in src.iter().zip(&dst).enumerate() {
        let s = apply(&t_src, s);
        let d = apply(&t_dst, d);
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);

        let r = 2 * i;
        a[(r, 0)] = -x;
        a[(r, 1)] = -y;
        a[(r, 2)] = -1.0;
        a[(r, 6)] = u * x;
        a[(r, 7)] = u * y;
        a[(r, 8)] = u;

        a[(r + 1, 3)] = -x;
        a[(r + 1, 4)] = -y;
        a[(r + 1, 5)] = -1.0;
        a[(r + 1, 6)] = v * x;
        a[(r + 1, 7)] = v * y;
        a[(r + 1, 8)] = v;
    }

    // Square 9x9 normal matrix keeps the full V^T available for 4-point samples
    let ata = a.transpose() * &a;
    let svd = ata.svd(false, true);
    let v_t = svd.v_t.ok_or(HomographyError::SvdFailed)?;

    let smallest = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .ok_or(HomographyError::SvdFailed)?;

    let h = v_t.row(smallest);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse().ok_or(HomographyError::Degenerate)?;
    let m = t_dst_inv * h_norm * t_src;

    let scale = m[(2, 2)];
    if scale.abs() < 1e-12 || !scale.is_finite() {
        return Err(HomographyError::Degenerate);
    }
    Ok(m / scale)
}

/// Distance between the projected source point and its destination
pub(super) fn transfer_error(model: &Matrix3<f64>, pair: &PointPair) -> f64 {
    let p = model * Vector3::new(pair.src.x, pair.src.y, 1.0);
    if p.z.abs() < 1e-12 {
        return f64::INFINITY;
    }
    let projected = Vector2::new(p.x / p.z, p.y / p.z);
    (projected - pair.dst).norm()
}

fn centroid(points: &[Vector2<f64>]) -> Vector2<f64> {
    let sum = points.iter().fold(Vector2::zeros(), |acc, p| acc + p);
    sum / points.len().max(1) as f64
}

/// Similarity that moves the centroid to the origin and sets the mean
/// distance from it to sqrt(2)
fn conditioning_transform(points: &[Vector2<f64>]) -> Result<Matrix3<f64>, HomographyError> {
    let c = centroid(points);
    let mean_dist = points.iter().map(|p| (p - c).norm()).sum::<f64>() / points.len() as f64;
    if mean_dist < 1e-12 {
        return Err(HomographyError::Degenerate);
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Ok(Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0))
}

fn apply(t: &Matrix3<f64>, p: &Vector2<f64>) -> Vector2<f64> {
    let q = t * Vector3::new(p.x, p.y, 1.0);
    Vector2::new(q.x / q.z, q.y / q.z)
}
