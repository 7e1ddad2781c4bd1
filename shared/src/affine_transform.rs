//! Stage-to-pixel calibration transform.
//!
//! Maps a stage displacement onto the pixel displacement it produces:
//! ```text
//! pixel_dx = a * stage_dx + b * stage_dy
//! pixel_dy = c * stage_dx + d * stage_dy
//! ```
//! The matrix must stay invertible so pixel offsets can be turned back into
//! stage moves; every constructor rejects singular matrices, and so does
//! deserialization, which also recomputes the rotation/scale decomposition.

use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("transform is singular (determinant {determinant:e})")]
    Singular { determinant: f64 },

    #[error("need at least {required} correspondences, got {got}")]
    InsufficientPoints { required: usize, got: usize },

    #[error("least squares solve failed: {0}")]
    SolveFailed(String),
}

/// Calibrated stage→pixel linear map with its rotation/scale decomposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredTransform")]
pub struct AffineTransform {
    /// stage x contribution to pixel x
    pub a: f64,
    /// stage y contribution to pixel x
    pub b: f64,
    /// stage x contribution to pixel y
    pub c: f64,
    /// stage y contribution to pixel y
    pub d: f64,
    /// Rotation of the stage x axis in the image, radians
    pub rotation: f64,
    /// Pixels per stage unit along the stage x axis
    pub scale: f64,
    /// Number of calibration samples used
    pub num_samples: usize,
    /// RMS residual in pixels over the calibration samples, if computed
    pub rms_error: Option<f64>,
}

/// On-disk form; `rotation` and `scale` are derived and ignored when loading
#[derive(Deserialize)]
struct StoredTransform {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    num_samples: usize,
    #[serde(default)]
    rms_error: Option<f64>,
}

impl TryFrom<StoredTransform> for AffineTransform {
    type Error = TransformError;

    fn try_from(stored: StoredTransform) -> Result<Self, Self::Error> {
        let m = Matrix2::new(stored.a, stored.b, stored.c, stored.d);
        let mut transform = Self::from_matrix(m, stored.num_samples)?;
        transform.rms_error = stored.rms_error;
        Ok(transform)
    }
}

/// A stage displacement and the pixel displacement it produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointCorrespondence {
    pub stage_dx: f64,
    pub stage_dy: f64,
    pub pixel_dx: f64,
    pub pixel_dy: f64,
}

impl PointCorrespondence {
    pub fn new(stage_dx: f64, stage_dy: f64, pixel_dx: f64, pixel_dy: f64) -> Self {
        Self {
            stage_dx,
            stage_dy,
            pixel_dx,
            pixel_dy,
        }
    }
}

/// Relative determinant threshold below which a matrix counts as singular
const SINGULAR_TOLERANCE: f64 = 1e-12;

impl AffineTransform {
    /// Build from a full 2x2 matrix
    pub fn from_matrix(m: Matrix2<f64>, num_samples: usize) -> Result<Self, TransformError> {
        let determinant = m.determinant();
        let norm_sq = m.norm_squared();
        if !determinant.is_finite()
            || norm_sq == 0.0
            || determinant.abs() <= SINGULAR_TOLERANCE * norm_sq
        {
            return Err(TransformError::Singular { determinant });
        }

        let (a, b, c, d) = (m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]);
        Ok(Self {
            a,
            b,
            c,
            d,
            rotation: c.atan2(a),
            scale: a.hypot(c),
            num_samples,
            rms_error: None,
        })
    }

    /// Rotation plus uniform scale from the image of the stage x axis
    ///
    /// `theta = atan2(c, a)`, `scale = |(a, c)|`, `b = -scale sin(theta)`,
    /// `d = scale cos(theta)`.
    pub fn from_similarity(a: f64, c: f64, num_samples: usize) -> Result<Self, TransformError> {
        let theta = c.atan2(a);
        let scale = a.hypot(c);
        let b = -scale * theta.sin();
        let d = scale * theta.cos();
        Self::from_matrix(Matrix2::new(a, b, c, d), num_samples)
    }

    pub fn matrix(&self) -> Matrix2<f64> {
        Matrix2::new(self.a, self.b, self.c, self.d)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn rotation_degrees(&self) -> f64 {
        self.rotation.to_degrees()
    }

    /// Stage units moved per pixel of image motion
    pub fn stage_units_per_pixel(&self) -> f64 {
        1.0 / self.scale
    }

    pub fn stage_to_pixel(&self, stage_dx: f64, stage_dy: f64) -> (f64, f64) {
        let p = self.matrix() * Vector2::new(stage_dx, stage_dy);
        (p.x, p.y)
    }

    /// Stage displacement that produces the given pixel displacement
    pub fn pixel_to_stage(&self, pixel_dx: f64, pixel_dy: f64) -> Result<(f64, f64), TransformError> {
        let inv = self
            .matrix()
            .try_inverse()
            .ok_or(TransformError::Singular {
                determinant: self.determinant(),
            })?;
        let s = inv * Vector2::new(pixel_dx, pixel_dy);
        Ok((s.x, s.y))
    }

    /// RMS pixel residual of this transform over `points`
    pub fn residual_rms(&self, points: &[PointCorrespondence]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = points
            .iter()
            .map(|p| {
                let (px, py) = self.stage_to_pixel(p.stage_dx, p.stage_dy);
                (px - p.pixel_dx).powi(2) + (py - p.pixel_dy).powi(2)
            })
            .sum();
        (sum_sq / points.len() as f64).sqrt()
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Least-squares linear map (no offset) from stage deltas to pixel deltas.
///
/// Solved with SVD so non-orthogonal or differently scaled stage axes are
/// captured. Needs two correspondences whose stage deltas span the plane.
pub fn estimate_linear_transform(
    points: &[PointCorrespondence],
) -> Result<AffineTransform, TransformError> {
    let n = points.len();
    if n < 2 {
        return Err(TransformError::InsufficientPoints { required: 2, got: n });
    }

    let mut a_data = Vec::with_capacity(n * 2);
    let mut bx = Vec::with_capacity(n);
    let mut by = Vec::with_capacity(n);
    for p in points {
        a_data.push(p.stage_dx);
        a_data.push(p.stage_dy);
        bx.push(p.pixel_dx);
        by.push(p.pixel_dy);
    }

    let design = DMatrix::from_row_slice(n, 2, &a_data);
    let svd = design.svd(true, true);

    // Rank check: stage deltas must span both axes
    let max_sv = svd.singular_values.max();
    let min_sv = svd.singular_values.min();
    if max_sv == 0.0 || min_sv <= 1e-9 * max_sv {
        return Err(TransformError::InsufficientPoints { required: 2, got: 1 });
    }

    let row_x = svd
        .solve(&DVector::from_vec(bx), 1e-12)
        .map_err(|e| TransformError::SolveFailed(e.to_string()))?;
    let row_y = svd
        .solve(&DVector::from_vec(by), 1e-12)
        .map_err(|e| TransformError::SolveFailed(e.to_string()))?;

    let m = Matrix2::new(row_x[0], row_x[1], row_y[0], row_y[1]);
    let mut transform = AffineTransform::from_matrix(m, n)?;
    transform.rms_error = Some(transform.residual_rms(points));
    Ok(transform)
}
