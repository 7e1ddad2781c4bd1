//! Numerical routines shared by the calibration and registration code.
//!
//! - [`homography`]: planar homography fitting (normalised DLT) with RANSAC outlier rejection
//! - [`curve_fit`]: Levenberg–Marquardt nonlinear least squares
//! - [`nelder_mead`]: derivative-free simplex minimisation

pub mod curve_fit;
pub mod homography;
pub mod nelder_mead;

pub use curve_fit::{curve_fit, CurveFit, CurveFitConfig, CurveFitError};
pub use homography::{
    estimate_homography_ransac, fit_homography, HomographyError, HomographyFit, PointPair,
    RansacConfig,
};
pub use nelder_mead::{minimize, Minimum, NelderMeadConfig};
