//! Robust planar homography estimation for image registration
//!
//! Fits the 3x3 projective transform mapping source points onto destination
//! points. [`estimate_homography_ransac`] repeatedly fits minimal 4-point
//! samples, keeps the model with the largest consensus set, then refits on
//! every inlier of that model.

mod dlt;
mod sampling;

use nalgebra::{Matrix3, Vector2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

pub use dlt::fit_homography;
use dlt::transfer_error;
use sampling::{adaptive_iterations, draw_sample, sample_is_degenerate};

/// Number of point pairs in a minimal homography sample
pub const MIN_SAMPLE_SIZE: usize = 4;

/// Errors that can occur during homography estimation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HomographyError {
    #[error("need at least {required} point pairs, got {got}")]
    InsufficientPoints { required: usize, got: usize },

    #[error("point configuration is degenerate")]
    Degenerate,

    #[error("SVD decomposition failed to produce V^T")]
    SvdFailed,

    #[error("no consensus: best model had {best} inliers out of {total} pairs")]
    NoConsensus { best: usize, total: usize },
}

/// A single source/destination correspondence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointPair {
    pub src: Vector2<f64>,
    pub dst: Vector2<f64>,
}

impl PointPair {
    pub fn new(src_x: f64, src_y: f64, dst_x: f64, dst_y: f64) -> Self {
        Self {
            src: Vector2::new(src_x, src_y),
            dst: Vector2::new(dst_x, dst_y),
        }
    }
}

/// RANSAC parameters
#[derive(Debug, Clone)]
pub struct RansacConfig {
    /// Maximum reprojection distance (pixels) for a pair to count as an inlier
    pub inlier_threshold: f64,
    /// Hard cap on sampling iterations
    pub max_iterations: usize,
    /// Probability that at least one sample is outlier free; drives early exit
    pub confidence: f64,
    /// Seed for the sampling RNG so fits are reproducible
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            inlier_threshold: 5.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0x5eed,
        }
    }
}

/// Result of a robust homography fit
#[derive(Debug, Clone)]
pub struct HomographyFit {
    /// Homography normalised so that `matrix[(2, 2)] == 1`
    pub matrix: Matrix3<f64>,
    /// Inlier flag for every input pair, in input order
    pub inliers: Vec<bool>,
    /// Number of `true` entries in `inliers`
    pub inlier_count: usize,
    /// RMS transfer error over the inliers (pixels)
    pub rms_error: f64,
    /// Number of RANSAC iterations performed
    pub iterations: usize,
}

impl HomographyFit {
    /// Offset terms of the homography
    pub fn translation(&self) -> Vector2<f64> {
        Vector2::new(self.matrix[(0, 2)], self.matrix[(1, 2)])
    }

    /// Rotation of the linear sub-block in radians
    pub fn rotation(&self) -> f64 {
        self.matrix[(1, 0)].atan2(self.matrix[(0, 0)])
    }
}

/// Estimate a homography from noisy correspondences with RANSAC
///
/// # Arguments
/// * `pairs` - Candidate correspondences, possibly containing outliers
/// * `config` - Sampling and inlier parameters
///
/// # Errors
/// * `HomographyError::InsufficientPoints` - fewer than 4 pairs
/// * `HomographyError::NoConsensus` - no sample produced a model with at least 4 inliers
pub fn estimate_homography_ransac(
    pairs: &[PointPair],
    config: &RansacConfig,
) -> Result<HomographyFit, HomographyError> {
    if pairs.len() < MIN_SAMPLE_SIZE {
        return Err(HomographyError::InsufficientPoints {
            required: MIN_SAMPLE_SIZE,
            got: pairs.len(),
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
    let mut required_iterations = config.max_iterations;
    let mut iterations = 0;

    while iterations < required_iterations {
        iterations += 1;

        let sample = draw_sample(&mut rng, pairs);
        if sample_is_degenerate(&sample) {
            continue;
        }

        let model = match fit_homography(&sample) {
            Ok(model) => model,
            Err(_) => continue,
        };

        let (inliers, count) = classify(pairs, &model, config.inlier_threshold);
        let best_count = best.as_ref().map_or(0, |(_, _, c)| *c);

        if count > best_count {
            required_iterations = adaptive_iterations(
                count,
                pairs.len(),
                config.confidence,
                config.max_iterations,
            )
            .max(iterations);
            best = Some((model, inliers, count));
        }
    }

    let (model, inliers, count) = match best {
        Some(best) if best.2 >= MIN_SAMPLE_SIZE => best,
        other => {
            return Err(HomographyError::NoConsensus {
                best: other.map_or(0, |(_, _, c)| c),
                total: pairs.len(),
            })
        }
    };

    // Refit on the consensus set; keep the sample model if the refit is worse
    let consensus: Vec<PointPair> = pairs
        .iter()
        .zip(&inliers)
        .filter_map(|(p, &inlier)| inlier.then_some(*p))
        .collect();

    let (matrix, inliers, inlier_count) = match fit_homography(&consensus) {
        Ok(refined) => {
            let (refined_inliers, refined_count) =
                classify(pairs, &refined, config.inlier_threshold);
            if refined_count >= count {
                (refined, refined_inliers, refined_count)
            } else {
                (model, inliers, count)
            }
        }
        Err(e) => {
            log::debug!("Consensus refit failed ({e}), keeping sample model");
            (model, inliers, count)
        }
    };

    let sum_sq: f64 = pairs
        .iter()
        .zip(&inliers)
        .filter(|&(_, &inlier)| inlier)
        .map(|(p, _)| transfer_error(&matrix, p).powi(2))
        .sum();

    Ok(HomographyFit {
        matrix,
        inliers,
        inlier_count,
        rms_error: (sum_sq / inlier_count as f64).sqrt(),
        iterations,
    })
}

/// Flags pairs whose transfer error is within `threshold`
fn classify(pairs: &[PointPair], model: &Matrix3<f64>, threshold: f64) -> (Vec<bool>, usize) {
    let inliers: Vec<bool> = pairs
        .iter()
        .map(|p| transfer_error(model, p) <= threshold)
        .collect();
    let count = inliers.iter().filter(|&&i| i).count();
    (inliers, count)
}

#[cfg(test)]
mod tests;
