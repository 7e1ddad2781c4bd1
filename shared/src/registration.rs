//! Displacement estimation between two frames
//!
//! [`FeatureRegistration`] matches oriented binary features and fits a
//! homography with RANSAC; translation comes from the offset terms and
//! rotation from the linear block. [`PhaseCorrelation`] is a cheaper
//! translation-only estimate for coarse moves where rotation is negligible.

use meter_math::homography::{estimate_homography_ransac, PointPair, RansacConfig};
use thiserror::Error;

use crate::image_proc::features::{OrbConfig, OrbExtractor};
use crate::image_proc::frame::PixelBuffer;
use crate::image_proc::matcher::{match_descriptors, MatcherConfig};
use crate::image_proc::phase_correlation::{phase_correlate, CropMode};
use crate::image_size::ImageSize;

/// Minimum accepted matches for a homography fit
pub const MIN_FEATURE_MATCHES: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("insufficient feature matches: found {found}, need {required}")]
    InsufficientFeatureMatches { found: usize, required: usize },

    #[error("robust fit failed: {0}")]
    FitFailed(String),

    #[error("frame sizes differ: {a} vs {b}")]
    ShapeMismatch { a: ImageSize, b: ImageSize },

    #[error("frame is empty")]
    EmptyFrame,
}

/// Measured motion of image content from the first frame to the second
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Displacement {
    pub dx: f64,
    pub dy: f64,
    pub rotation_deg: f64,
    /// Matches supporting the estimate (RANSAC inliers, 0 for phase correlation)
    pub support: usize,
}

/// Anything that can measure the shift between two frames
pub trait DisplacementEstimator: Send + Sync {
    fn estimate(&self, a: &PixelBuffer, b: &PixelBuffer) -> Result<Displacement, RegistrationError>;
}

/// Feature matching plus RANSAC homography
pub struct FeatureRegistration {
    extractor: OrbExtractor,
    matcher: MatcherConfig,
    ransac: RansacConfig,
}

impl FeatureRegistration {
    pub fn new(orb: OrbConfig, matcher: MatcherConfig, ransac: RansacConfig) -> Self {
        Self {
            extractor: OrbExtractor::new(orb),
            matcher,
            ransac,
        }
    }
}

impl Default for FeatureRegistration {
    fn default() -> Self {
        Self::new(
            OrbConfig::default(),
            MatcherConfig::default(),
            RansacConfig::default(),
        )
    }
}

impl DisplacementEstimator for FeatureRegistration {
    fn estimate(&self, a: &PixelBuffer, b: &PixelBuffer) -> Result<Displacement, RegistrationError> {
        // Shared intensity stretch so both frames map onto the same 8-bit scale
        let (lo_a, hi_a) = a.value_range().ok_or(RegistrationError::EmptyFrame)?;
        let (lo_b, hi_b) = b.value_range().ok_or(RegistrationError::EmptyFrame)?;
        let (lo, hi) = (f64::from(lo_a.min(lo_b)), f64::from(hi_a.max(hi_b)));

        let gray_a = a.to_gray8_with_range(lo, hi);
        let gray_b = b.to_gray8_with_range(lo, hi);

        let (features_a, features_b) = rayon::join(
            || self.extractor.detect_and_describe(&gray_a),
            || self.extractor.detect_and_describe(&gray_b),
        );

        let matches = match_descriptors(
            &features_a.descriptors,
            &features_b.descriptors,
            &self.matcher,
        );
        log::debug!(
            "registration: {} / {} features, {} matches after ratio test",
            features_a.len(),
            features_b.len(),
            matches.len()
        );

        if matches.len() < MIN_FEATURE_MATCHES {
            return Err(RegistrationError::InsufficientFeatureMatches {
                found: matches.len(),
                required: MIN_FEATURE_MATCHES,
            });
        }

        let pairs: Vec<PointPair> = matches
            .iter()
            .map(|m| {
                let src = features_a.keypoints[m.query];
                let dst = features_b.keypoints[m.train];
                PointPair::new(src.x, src.y, dst.x, dst.y)
            })
            .collect();

        let fit = estimate_homography_ransac(&pairs, &self.ransac)
            .map_err(|e| RegistrationError::FitFailed(e.to_string()))?;

        let t = fit.translation();
        Ok(Displacement {
            dx: t.x,
            dy: t.y,
            rotation_deg: fit.rotation().to_degrees(),
            support: fit.inlier_count,
        })
    }
}

/// Translation-only estimate from phase correlation
#[derive(Debug, Clone, Default)]
pub struct PhaseCorrelation {
    pub crop: CropMode,
}

impl PhaseCorrelation {
    pub fn new(crop: CropMode) -> Self {
        Self { crop }
    }
}

impl DisplacementEstimator for PhaseCorrelation {
    fn estimate(&self, a: &PixelBuffer, b: &PixelBuffer) -> Result<Displacement, RegistrationError> {
        if a.size() != b.size() {
            return Err(RegistrationError::ShapeMismatch {
                a: a.size(),
                b: b.size(),
            });
        }
        let shift = phase_correlate(&a.luminance(), &b.luminance(), self.crop)
            .ok_or(RegistrationError::EmptyFrame)?;
        log::debug!(
            "phase correlation: ({:.2}, {:.2}) peak {:.3}",
            shift.dx,
            shift.dy,
            shift.peak
        );

        Ok(Displacement {
            dx: shift.dx,
            dy: shift.dy,
            rotation_deg: 0.0,
            support: 0,
        })
    }
}
