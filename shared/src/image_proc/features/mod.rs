//! Oriented FAST keypoints with steered binary descriptors
//!
//! Keypoints are detected with FAST-9 on a small image pyramid, oriented by
//! the intensity centroid of a circular patch, and described by 256 binary
//! intensity comparisons rotated to that orientation. The comparison pattern
//! comes from a seeded RNG so descriptors from separate calls are comparable.

mod descriptor;
mod fast;

use image::imageops::{resize, FilterType};
use image::GrayImage;
use rayon::prelude::*;

pub use descriptor::{hamming_distance, BriefPattern, Descriptor, DESCRIPTOR_BYTES};
pub use fast::{detect_fast, FastCorner};

/// Radius of the patch used for orientation and descriptor sampling
pub const PATCH_RADIUS: i32 = 15;

/// A detected keypoint in full-resolution pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    /// FAST score at the detection level
    pub response: f32,
    /// Patch orientation in radians
    pub angle: f64,
    /// Pyramid level the keypoint was found on
    pub octave: usize,
}

#[derive(Debug, Clone)]
pub struct OrbConfig {
    /// Keypoints kept after ranking by response
    pub n_features: usize,
    pub n_levels: usize,
    pub scale_factor: f32,
    /// FAST intensity threshold on the 8-bit image
    pub fast_threshold: u8,
    /// Smoothing applied before descriptor comparisons
    pub blur_sigma: f32,
    /// Seed of the comparison pattern
    pub pattern_seed: u64,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            n_features: 1000,
            n_levels: 3,
            scale_factor: 1.2,
            fast_threshold: 20,
            blur_sigma: 2.0,
            pattern_seed: 0x0b1e,
        }
    }
}

/// Keypoints and their descriptors, index aligned
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Detector/descriptor pair with a fixed comparison pattern
pub struct OrbExtractor {
    config: OrbConfig,
    pattern: BriefPattern,
}

impl OrbExtractor {
    pub fn new(config: OrbConfig) -> Self {
        let pattern = BriefPattern::generate(config.pattern_seed, PATCH_RADIUS);
        Self { config, pattern }
    }

    pub fn config(&self) -> &OrbConfig {
        &self.config
    }

    /// Detect, orient and describe keypoints over every pyramid level
    pub fn detect_and_describe(&self, image: &GrayImage) -> FeatureSet {
        let mut found: Vec<(Keypoint, Descriptor)> = Vec::new();
        let mut scale = 1.0f32;

        for level in 0..self.config.n_levels.max(1) {
            let scaled = if level == 0 {
                image.clone()
            } else {
                let w = (image.width() as f32 / scale).round() as u32;
                let h = (image.height() as f32 / scale).round() as u32;
                if w <= 2 * PATCH_RADIUS as u32 + 8 || h <= 2 * PATCH_RADIUS as u32 + 8 {
                    break;
                }
                resize(image, w, h, FilterType::Triangle)
            };

            let corners = detect_fast(&scaled, self.config.fast_threshold, PATCH_RADIUS + 1);
            let smoothed = if self.config.blur_sigma > 0.0 {
                imageproc::filter::gaussian_blur_f32(&scaled, self.config.blur_sigma)
            } else {
                scaled.clone()
            };

            let level_features: Vec<(Keypoint, Descriptor)> = corners
                .par_iter()
                .map(|corner| {
                    let angle = descriptor::intensity_centroid_angle(
                        &scaled,
                        corner.x,
                        corner.y,
                        PATCH_RADIUS,
                    );
                    let desc = self.pattern.describe(&smoothed, corner.x, corner.y, angle);
                    let kp = Keypoint {
                        x: corner.x as f64 * scale as f64,
                        y: corner.y as f64 * scale as f64,
                        response: corner.score,
                        angle,
                        octave: level,
                    };
                    (kp, desc)
                })
                .collect();

            log::debug!(
                "level {level}: {}x{} -> {} keypoints",
                scaled.width(),
                scaled.height(),
                level_features.len()
            );
            found.extend(level_features);
            scale *= self.config.scale_factor;
        }

        found.sort_by(|a, b| b.0.response.total_cmp(&a.0.response));
        found.truncate(self.config.n_features);

        let (keypoints, descriptors) = found.into_iter().unzip();
        FeatureSet {
            keypoints,
            descriptors,
        }
    }
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(OrbConfig::default())
    }
}
