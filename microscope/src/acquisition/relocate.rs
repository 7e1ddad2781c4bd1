//! Finding the target again after a move
//!
//! Two strategies with different cost: [`FullRedetection`] re-runs the
//! caller's identifier over the whole frame, [`LocalPeakSearch`] only looks
//! for the brightest pixel near where the target is expected. The caller
//! picks one per acquisition.

use ndarray::s;
use shared::PixelBuffer;

/// A candidate location reported by an identifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPoint {
    pub x: f64,
    pub y: f64,
    pub confidence: Option<f64>,
}

impl TargetPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// External detector producing candidate pixel coordinates
pub trait TargetIdentifier {
    fn identify(&self, image: &PixelBuffer) -> Vec<TargetPoint>;
}

impl<F> TargetIdentifier for F
where
    F: Fn(&PixelBuffer) -> Vec<TargetPoint>,
{
    fn identify(&self, image: &PixelBuffer) -> Vec<TargetPoint> {
        self(image)
    }
}

pub trait TargetRelocator {
    /// Target location near `expected`, or `None` if nothing lies within `radius`
    fn relocate(&self, image: &PixelBuffer, expected: (f64, f64), radius: f64) -> Option<TargetPoint>;
}

/// Run the identifier again and keep the detection closest to the expected location
pub struct FullRedetection<I> {
    identifier: I,
}

impl<I: TargetIdentifier> FullRedetection<I> {
    pub fn new(identifier: I) -> Self {
        Self { identifier }
    }
}

impl<I: TargetIdentifier> TargetRelocator for FullRedetection<I> {
    fn relocate(&self, image: &PixelBuffer, expected: (f64, f64), radius: f64) -> Option<TargetPoint> {
        let detections = self.identifier.identify(image);
        log::debug!("re-detection found {} candidates", detections.len());
        detections
            .into_iter()
            .map(|p| (p.distance_to(expected.0, expected.1), p))
            .filter(|(d, _)| *d <= radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, p)| p)
    }
}

/// Brightest pixel in a square window around the expected location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPeakSearch {
    /// Peak must exceed the window mean by this many counts
    pub min_contrast: f64,
}

impl Default for LocalPeakSearch {
    fn default() -> Self {
        Self { min_contrast: 200.0 }
    }
}

impl TargetRelocator for LocalPeakSearch {
    fn relocate(&self, image: &PixelBuffer, expected: (f64, f64), radius: f64) -> Option<TargetPoint> {
        let size = image.size();
        let (ex, ey) = expected;
        let x1 = (ex - radius).floor().max(0.0) as usize;
        let y1 = (ey - radius).floor().max(0.0) as usize;
        let x2 = ((ex + radius).ceil().max(0.0) as usize).min(size.width);
        let y2 = ((ey + radius).ceil().max(0.0) as usize).min(size.height);
        if x1 >= x2 || y1 >= y2 {
            return None;
        }

        let luminance = image.luminance();
        let window = luminance.slice(s![y1..y2, x1..x2]);
        let mean = window.mean()?;

        let mut peak = (f64::NEG_INFINITY, 0, 0);
        for ((row, col), &v) in window.indexed_iter() {
            if v > peak.0 {
                peak = (v, row, col);
            }
        }

        let contrast = peak.0 - mean;
        if contrast < self.min_contrast {
            log::debug!("local peak contrast {contrast:.1} below {}", self.min_contrast);
            return None;
        }
        Some(TargetPoint::new((x1 + peak.2) as f64, (y1 + peak.1) as f64).with_confidence(contrast))
    }
}
