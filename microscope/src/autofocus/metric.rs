//! Sharpness scoring

use rayon::prelude::*;
use shared::image_proc::PixelStats;
use shared::PixelBuffer;

use super::zscan::ZStackFrame;

/// Score of one frame at one focus position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusMetricRecord {
    pub position: f64,
    pub score: f64,
    /// Index of the frame in the sweep
    pub index: usize,
}

/// A sharpness score for a single frame
///
/// Returns `None` for frames that cannot be scored; those are excluded from
/// the search rather than counted as zero.
pub trait FocusMetric: Send + Sync {
    fn evaluate(&self, buffer: &PixelBuffer) -> Option<f64>;
}

/// `variance / mean` over every sample of the frame
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedVariance;

impl FocusMetric for NormalizedVariance {
    fn evaluate(&self, buffer: &PixelBuffer) -> Option<f64> {
        let stats = PixelStats::from_buffer(buffer).ok()?;
        log::debug!(
            "frame {} min {} max {} mean {:.2}",
            buffer.size(),
            stats.min,
            stats.max,
            stats.mean
        );
        if stats.mean == 0.0 {
            return None;
        }
        Some(stats.variance / stats.mean)
    }
}

/// Score a sweep in parallel, keeping capture order and dropping frames
/// the metric rejects
pub fn score_frames(metric: &dyn FocusMetric, frames: &[ZStackFrame]) -> Vec<FocusMetricRecord> {
    let scores: Vec<Option<f64>> = frames
        .par_iter()
        .map(|frame| metric.evaluate(&frame.buffer))
        .collect();

    frames
        .iter()
        .zip(scores)
        .filter_map(|(frame, score)| match score {
            Some(score) => Some(FocusMetricRecord {
                position: frame.position,
                score,
                index: frame.index,
            }),
            None => {
                log::warn!(
                    "frame {} at z={:.3} has zero mean intensity, excluded",
                    frame.index,
                    frame.position
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_normalized_variance_value() {
        // mean 2.5, population variance 1.25
        let buffer = PixelBuffer::from(Array2::from_shape_vec((2, 2), vec![1, 2, 3, 4]).unwrap());
        let score = NormalizedVariance.evaluate(&buffer).unwrap();
        assert_relative_eq!(score, 0.5);
    }

    #[test]
    fn test_zero_mean_is_excluded_not_zero() {
        let dark = PixelBuffer::from(Array2::<u16>::zeros((4, 4)));
        assert_eq!(NormalizedVariance.evaluate(&dark), None);
    }

    #[test]
    fn test_flat_frame_scores_zero() {
        let flat = PixelBuffer::from(Array2::from_elem((4, 4), 100u16));
        assert_eq!(NormalizedVariance.evaluate(&flat), Some(0.0));
    }

    #[test]
    fn test_brightness_scaling_does_not_change_ranking() {
        let sharp = Array2::from_shape_fn((8, 8), |(y, x)| if (x + y) % 2 == 0 { 100 } else { 300 });
        let soft = Array2::from_shape_fn((8, 8), |(y, x)| if (x + y) % 2 == 0 { 180 } else { 220 });
        let a = NormalizedVariance.evaluate(&PixelBuffer::from(sharp.clone())).unwrap();
        let b = NormalizedVariance.evaluate(&PixelBuffer::from(soft)).unwrap();
        let a_bright = NormalizedVariance
            .evaluate(&PixelBuffer::from(sharp.mapv(|v| v * 2)))
            .unwrap();
        assert!(a > b);
        assert!(a_bright > b);
    }

    #[test]
    fn test_multichannel_uses_all_samples() {
        let multi = Array3::from_shape_fn((2, 2, 2), |(_, _, c)| if c == 0 { 10u16 } else { 30 });
        let score = NormalizedVariance.evaluate(&PixelBuffer::from(multi)).unwrap();
        // mean 20, variance 100
        assert_relative_eq!(score, 5.0);
    }

    #[test]
    fn test_score_frames_keeps_order_and_skips_dark() {
        let frame = |index: usize, value: u16| ZStackFrame {
            index,
            position: 1000.0 + index as f64,
            buffer: PixelBuffer::from(Array2::from_shape_fn((2, 2), |(y, _)| {
                if y == 0 {
                    value
                } else {
                    value * 3
                }
            })),
            frame_number: index as u64 + 1,
        };
        let frames = vec![frame(0, 5), frame(1, 0), frame(2, 20)];
        let records = score_frames(&NormalizedVariance, &frames);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, 0);
        assert_eq!(records[1].index, 2);
        assert_relative_eq!(records[1].position, 1002.0);
    }
}
