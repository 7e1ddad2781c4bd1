//! Focus search: sweep, score, select
//!
//! ```text
//! run_scan(start, end, step)  ->  [ZStackFrame]
//! score_frames(metric)        ->  [FocusMetricRecord]   (zero-mean frames excluded)
//! strategy.select()           ->  best position         (earliest on ties)
//! ```

pub mod metric;
pub mod strategy;
pub mod zscan;

pub use metric::{score_frames, FocusMetric, FocusMetricRecord, NormalizedVariance};
pub use strategy::FocusStrategy;
pub use zscan::{sweep_positions, ZScanController, ZStackFrame};

use hardware::{DeviceContext, StageTarget};

use crate::cancel::CancelToken;
use crate::config::ZScanConfig;
use crate::error::{MicroscopeError, Result};
use crate::routine::Routine;

/// Outcome of a focus search
#[derive(Debug, Clone, PartialEq)]
pub struct FocusResult {
    /// Selected focus-axis position
    pub position: f64,
    /// Sweep index of the selected frame
    pub index: usize,
    pub score: f64,
    /// Every scored frame in capture order
    pub records: Vec<FocusMetricRecord>,
}

/// Sweep plus metric plus strategy
pub struct Autofocus {
    controller: ZScanController,
    metric: Box<dyn FocusMetric>,
}

impl Autofocus {
    pub fn new(config: ZScanConfig) -> Self {
        Self::with_metric(config, NormalizedVariance)
    }

    pub fn with_metric(config: ZScanConfig, metric: impl FocusMetric + 'static) -> Self {
        Self {
            controller: ZScanController::new(config),
            metric: Box::new(metric),
        }
    }

    pub fn config(&self) -> &ZScanConfig {
        self.controller.config()
    }

    /// Find the best focus between `start` and `end`
    ///
    /// The sweep, the scoring and the move to the best position share one
    /// device session.
    ///
    /// # Errors
    /// * `NoValidFocus` - no frame of the sweep could be scored
    /// * anything [`ZScanController::run_scan`] returns
    pub fn focus(
        &self,
        devices: &DeviceContext,
        start: f64,
        end: f64,
        step: f64,
        cancel: &CancelToken,
    ) -> Result<FocusResult> {
        let config = self.controller.config();
        let positions = sweep_positions(start, end, step, config.end_inclusive)?;
        let mut routine = Routine::open(devices, zscan::OPERATION, cancel)?;
        let frames = self
            .controller
            .scan(&mut routine, &positions, config.settle_delay())?;

        let records = score_frames(self.metric.as_ref(), &frames);
        if records.is_empty() {
            return Err(MicroscopeError::NoValidFocus {
                frames: frames.len(),
            });
        }
        let best = *config.strategy.select(&records)?;
        log::info!(
            "best focus z={:.3} (index {}, score {:.4}, {:?})",
            best.position,
            best.index,
            best.score,
            config.strategy
        );

        if config.move_to_best {
            routine.check_cancelled()?;
            routine.move_to(StageTarget::z(best.position))?;
        }

        Ok(FocusResult {
            position: best.position,
            index: best.index,
            score: best.score,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::mock::{DeviceLog, MockCamera, MockIllumination, MockStage};
    use ndarray::Array2;
    use shared::PixelBuffer;

    /// Frame whose normalized variance equals `score`
    ///
    /// Half the pixels at `m - s`, half at `m + s` gives variance `s^2`,
    /// so `s = sqrt(score * m)`.
    fn frame_with_score(score: f64) -> PixelBuffer {
        let mean = 1000.0;
        let s = (score * mean).sqrt();
        PixelBuffer::from(Array2::from_shape_fn((4, 4), |(y, _)| {
            if y % 2 == 0 {
                (mean - s).round() as u16
            } else {
                (mean + s).round() as u16
            }
        }))
    }

    #[test]
    fn test_dark_sweep_has_no_valid_focus() {
        let log = DeviceLog::default();
        let dark = PixelBuffer::from(Array2::<u16>::zeros((4, 4)));
        let ctx = DeviceContext::new(
            MockCamera::repeating(dark, log.clone()),
            MockStage::new(log.clone()),
            MockIllumination::new(log),
        );
        let err = Autofocus::new(ZScanConfig::immediate())
            .focus(&ctx, 0.0, 3.0, 1.0, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, MicroscopeError::NoValidFocus { frames: 4 });
    }

    #[test]
    fn test_minimize_strategy_and_stay_put() {
        let log = DeviceLog::default();
        let frames = [4.0, 2.0, 1.0, 3.0].map(frame_with_score).to_vec();
        let ctx = DeviceContext::new(
            MockCamera::new(frames, log.clone()),
            MockStage::new(log.clone()),
            MockIllumination::new(log.clone()),
        );
        let config = ZScanConfig {
            strategy: FocusStrategy::Minimize,
            move_to_best: false,
            ..ZScanConfig::immediate()
        };
        let result = Autofocus::new(config)
            .focus(&ctx, 20.0, 23.0, 1.0, &CancelToken::new())
            .unwrap();
        assert_eq!(result.index, 2);
        assert_eq!(result.position, 22.0);
        // last move is the sweep restore, not a move to best focus
        assert_eq!(log.moves().last(), Some(&StageTarget::z(20.0)));
    }
}
