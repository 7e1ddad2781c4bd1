//! Closed-loop centring of a target
//!
//! Each iteration converts the target's offset from the frame centre into a
//! stage move through the inverse calibration (optionally refined by the
//! movement compensator), moves, captures, and finds the target again. The
//! first correction is applied in full; later ones are scaled by the
//! damping factor so calibration error does not make the loop oscillate.
//!
//! ```text
//! offset = centre - target
//! stage  = compensate(T^-1 * gain * offset)      gain = 1, then damping
//! ```

pub mod relocate;

pub use relocate::{
    FullRedetection, LocalPeakSearch, TargetIdentifier, TargetPoint, TargetRelocator,
};

use hardware::{DeviceContext, StageTarget};
use nalgebra::Vector2;
use shared::image_proc::overlay::draw_center_marker;
use shared::{AffineTransform, PixelBuffer};

use crate::calibration::MovementCompensator;
use crate::cancel::CancelToken;
use crate::config::AcquisitionConfig;
use crate::error::{MicroscopeError, Result};
use crate::routine::Routine;

const OPERATION: &str = "acquisition";

/// One move of the loop and what it achieved
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionAttempt {
    pub iteration: usize,
    /// Stage delta commanded this iteration
    pub stage_delta: (f64, f64),
    /// Frame captured after the move
    pub image: PixelBuffer,
    /// Where the target was found in that frame
    pub target: TargetPoint,
    /// `centre - target` after the move
    pub pixel_offset: (f64, f64),
    pub residual_px: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionOutcome {
    /// Last frame, with the centre marker drawn if the loop converged
    pub image: PixelBuffer,
    pub residual_px: f64,
    pub converged: bool,
    pub target: TargetPoint,
    pub attempts: Vec<AcquisitionAttempt>,
}

pub struct CellAcquisition {
    transform: AffineTransform,
    compensator: Option<MovementCompensator>,
    config: AcquisitionConfig,
}

impl CellAcquisition {
    pub fn new(transform: AffineTransform, config: AcquisitionConfig) -> Self {
        Self {
            transform,
            compensator: None,
            config,
        }
    }

    /// Refine every stage move through a fitted compensator
    pub fn with_compensator(mut self, compensator: MovementCompensator) -> Self {
        self.compensator = Some(compensator);
        self
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Stage delta for a desired image motion
    fn stage_delta(&self, pixel: Vector2<f64>) -> Result<(f64, f64)> {
        let (sx, sy) = self.transform.pixel_to_stage(pixel.x, pixel.y)?;
        match &self.compensator {
            Some(compensator) => compensator.compensate(sx, sy),
            None => Ok((sx, sy)),
        }
    }

    /// Centre `target` in the field of view
    ///
    /// Returns normally when the iteration cap is reached without
    /// converging; the outcome then has `converged == false` and no marker.
    ///
    /// # Errors
    /// * `CellLost` - the relocator found nothing within the search radius
    /// * `InvalidConfig` - see [`AcquisitionConfig::validate`]
    /// * `NotCalibrated` - a compensator was attached without a fitted model
    /// * `Cancelled`, `Device`, `DeviceBusy`
    pub fn acquire(
        &self,
        devices: &DeviceContext,
        target: TargetPoint,
        relocator: &dyn TargetRelocator,
        cancel: &CancelToken,
    ) -> Result<AcquisitionOutcome> {
        self.config.validate()?;
        let mut routine = Routine::open(devices, OPERATION, cancel)?;
        let outcome = routine
            .illuminate()
            .and_then(|()| self.centre(&mut routine, target, relocator));
        let restored = routine.restore_illumination();
        match (outcome, restored) {
            (Ok(outcome), restored) => restored.map(|()| outcome),
            (Err(e), restored) => {
                if let Err(cleanup) = restored {
                    log::error!("lamp restore failed after error: {cleanup}");
                }
                Err(e)
            }
        }
    }

    fn centre(
        &self,
        routine: &mut Routine<'_>,
        target: TargetPoint,
        relocator: &dyn TargetRelocator,
    ) -> Result<AcquisitionOutcome> {
        routine.settle(self.config.settle());
        let (cx, cy) = routine.frame_size().center();
        let centre = Vector2::new(cx, cy);

        let mut current = target;
        let mut offset = centre - Vector2::new(current.x, current.y);
        log::info!(
            "acquiring target at ({:.1}, {:.1}), offset {:.1} px",
            current.x,
            current.y,
            offset.norm()
        );

        let mut attempts: Vec<AcquisitionAttempt> = Vec::new();
        let mut converged = offset.norm() < self.config.tolerance_px;
        let mut image = routine.capture()?.buffer;

        for iteration in 0..self.config.max_iterations {
            if converged {
                break;
            }
            routine.check_cancelled()?;

            let gain = if iteration == 0 { 1.0 } else { self.config.damping };
            let desired = offset * gain;
            let (sdx, sdy) = self.stage_delta(desired)?;
            let position = routine.position();
            routine.move_to(StageTarget::xy(position.x + sdx, position.y + sdy))?;
            routine.settle(self.config.settle());
            let capture = routine.capture()?;

            let expected = (current.x + desired.x, current.y + desired.y);
            let found = relocator
                .relocate(&capture.buffer, expected, self.config.search_radius_px)
                .ok_or(MicroscopeError::CellLost {
                    iteration,
                    expected_x: expected.0,
                    expected_y: expected.1,
                    radius: self.config.search_radius_px,
                })?;

            offset = centre - Vector2::new(found.x, found.y);
            let residual_px = offset.norm();
            log::info!(
                "iteration {iteration}: moved ({sdx:.3}, {sdy:.3}), target at ({:.1}, {:.1}), residual {residual_px:.2} px",
                found.x,
                found.y
            );

            current = found;
            image = capture.buffer;
            attempts.push(AcquisitionAttempt {
                iteration,
                stage_delta: (sdx, sdy),
                image: image.clone(),
                target: found,
                pixel_offset: (offset.x, offset.y),
                residual_px,
            });
            converged = residual_px < self.config.tolerance_px;
        }

        let residual_px = offset.norm();
        if converged {
            draw_center_marker(&mut image, &self.config.marker);
            log::info!(
                "target centred after {} moves, residual {residual_px:.2} px",
                attempts.len()
            );
        } else {
            log::warn!(
                "no convergence after {} moves, residual {residual_px:.2} px",
                attempts.len()
            );
        }

        Ok(AcquisitionOutcome {
            image,
            residual_px,
            converged,
            target: current,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::mock::{DeviceLog, MockCamera, MockIllumination, MockStage};
    use nalgebra::Matrix2;
    use ndarray::Array2;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Returns scripted locations in order, `None` once exhausted
    struct Scripted(RefCell<VecDeque<(f64, f64)>>);

    impl Scripted {
        fn new(points: &[(f64, f64)]) -> Self {
            Self(RefCell::new(points.iter().copied().collect()))
        }
    }

    impl TargetRelocator for Scripted {
        fn relocate(&self, _: &PixelBuffer, _: (f64, f64), _: f64) -> Option<TargetPoint> {
            self.0
                .borrow_mut()
                .pop_front()
                .map(|(x, y)| TargetPoint::new(x, y))
        }
    }

    fn setup() -> (DeviceContext, DeviceLog) {
        let log = DeviceLog::default();
        let frame = PixelBuffer::from(Array2::from_elem((48, 64), 100u16));
        let ctx = DeviceContext::new(
            MockCamera::repeating(frame, log.clone()),
            MockStage::new(log.clone()),
            MockIllumination::new(log.clone()),
        );
        (ctx, log)
    }

    fn config() -> AcquisitionConfig {
        AcquisitionConfig {
            tolerance_px: 1.0,
            settle_ms: 0,
            ..Default::default()
        }
    }

    fn identity() -> AffineTransform {
        AffineTransform::from_matrix(Matrix2::identity(), 0).unwrap()
    }

    #[test]
    fn test_first_move_full_then_damped() {
        let (ctx, log) = setup();
        let relocator = Scripted::new(&[(30.0, 23.0), (31.5, 23.5)]);
        let outcome = CellAcquisition::new(identity(), config())
            .acquire(
                &ctx,
                TargetPoint::new(12.0, 14.0),
                &relocator,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(
            log.moves(),
            vec![StageTarget::xy(20.0, 10.0), StageTarget::xy(21.0, 10.5)]
        );
        assert!(outcome.converged);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.residual_px < 1.0);

        let PixelBuffer::Mono(marked) = &outcome.image else {
            panic!("expected mono frame");
        };
        assert_eq!(marked[[24, 32]], u16::MAX);
        let PixelBuffer::Mono(raw) = &outcome.attempts[1].image else {
            panic!("expected mono frame");
        };
        assert_eq!(raw[[24, 32]], 100);
    }

    #[test]
    fn test_iteration_cap_returns_unmarked() {
        let (ctx, _log) = setup();
        let relocator = Scripted::new(&[(20.0, 20.0); 3]);
        let cfg = AcquisitionConfig {
            max_iterations: 3,
            ..config()
        };
        let outcome = CellAcquisition::new(identity(), cfg)
            .acquire(
                &ctx,
                TargetPoint::new(10.0, 10.0),
                &relocator,
                &CancelToken::new(),
            )
            .unwrap();

        assert!(!outcome.converged);
        assert_eq!(outcome.attempts.len(), 3);
        let PixelBuffer::Mono(image) = &outcome.image else {
            panic!("expected mono frame");
        };
        assert!(image.iter().all(|&v| v == 100));
    }

    #[test]
    fn test_relocation_failure_is_cell_lost() {
        let (ctx, _log) = setup();
        let err = CellAcquisition::new(identity(), config())
            .acquire(
                &ctx,
                TargetPoint::new(2.0, 4.0),
                &Scripted::new(&[]),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            MicroscopeError::CellLost {
                iteration: 0,
                expected_x: 32.0,
                expected_y: 24.0,
                radius: 50.0
            }
        );
    }

    #[test]
    fn test_already_centred_needs_no_move() {
        let (ctx, log) = setup();
        let outcome = CellAcquisition::new(identity(), config())
            .acquire(
                &ctx,
                TargetPoint::new(32.2, 23.9),
                &Scripted::new(&[]),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(outcome.converged);
        assert!(outcome.attempts.is_empty());
        assert!(log.moves().is_empty());
    }

    #[test]
    fn test_uncalibrated_compensator_is_reported() {
        let (ctx, _log) = setup();
        let err = CellAcquisition::new(identity(), config())
            .with_compensator(MovementCompensator::new(Default::default()))
            .acquire(
                &ctx,
                TargetPoint::new(0.0, 0.0),
                &Scripted::new(&[]),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert_eq!(err, MicroscopeError::NotCalibrated);
    }

    #[test]
    fn test_cancelled_before_first_move() {
        let (ctx, log) = setup();
        let token = CancelToken::new();
        token.cancel();
        let err = CellAcquisition::new(identity(), config())
            .acquire(&ctx, TargetPoint::new(0.0, 0.0), &Scripted::new(&[]), &token)
            .unwrap_err();
        assert!(matches!(err, MicroscopeError::Cancelled { .. }));
        assert!(log.moves().is_empty());
    }
}
