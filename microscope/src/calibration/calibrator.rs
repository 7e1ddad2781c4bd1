//! Stage-to-pixel calibration from measured image displacements
//!
//! Each planned stage delta is commanded from the calibration origin. The
//! image motion it causes is measured against a reference frame taken just
//! before the move, and the stage returns to the origin before the next one.
//!
//! The similarity model reads the image of the stage x axis directly:
//! ```text
//! x-only move (sx, 0):  a = dx / sx,  c = dy / sx
//! y-only move (0, sy):  a = dy / sy,  c = -dx / sy
//! theta = atan2(c, a),  scale = hypot(a, c)
//! [[a, -scale sin(theta)], [c, scale cos(theta)]]
//! ```
//! averaged over every axis-isolated sample.

use hardware::{DeviceContext, StageTarget};
use serde::{Deserialize, Serialize};
use shared::affine_transform::{estimate_linear_transform, PointCorrespondence};
use shared::image_proc::phase_correlation::CropMode;
use shared::registration::{FeatureRegistration, PhaseCorrelation};
use shared::{AffineTransform, DisplacementEstimator};

use super::movements::MovementPlan;
use crate::cancel::CancelToken;
use crate::config::CalibrationConfig;
use crate::error::{MicroscopeError, Result};
use crate::routine::Routine;

const OPERATION: &str = "calibration";

/// Stage deltas smaller than this count as zero when classifying samples
const AXIS_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CalibrationModel {
    /// Rotation plus uniform scale from axis-isolated moves
    #[default]
    Similarity,
    /// Least-squares 2x2 over every sample, for non-orthogonal stage axes
    FullLinear,
}

/// How image displacement is measured during calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegistrationMethod {
    /// Feature matching with a RANSAC homography (measures rotation too)
    #[default]
    Features,
    /// Translation-only phase correlation
    PhaseCorrelation(CropMode),
}

impl RegistrationMethod {
    pub fn estimator(&self) -> Box<dyn DisplacementEstimator> {
        match self {
            RegistrationMethod::Features => Box::new(FeatureRegistration::default()),
            RegistrationMethod::PhaseCorrelation(crop) => Box::new(PhaseCorrelation::new(*crop)),
        }
    }
}

/// One commanded move and the image motion it produced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Stage delta `(dx, dy)` from the origin
    pub commanded: (f64, f64),
    /// Pixel displacement `(dx, dy)` of the image content
    pub measured: (f64, f64),
    pub rotation_deg: f64,
}

impl CalibrationSample {
    pub fn new(commanded: (f64, f64), measured: (f64, f64), rotation_deg: f64) -> Self {
        Self {
            commanded,
            measured,
            rotation_deg,
        }
    }

    fn correspondence(&self) -> PointCorrespondence {
        PointCorrespondence::new(
            self.commanded.0,
            self.commanded.1,
            self.measured.0,
            self.measured.1,
        )
    }

    /// `(a, c)` estimate from an axis-isolated move, `None` for diagonal or zero moves
    fn x_axis_image(&self) -> Option<(f64, f64)> {
        let (sx, sy) = self.commanded;
        let (dx, dy) = self.measured;
        match (sx.abs() > AXIS_EPSILON, sy.abs() > AXIS_EPSILON) {
            (true, false) => Some((dx / sx, dy / sx)),
            (false, true) => Some((dy / sy, -dx / sy)),
            _ => None,
        }
    }
}

/// Result of a calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub transform: AffineTransform,
    pub model: CalibrationModel,
    pub samples: Vec<CalibrationSample>,
}

impl Calibration {
    /// Stage units per pixel of image motion
    pub fn stage_units_per_pixel(&self) -> f64 {
        self.transform.stage_units_per_pixel()
    }
}

/// Fit the stage-to-pixel transform to recorded samples
///
/// # Errors
/// * `InsufficientCalibrationData` - no axis-isolated sample (similarity) or
///   commanded deltas that do not span the plane (full linear)
/// * `SingularTransform` - the fitted matrix has a zero determinant
pub fn fit_transform(samples: &[CalibrationSample], model: CalibrationModel) -> Result<AffineTransform> {
    let points: Vec<PointCorrespondence> = samples.iter().map(|s| s.correspondence()).collect();

    let mut transform = match model {
        CalibrationModel::Similarity => {
            let estimates: Vec<(f64, f64)> =
                samples.iter().filter_map(|s| s.x_axis_image()).collect();
            if estimates.is_empty() {
                return Err(MicroscopeError::InsufficientCalibrationData(format!(
                    "none of {} samples is an axis-isolated move",
                    samples.len()
                )));
            }
            let n = estimates.len() as f64;
            let a = estimates.iter().map(|e| e.0).sum::<f64>() / n;
            let c = estimates.iter().map(|e| e.1).sum::<f64>() / n;
            AffineTransform::from_similarity(a, c, samples.len())?
        }
        CalibrationModel::FullLinear => estimate_linear_transform(&points)?,
    };

    transform.rms_error = Some(transform.residual_rms(&points));
    Ok(transform)
}

pub struct CoordinateCalibrator {
    config: CalibrationConfig,
    estimator: Box<dyn DisplacementEstimator>,
}

impl CoordinateCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        let estimator = config.registration.estimator();
        Self { config, estimator }
    }

    pub fn with_estimator(
        config: CalibrationConfig,
        estimator: impl DisplacementEstimator + 'static,
    ) -> Self {
        Self {
            config,
            estimator: Box::new(estimator),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Calibrate with the configured movement set
    pub fn calibrate(&self, devices: &DeviceContext, cancel: &CancelToken) -> Result<Calibration> {
        let plan = MovementPlan::new(self.config.movements.clone());
        self.calibrate_with(devices, &plan, cancel)
    }

    /// Calibrate with an explicit movement set
    ///
    /// The stage is back at the origin and the lamp in its previous state
    /// whenever this returns, unless the stage itself failed.
    ///
    /// # Errors
    /// * `InsufficientFeatureMatches` / `Registration` - a displacement could not be measured
    /// * `InsufficientCalibrationData` / `SingularTransform` - see [`fit_transform`]
    /// * `Cancelled`, `Device`, `DeviceBusy`
    pub fn calibrate_with(
        &self,
        devices: &DeviceContext,
        plan: &MovementPlan,
        cancel: &CancelToken,
    ) -> Result<Calibration> {
        let mut routine = Routine::open(devices, OPERATION, cancel)?;
        let origin = routine.position();
        log::info!(
            "calibrating {} moves from ({:.3}, {:.3})",
            plan.len(),
            origin.x,
            origin.y
        );

        let outcome = self.collect_samples(&mut routine, plan);
        let returned = routine
            .move_to(StageTarget::xy(origin.x, origin.y))
            .and(routine.restore_illumination());

        let samples = match (outcome, returned) {
            (Ok(samples), Ok(())) => samples,
            (Err(e), returned) => {
                if let Err(cleanup) = returned {
                    log::error!("return to calibration origin failed: {cleanup}");
                }
                return Err(e);
            }
            (Ok(_), Err(e)) => return Err(e),
        };

        let transform = fit_transform(&samples, self.config.model)?;
        log::info!(
            "calibration: rotation {:.3} deg, scale {:.4} px/unit ({:.4} units/px), rms {:.3} px",
            transform.rotation_degrees(),
            transform.scale,
            transform.stage_units_per_pixel(),
            transform.rms_error.unwrap_or_default()
        );

        Ok(Calibration {
            transform,
            model: self.config.model,
            samples,
        })
    }

    fn collect_samples(
        &self,
        routine: &mut Routine<'_>,
        plan: &MovementPlan,
    ) -> Result<Vec<CalibrationSample>> {
        let origin = routine.position();
        let settle = self.config.settle();
        let mut samples = Vec::with_capacity(plan.len());

        routine.illuminate()?;
        routine.settle(settle);

        for &(dx, dy) in &plan.moves {
            routine.check_cancelled()?;
            let reference = routine.capture()?;

            routine.move_to(StageTarget::xy(origin.x + dx, origin.y + dy))?;
            routine.settle(settle);
            let moved = routine.capture()?;

            let displacement = self.estimator.estimate(&reference.buffer, &moved.buffer)?;
            log::debug!(
                "move ({dx}, {dy}) -> image ({:.2}, {:.2}) px, rotation {:.3} deg, {} inliers",
                displacement.dx,
                displacement.dy,
                displacement.rotation_deg,
                displacement.support
            );
            samples.push(CalibrationSample::new(
                (dx, dy),
                (displacement.dx, displacement.dy),
                displacement.rotation_deg,
            ));

            routine.move_to(StageTarget::xy(origin.x, origin.y))?;
            routine.settle(settle);
        }
        Ok(samples)
    }
}
