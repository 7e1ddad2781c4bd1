//! Per-axis cubic stage response and its numerical inverse
//!
//! Calibration samples are re-expressed in stage units through the
//! calibrated transform, giving for each axis the effective displacement
//! the stage produced for a commanded one. Each axis is fit with
//! `effective = p * commanded^3 + q * commanded + r`. `compensate` finds
//! the command whose modelled effect is the requested displacement.

use meter_math::{curve_fit, minimize, CurveFitConfig, NelderMeadConfig};
use serde::{Deserialize, Serialize};
use shared::AffineTransform;

use super::calibrator::CalibrationSample;
use crate::config::CompensatorConfig;
use crate::error::{MicroscopeError, Result};

/// Distinct commanded values needed per axis for the three-term model
const MIN_DISTINCT_COMMANDS: usize = 3;

/// `p * x^3 + q * x + r`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisResponse {
    pub p: f64,
    pub q: f64,
    pub r: f64,
    /// RMS residual of the fit in stage units
    pub rms: f64,
}

impl AxisResponse {
    pub fn eval(&self, commanded: f64) -> f64 {
        self.p * commanded.powi(3) + self.q * commanded + self.r
    }

    fn fit(commanded: &[f64], effective: &[f64], config: &CurveFitConfig) -> Result<Self> {
        let mut distinct: Vec<f64> = commanded.to_vec();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        if distinct.len() < MIN_DISTINCT_COMMANDS {
            return Err(MicroscopeError::InsufficientCalibrationData(format!(
                "cubic response needs {MIN_DISTINCT_COMMANDS} distinct commands per axis, got {}",
                distinct.len()
            )));
        }

        let fit = curve_fit(
            |x, p| p[0] * x.powi(3) + p[1] * x + p[2],
            commanded,
            effective,
            &[0.0, 1.0, 0.0],
            config,
        )?;
        Ok(Self {
            p: fit.params[0],
            q: fit.params[1],
            r: fit.params[2],
            rms: fit.rms(commanded.len()),
        })
    }
}

/// Fitted response of both stage axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompensationModel {
    pub x: AxisResponse,
    pub y: AxisResponse,
}

impl CompensationModel {
    /// Fit from commanded and effective stage deltas
    pub fn fit(
        commanded: &[(f64, f64)],
        effective: &[(f64, f64)],
        config: &CompensatorConfig,
    ) -> Result<Self> {
        let fit_config = CurveFitConfig {
            max_iterations: config.max_fit_iterations,
            ..Default::default()
        };
        let cx: Vec<f64> = commanded.iter().map(|c| c.0).collect();
        let cy: Vec<f64> = commanded.iter().map(|c| c.1).collect();
        let ex: Vec<f64> = effective.iter().map(|e| e.0).collect();
        let ey: Vec<f64> = effective.iter().map(|e| e.1).collect();

        Ok(Self {
            x: AxisResponse::fit(&cx, &ex, &fit_config)?,
            y: AxisResponse::fit(&cy, &ey, &fit_config)?,
        })
    }

    /// Modelled effective displacement for a command
    pub fn predict(&self, commanded_dx: f64, commanded_dy: f64) -> (f64, f64) {
        (self.x.eval(commanded_dx), self.y.eval(commanded_dy))
    }
}

pub struct MovementCompensator {
    config: CompensatorConfig,
    model: Option<CompensationModel>,
}

impl MovementCompensator {
    pub fn new(config: CompensatorConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    /// Compensator with an already fitted model
    pub fn with_model(config: CompensatorConfig, model: CompensationModel) -> Self {
        Self {
            config,
            model: Some(model),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&CompensationModel> {
        self.model.as_ref()
    }

    /// Replace the model with one fit to calibration samples
    ///
    /// On failure the previous model is kept.
    pub fn fit(
        &mut self,
        samples: &[CalibrationSample],
        transform: &AffineTransform,
    ) -> Result<&CompensationModel> {
        let commanded: Vec<(f64, f64)> = samples.iter().map(|s| s.commanded).collect();
        let effective = samples
            .iter()
            .map(|s| transform.pixel_to_stage(s.measured.0, s.measured.1))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let model = CompensationModel::fit(&commanded, &effective, &self.config)?;
        log::info!(
            "compensator: x = {:.3e} c^3 + {:.4} c + {:.4} (rms {:.3}), y = {:.3e} c^3 + {:.4} c + {:.4} (rms {:.3})",
            model.x.p,
            model.x.q,
            model.x.r,
            model.x.rms,
            model.y.p,
            model.y.q,
            model.y.r,
            model.y.rms
        );
        let model = self.model.insert(model);
        Ok(&*model)
    }

    /// Stage command expected to produce the effective displacement `(target_dx, target_dy)`
    ///
    /// # Errors
    /// * `NotCalibrated` - no model has been fit
    pub fn compensate(&self, target_dx: f64, target_dy: f64) -> Result<(f64, f64)> {
        let model = self.model.as_ref().ok_or(MicroscopeError::NotCalibrated)?;

        let objective = |c: &[f64]| {
            (model.x.eval(c[0]) - target_dx).powi(2) + (model.y.eval(c[1]) - target_dy).powi(2)
        };
        let nm_config = NelderMeadConfig {
            x_tolerance: self.config.solve_tolerance,
            f_tolerance: self.config.solve_tolerance * self.config.solve_tolerance,
            ..Default::default()
        };
        let best = minimize(objective, &[target_dx, target_dy], &nm_config);
        if !best.converged {
            log::warn!(
                "compensation for ({target_dx:.3}, {target_dy:.3}) stopped after {} iterations, residual {:.3e}",
                best.iterations,
                best.value
            );
        }
        Ok((best.x[0], best.x[1]))
    }
}
