//! Bench configuration
//!
//! Defaults reproduce the constants the bench has always run with. Delays
//! are stored as integer milliseconds so the JSON stays hand-editable.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared::image_proc::overlay::MarkerStyle;

use crate::autofocus::FocusStrategy;
use crate::calibration::{CalibrationModel, RegistrationMethod};
use crate::error::{MicroscopeError, Result};

/// Order of the two cleanup steps at the end of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RestoreOrder {
    /// Return the focus axis to `start`, then switch the lamp off
    #[default]
    ReturnThenDarken,
    /// Switch the lamp off, then return the focus axis
    DarkenThenReturn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZScanConfig {
    /// Wait after the lamp comes on
    pub settle_delay_ms: u64,
    /// Frames discarded while the lamp warms up
    pub warmup_captures: usize,
    pub warmup_interval_ms: u64,
    /// Exposure applied before the sweep, if any
    pub exposure_ms: Option<u64>,
    /// Whether a position landing exactly on `end` is captured
    pub end_inclusive: bool,
    pub restore_order: RestoreOrder,
    pub strategy: FocusStrategy,
    /// Leave the focus axis at the selected position after autofocus
    pub move_to_best: bool,
}

impl Default for ZScanConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 4000,
            warmup_captures: 4,
            warmup_interval_ms: 600,
            exposure_ms: Some(15),
            end_inclusive: true,
            restore_order: RestoreOrder::default(),
            strategy: FocusStrategy::default(),
            move_to_best: true,
        }
    }
}

impl ZScanConfig {
    /// No waits and no warm-up frames, for simulated and scripted devices
    pub fn immediate() -> Self {
        Self {
            settle_delay_ms: 0,
            warmup_captures: 0,
            warmup_interval_ms: 0,
            ..Default::default()
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn warmup_interval(&self) -> Duration {
        Duration::from_millis(self.warmup_interval_ms)
    }

    pub fn exposure(&self) -> Option<Duration> {
        self.exposure_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Stage deltas `(dx, dy)` commanded from the origin, one sample each
    pub movements: Vec<(f64, f64)>,
    pub settle_ms: u64,
    pub model: CalibrationModel,
    pub registration: RegistrationMethod,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            movements: vec![(10.0, 0.0), (0.0, 10.0), (20.0, 0.0), (0.0, 20.0)],
            settle_ms: 1000,
            model: CalibrationModel::default(),
            registration: RegistrationMethod::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompensatorConfig {
    /// Refine acquisition moves through the cubic model when one is fit
    pub enabled: bool,
    pub max_fit_iterations: usize,
    /// Stage-unit tolerance of the inverse solve
    pub solve_tolerance: f64,
}

impl Default for CompensatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_fit_iterations: 200,
            solve_tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub max_iterations: usize,
    /// Converged once the target is this close to the frame centre, pixels
    pub tolerance_px: f64,
    /// Fraction of each correction after the first that is applied
    pub damping: f64,
    /// Relocation search radius around the expected position, pixels
    pub search_radius_px: f64,
    pub settle_ms: u64,
    pub marker: MarkerStyle,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            tolerance_px: 2.0,
            damping: 0.5,
            search_radius_px: 50.0,
            settle_ms: 1000,
            marker: MarkerStyle::default(),
        }
    }
}

impl AcquisitionConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// # Errors
    /// * `InvalidConfig` - damping outside (0, 1], no iterations, or a
    ///   non-positive tolerance or radius
    pub fn validate(&self) -> Result<()> {
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(MicroscopeError::InvalidConfig(format!(
                "damping must be in (0, 1], got {}",
                self.damping
            )));
        }
        if self.max_iterations == 0 {
            return Err(MicroscopeError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.tolerance_px <= 0.0 || self.search_radius_px <= 0.0 {
            return Err(MicroscopeError::InvalidConfig(format!(
                "tolerance ({}) and search radius ({}) must be positive",
                self.tolerance_px, self.search_radius_px
            )));
        }
        Ok(())
    }
}

/// Everything the bench needs in one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub zscan: ZScanConfig,
    pub calibration: CalibrationConfig,
    pub compensator: CompensatorConfig,
    pub acquisition: AcquisitionConfig,
}

impl BenchConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| MicroscopeError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| MicroscopeError::Config(format!("{}: {e}", path.display())))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| MicroscopeError::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| MicroscopeError::Config(format!("{}: {e}", path.display())))
    }
}
