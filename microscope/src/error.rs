//! Error taxonomy for the microscope routines

use hardware::{DeviceError, StagePosition};
use meter_math::CurveFitError;
use shared::{RegistrationError, TransformError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MicroscopeError {
    #[error("{operation}: no usable frames from {attempted} positions (stage at {})", describe(.position))]
    Acquisition {
        operation: String,
        attempted: usize,
        position: Option<StagePosition>,
    },

    #[error("no scorable frame among {frames} captured")]
    NoValidFocus { frames: usize },

    #[error("insufficient calibration data: {0}")]
    InsufficientCalibrationData(String),

    #[error("calibration transform is singular (determinant {determinant:e})")]
    SingularTransform { determinant: f64 },

    #[error("insufficient feature matches: found {found}, need {required}")]
    InsufficientFeatureMatches { found: usize, required: usize },

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("movement compensator has not been fit")]
    NotCalibrated,

    #[error("target lost on iteration {iteration}: nothing within {radius:.1} px of ({expected_x:.1}, {expected_y:.1})")]
    CellLost {
        iteration: usize,
        expected_x: f64,
        expected_y: f64,
        radius: f64,
    },

    #[error("{operation}: device failure (stage at {}): {source}", describe(.position))]
    Device {
        operation: String,
        position: Option<StagePosition>,
        #[source]
        source: DeviceError,
    },

    #[error("cannot start {requested}: devices in use by {active}")]
    DeviceBusy { requested: String, active: String },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("model fit failed: {0}")]
    Fit(String),

    #[error("config file: {0}")]
    Config(String),
}

fn describe(position: &Option<StagePosition>) -> String {
    position.map_or_else(|| "unknown".to_string(), |p| p.to_string())
}

impl MicroscopeError {
    /// Wrap a device failure with the routine name and last known position
    pub fn device(operation: &str, position: Option<StagePosition>, source: DeviceError) -> Self {
        match source {
            DeviceError::Busy { requested, active } => Self::DeviceBusy { requested, active },
            source => Self::Device {
                operation: operation.to_string(),
                position,
                source,
            },
        }
    }
}

impl From<RegistrationError> for MicroscopeError {
    fn from(e: RegistrationError) -> Self {
        match e {
            RegistrationError::InsufficientFeatureMatches { found, required } => {
                Self::InsufficientFeatureMatches { found, required }
            }
            other => Self::Registration(other.to_string()),
        }
    }
}

impl From<TransformError> for MicroscopeError {
    fn from(e: TransformError) -> Self {
        match e {
            TransformError::Singular { determinant } => Self::SingularTransform { determinant },
            TransformError::InsufficientPoints { .. } => {
                Self::InsufficientCalibrationData(e.to_string())
            }
            TransformError::SolveFailed(msg) => Self::Fit(msg),
        }
    }
}

impl From<CurveFitError> for MicroscopeError {
    fn from(e: CurveFitError) -> Self {
        Self::Fit(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MicroscopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_device_error_becomes_device_busy() {
        let err = MicroscopeError::device(
            "calibrate",
            None,
            DeviceError::Busy {
                requested: "calibrate".to_string(),
                active: "focus".to_string(),
            },
        );
        assert_eq!(
            err,
            MicroscopeError::DeviceBusy {
                requested: "calibrate".to_string(),
                active: "focus".to_string()
            }
        );
    }

    #[test]
    fn test_device_error_message_carries_context() {
        let err = MicroscopeError::device(
            "z-scan",
            Some(StagePosition::new(1.0, 2.0, 1003.0)),
            DeviceError::Motion("stalled".to_string()),
        );
        let msg = err.to_string();
        assert!(msg.contains("z-scan"));
        assert!(msg.contains("1003.000"));
        assert!(msg.contains("stalled"));
    }

    #[test]
    fn test_registration_errors_map_onto_taxonomy() {
        let err: MicroscopeError = RegistrationError::InsufficientFeatureMatches {
            found: 2,
            required: 4,
        }
        .into();
        assert_eq!(
            err,
            MicroscopeError::InsufficientFeatureMatches {
                found: 2,
                required: 4
            }
        );

        let err: MicroscopeError = RegistrationError::FitFailed("no consensus".into()).into();
        assert!(matches!(err, MicroscopeError::Registration(_)));
    }
}
