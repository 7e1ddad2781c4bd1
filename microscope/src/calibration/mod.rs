//! Pixel/stage calibration and stage response compensation

pub mod calibrator;
pub mod compensator;
pub mod movements;

pub use calibrator::{
    fit_transform, Calibration, CalibrationModel, CalibrationSample, CoordinateCalibrator,
    RegistrationMethod,
};
pub use compensator::{AxisResponse, CompensationModel, MovementCompensator};
pub use movements::MovementPlan;
