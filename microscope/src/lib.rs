//! Microscope autofocus, stage calibration and cell acquisition.
//!
//! Every routine borrows an explicitly constructed
//! [`hardware::DeviceContext`] and holds an exclusive session on it for its
//! whole run, so a second routine started meanwhile fails with
//! [`MicroscopeError::DeviceBusy`].
//!
//! - [`autofocus`]: focus-axis sweep, normalized-variance scoring and
//!   best-focus selection
//! - [`calibration`]: pixel/stage transform from measured image motion and
//!   the cubic stage response compensator
//! - [`acquisition`]: damped closed-loop centring of a target with a
//!   pluggable relocation strategy

pub mod acquisition;
pub mod autofocus;
pub mod calibration;
pub mod cancel;
pub mod config;
pub mod error;
mod routine;

pub use acquisition::{AcquisitionOutcome, CellAcquisition, TargetPoint};
pub use autofocus::{Autofocus, FocusResult, FocusStrategy};
pub use calibration::{Calibration, CoordinateCalibrator, MovementCompensator};
pub use cancel::CancelToken;
pub use config::BenchConfig;
pub use error::{MicroscopeError, Result};
