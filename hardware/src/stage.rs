//! Stage capability

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Absolute stage position in physical units (micrometres for x/y, focus
/// units for z)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StagePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl StagePosition {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for StagePosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Absolute move request; axes left as `None` do not move
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StageTarget {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl StageTarget {
    pub fn xy(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: None,
        }
    }

    pub fn z(z: f64) -> Self {
        Self {
            z: Some(z),
            ..Default::default()
        }
    }

    /// Position reached from `from` once this target is applied
    pub fn resolve(&self, from: StagePosition) -> StagePosition {
        StagePosition {
            x: self.x.unwrap_or(from.x),
            y: self.y.unwrap_or(from.y),
            z: self.z.unwrap_or(from.z),
        }
    }
}

/// Interface for a motorised stage
///
/// `move_to` returns once the commanded motion has completed; settling is
/// the caller's explicit wait.
pub trait Stage: Send {
    fn move_to(&mut self, target: StageTarget) -> Result<(), DeviceError>;

    fn position(&mut self) -> Result<StagePosition, DeviceError>;
}
