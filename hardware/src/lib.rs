//! Device capabilities for the motorised microscope.
//!
//! Routines never talk to a driver directly. They open a [`DeviceSession`]
//! on an explicitly constructed [`DeviceContext`], which owns one camera,
//! one stage and one illumination source and refuses a second concurrent
//! session.
//!
//! # Features
//! - `sim` (default) - [`sim::SimulatedMicroscope`], a rendered specimen
//!   behind a stage with a known stage-to-pixel mapping

pub mod camera;
pub mod context;
pub mod error;
pub mod illumination;
pub mod mock;
pub mod stage;

#[cfg(feature = "sim")]
pub mod sim;

pub use camera::{Camera, Capture};
pub use context::{DeviceContext, DeviceSession};
pub use error::DeviceError;
pub use illumination::Illumination;
pub use stage::{Stage, StagePosition, StageTarget};
