//! Shared building blocks for the microscope alignment crates.
//!
//! - [`image_proc`]: pixel buffers, statistics, feature detection and matching,
//!   phase correlation and overlays
//! - [`registration`]: displacement estimation between two frames
//! - [`affine_transform`]: the stage/pixel calibration transform
//! - [`test_patterns`]: deterministic synthetic specimens for tests and simulation

pub mod affine_transform;
pub mod image_proc;
pub mod image_size;
pub mod registration;
pub mod test_patterns;

pub use affine_transform::{AffineTransform, TransformError};
pub use image_proc::frame::{CaptureKind, PixelBuffer};
pub use image_size::ImageSize;
pub use registration::{Displacement, DisplacementEstimator, RegistrationError};
