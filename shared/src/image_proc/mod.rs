//! Image buffers and the image processing used for registration

pub mod features;
pub mod frame;
pub mod matcher;
pub mod overlay;
pub mod phase_correlation;
pub mod stats;

pub use frame::{CaptureKind, PixelBuffer};
pub use stats::{PixelStats, StatsError};
