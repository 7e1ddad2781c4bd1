//! Camera capability

use std::time::Duration;

use shared::{CaptureKind, ImageSize, PixelBuffer};

use crate::error::DeviceError;

/// One frame with its capture tag
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub buffer: PixelBuffer,
    pub kind: CaptureKind,
    /// Sequence number assigned by the camera, starting at 1
    pub frame_number: u64,
}

/// Interface for a frame source
///
/// `capture` blocks until a frame is ready. The capture kind is fixed when
/// the camera is constructed so callers never inspect the concrete type.
pub trait Camera: Send {
    fn capture(&mut self) -> Result<Capture, DeviceError>;

    fn set_exposure(&mut self, exposure: Duration) -> Result<(), DeviceError>;

    fn exposure(&self) -> Duration;

    fn frame_size(&self) -> ImageSize;

    fn capture_kind(&self) -> CaptureKind;

    fn name(&self) -> &str;
}
