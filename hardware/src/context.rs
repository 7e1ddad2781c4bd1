//! Explicit ownership of the microscope devices
//!
//! The application builds one [`DeviceContext`] and hands out references to
//! it. Each scan, calibration or acquisition opens a [`DeviceSession`] for its
//! whole duration; while a session is open every other request fails fast
//! with [`DeviceError::Busy`] instead of interleaving device commands.

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use shared::{CaptureKind, ImageSize};

use crate::camera::{Camera, Capture};
use crate::error::DeviceError;
use crate::illumination::Illumination;
use crate::stage::{Stage, StagePosition, StageTarget};

struct Devices {
    camera: Box<dyn Camera>,
    stage: Box<dyn Stage>,
    illumination: Box<dyn Illumination>,
    /// Operation holding the session, for Busy reports
    active: Option<String>,
}

/// Owner of the camera, stage and illumination
pub struct DeviceContext {
    devices: Mutex<Devices>,
    active: Mutex<Option<String>>,
}

impl DeviceContext {
    pub fn new(
        camera: impl Camera + 'static,
        stage: impl Stage + 'static,
        illumination: impl Illumination + 'static,
    ) -> Self {
        Self {
            devices: Mutex::new(Devices {
                camera: Box::new(camera),
                stage: Box::new(stage),
                illumination: Box::new(illumination),
                active: None,
            }),
            active: Mutex::new(None),
        }
    }

    /// Open an exclusive session for `operation`
    ///
    /// # Errors
    /// * `DeviceError::Busy` - another session is open
    pub fn session(&self, operation: &str) -> Result<DeviceSession<'_>, DeviceError> {
        let mut guard = match self.devices.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                let active = self
                    .active
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(DeviceError::Busy {
                    requested: operation.to_string(),
                    active,
                });
            }
            // A routine panicked mid-session; the devices themselves are still usable
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        guard.active = Some(operation.to_string());
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(operation.to_string());
        log::debug!("session opened: {operation}");

        Ok(DeviceSession {
            devices: guard,
            active: &self.active,
        })
    }

    /// True while a session is open
    pub fn is_busy(&self) -> bool {
        matches!(self.devices.try_lock(), Err(TryLockError::WouldBlock))
    }
}

/// Exclusive access to the devices for one routine
pub struct DeviceSession<'a> {
    devices: MutexGuard<'a, Devices>,
    active: &'a Mutex<Option<String>>,
}

impl DeviceSession<'_> {
    pub fn operation(&self) -> &str {
        self.devices.active.as_deref().unwrap_or("")
    }

    pub fn camera(&mut self) -> &mut dyn Camera {
        self.devices.camera.as_mut()
    }

    pub fn stage(&mut self) -> &mut dyn Stage {
        self.devices.stage.as_mut()
    }

    pub fn illumination(&mut self) -> &mut dyn Illumination {
        self.devices.illumination.as_mut()
    }

    pub fn capture(&mut self) -> Result<Capture, DeviceError> {
        self.devices.camera.capture()
    }

    pub fn frame_size(&self) -> ImageSize {
        self.devices.camera.frame_size()
    }

    pub fn capture_kind(&self) -> CaptureKind {
        self.devices.camera.capture_kind()
    }

    pub fn set_exposure(&mut self, exposure: Duration) -> Result<(), DeviceError> {
        self.devices.camera.set_exposure(exposure)
    }

    pub fn move_to(&mut self, target: StageTarget) -> Result<(), DeviceError> {
        self.devices.stage.move_to(target)
    }

    pub fn position(&mut self) -> Result<StagePosition, DeviceError> {
        self.devices.stage.position()
    }

    pub fn lamp_on(&mut self) -> Result<(), DeviceError> {
        self.devices.illumination.set_on()
    }

    pub fn lamp_off(&mut self) -> Result<(), DeviceError> {
        self.devices.illumination.set_off()
    }

    /// Blocking settle wait
    pub fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

impl Drop for DeviceSession<'_> {
    fn drop(&mut self) {
        log::debug!("session closed: {}", self.operation());
        self.devices.active = None;
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
