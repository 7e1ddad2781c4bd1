//! Device access for a single routine
//!
//! Wraps a [`DeviceSession`] so every device call reports failures as
//! [`MicroscopeError`] with the routine name and the last commanded stage
//! position, and so cancellation is checked in one place.

use std::time::Duration;

use hardware::{Capture, DeviceContext, DeviceError, DeviceSession, StagePosition, StageTarget};
use shared::ImageSize;

use crate::cancel::CancelToken;
use crate::error::{MicroscopeError, Result};

pub(crate) struct Routine<'a> {
    session: DeviceSession<'a>,
    operation: &'static str,
    cancel: &'a CancelToken,
    position: Option<StagePosition>,
    /// Lamp was switched on by this routine and must be switched off again
    lamp_switched: bool,
}

impl<'a> Routine<'a> {
    /// Open an exclusive session and read the starting position
    pub fn open(
        devices: &'a DeviceContext,
        operation: &'static str,
        cancel: &'a CancelToken,
    ) -> Result<Self> {
        let session = devices
            .session(operation)
            .map_err(|e| MicroscopeError::device(operation, None, e))?;
        let mut routine = Self {
            session,
            operation,
            cancel,
            position: None,
            lamp_switched: false,
        };
        let position = routine.session.position().map_err(|e| routine.fail(e))?;
        routine.position = Some(position);
        Ok(routine)
    }

    fn fail(&self, source: DeviceError) -> MicroscopeError {
        MicroscopeError::device(self.operation, self.position, source)
    }

    /// Last commanded stage position
    pub fn position(&self) -> StagePosition {
        self.position.unwrap_or_default()
    }

    pub fn frame_size(&self) -> ImageSize {
        self.session.frame_size()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            log::info!("{} cancelled", self.operation);
            return Err(MicroscopeError::Cancelled {
                operation: self.operation.to_string(),
            });
        }
        Ok(())
    }

    pub fn move_to(&mut self, target: StageTarget) -> Result<()> {
        self.session.move_to(target).map_err(|e| self.fail(e))?;
        self.position = Some(target.resolve(self.position()));
        Ok(())
    }

    pub fn capture(&mut self) -> Result<Capture> {
        self.session.capture().map_err(|e| self.fail(e))
    }

    /// Capture, handing back the raw device error for callers that recover
    pub fn try_capture(&mut self) -> std::result::Result<Capture, DeviceError> {
        self.session.capture()
    }

    pub fn set_exposure(&mut self, exposure: Duration) -> Result<()> {
        self.session.set_exposure(exposure).map_err(|e| self.fail(e))
    }

    pub fn lamp_on(&mut self) -> Result<()> {
        self.session.lamp_on().map_err(|e| self.fail(e))
    }

    pub fn lamp_off(&mut self) -> Result<()> {
        self.session.lamp_off().map_err(|e| self.fail(e))
    }

    /// Switch the lamp on unless it already is
    pub fn illuminate(&mut self) -> Result<()> {
        if !self.session.illumination().is_on() {
            self.lamp_on()?;
            self.lamp_switched = true;
        }
        Ok(())
    }

    /// Undo [`Self::illuminate`]
    pub fn restore_illumination(&mut self) -> Result<()> {
        if std::mem::take(&mut self.lamp_switched) {
            self.lamp_off()?;
        }
        Ok(())
    }

    pub fn settle(&self, delay: Duration) {
        self.session.settle(delay);
    }
}
