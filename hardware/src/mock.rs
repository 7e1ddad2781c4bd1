//! Scripted devices for tests
//!
//! Every mock writes the commands it receives into a shared [`DeviceLog`] so
//! tests can assert the exact order of captures, moves and lamp switches.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use shared::{CaptureKind, ImageSize, PixelBuffer};

use crate::camera::{Camera, Capture};
use crate::error::DeviceError;
use crate::illumination::Illumination;
use crate::stage::{Stage, StagePosition, StageTarget};

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Capture { frame_number: u64 },
    CaptureFailed { attempt: usize },
    SetExposure(Duration),
    Move(StageTarget),
    LampOn,
    LampOff,
}

/// Ordered record of device commands, shared between mocks
#[derive(Debug, Clone, Default)]
pub struct DeviceLog {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl DeviceLog {
    pub fn record(&self, event: DeviceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Stage targets in command order
    pub fn moves(&self) -> Vec<StageTarget> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DeviceEvent::Move(t) => Some(t),
                _ => None,
            })
            .collect()
    }
}

/// Camera returning a scripted list of frames
pub struct MockCamera {
    frames: Vec<PixelBuffer>,
    next: usize,
    repeat_last: bool,
    fail_at: HashSet<usize>,
    attempts: usize,
    frame_count: u64,
    exposure: Duration,
    kind: CaptureKind,
    size: ImageSize,
    log: DeviceLog,
}

impl MockCamera {
    /// Frames are returned in order; capturing past the end is an error
    pub fn new(frames: Vec<PixelBuffer>, log: DeviceLog) -> Self {
        let size = frames
            .first()
            .map(PixelBuffer::size)
            .unwrap_or(ImageSize::from_width_height(0, 0));
        Self {
            frames,
            next: 0,
            repeat_last: false,
            fail_at: HashSet::new(),
            attempts: 0,
            frame_count: 0,
            exposure: Duration::from_millis(15),
            kind: CaptureKind::Image,
            size,
            log,
        }
    }

    /// Always returns the same frame
    pub fn repeating(frame: PixelBuffer, log: DeviceLog) -> Self {
        Self::new(vec![frame], log).with_repeat_last()
    }

    /// Keep returning the last scripted frame once the list is exhausted
    pub fn with_repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Fail the given capture attempts (0-based, counting failures too)
    pub fn with_failures(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.fail_at.extend(attempts);
        self
    }

    pub fn with_kind(mut self, kind: CaptureKind) -> Self {
        self.kind = kind;
        self
    }
}

impl Camera for MockCamera {
    fn capture(&mut self) -> Result<Capture, DeviceError> {
        let attempt = self.attempts;
        self.attempts += 1;

        if self.fail_at.contains(&attempt) {
            self.log.record(DeviceEvent::CaptureFailed { attempt });
            return Err(DeviceError::Capture(format!(
                "injected failure on attempt {attempt}"
            )));
        }

        let buffer = if self.next < self.frames.len() {
            let frame = self.frames[self.next].clone();
            self.next += 1;
            frame
        } else if self.repeat_last {
            self.frames
                .last()
                .cloned()
                .ok_or_else(|| DeviceError::Capture("no frames scripted".to_string()))?
        } else {
            self.log.record(DeviceEvent::CaptureFailed { attempt });
            return Err(DeviceError::Capture("no more frames".to_string()));
        };

        self.frame_count += 1;
        self.log.record(DeviceEvent::Capture {
            frame_number: self.frame_count,
        });
        Ok(Capture {
            buffer,
            kind: self.kind,
            frame_number: self.frame_count,
        })
    }

    fn set_exposure(&mut self, exposure: Duration) -> Result<(), DeviceError> {
        self.exposure = exposure;
        self.log.record(DeviceEvent::SetExposure(exposure));
        Ok(())
    }

    fn exposure(&self) -> Duration {
        self.exposure
    }

    fn frame_size(&self) -> ImageSize {
        self.size
    }

    fn capture_kind(&self) -> CaptureKind {
        self.kind
    }

    fn name(&self) -> &str {
        "MockCamera"
    }
}

/// Stage that jumps straight to each target
pub struct MockStage {
    position: StagePosition,
    fail_after: Option<usize>,
    moves: usize,
    log: DeviceLog,
}

impl MockStage {
    pub fn new(log: DeviceLog) -> Self {
        Self {
            position: StagePosition::default(),
            fail_after: None,
            moves: 0,
            log,
        }
    }

    pub fn at(mut self, position: StagePosition) -> Self {
        self.position = position;
        self
    }

    /// Every move after the first `n` fails
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl Stage for MockStage {
    fn move_to(&mut self, target: StageTarget) -> Result<(), DeviceError> {
        if self.fail_after.is_some_and(|n| self.moves >= n) {
            return Err(DeviceError::Motion("injected motion fault".to_string()));
        }
        self.moves += 1;
        self.position = target.resolve(self.position);
        self.log.record(DeviceEvent::Move(target));
        Ok(())
    }

    fn position(&mut self) -> Result<StagePosition, DeviceError> {
        Ok(self.position)
    }
}

pub struct MockIllumination {
    on: bool,
    log: DeviceLog,
}

impl MockIllumination {
    pub fn new(log: DeviceLog) -> Self {
        Self { on: false, log }
    }
}

impl Illumination for MockIllumination {
    fn set_on(&mut self) -> Result<(), DeviceError> {
        self.on = true;
        self.log.record(DeviceEvent::LampOn);
        Ok(())
    }

    fn set_off(&mut self) -> Result<(), DeviceError> {
        self.on = false;
        self.log.record(DeviceEvent::LampOff);
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn frame(value: u16) -> PixelBuffer {
        PixelBuffer::from(Array2::from_elem((2, 3), value))
    }

    #[test]
    fn test_scripted_frames_then_exhausted() {
        let log = DeviceLog::default();
        let mut cam = MockCamera::new(vec![frame(1), frame(2)], log.clone());

        assert_eq!(cam.capture().unwrap().buffer, frame(1));
        let second = cam.capture().unwrap();
        assert_eq!(second.buffer, frame(2));
        assert_eq!(second.frame_number, 2);
        assert!(cam.capture().is_err());
        assert_eq!(cam.frame_size(), ImageSize::from_width_height(3, 2));
    }

    #[test]
    fn test_injected_failures_do_not_consume_frames() {
        let log = DeviceLog::default();
        let mut cam = MockCamera::new(vec![frame(1), frame(2)], log.clone()).with_failures([1]);

        assert_eq!(cam.capture().unwrap().buffer, frame(1));
        assert!(matches!(cam.capture(), Err(DeviceError::Capture(_))));
        assert_eq!(cam.capture().unwrap().buffer, frame(2));
        assert_eq!(
            log.events(),
            vec![
                DeviceEvent::Capture { frame_number: 1 },
                DeviceEvent::CaptureFailed { attempt: 1 },
                DeviceEvent::Capture { frame_number: 2 },
            ]
        );
    }

    #[test]
    fn test_stage_and_lamp_logging() {
        let log = DeviceLog::default();
        let mut stage = MockStage::new(log.clone()).failing_after(1);
        let mut lamp = MockIllumination::new(log.clone());

        lamp.set_on().unwrap();
        stage.move_to(StageTarget::z(5.0)).unwrap();
        assert!(stage.move_to(StageTarget::z(6.0)).is_err());
        lamp.set_off().unwrap();

        assert_eq!(stage.position().unwrap().z, 5.0);
        assert!(!lamp.is_on());
        assert_eq!(log.moves(), vec![StageTarget::z(5.0)]);
        assert_eq!(log.events().first(), Some(&DeviceEvent::LampOn));
        assert_eq!(log.events().last(), Some(&DeviceEvent::LampOff));
    }
}
