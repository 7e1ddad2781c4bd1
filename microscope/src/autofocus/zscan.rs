//! Focus-axis sweep
//!
//! Moves to `start`, switches the lamp on, waits for it to settle, discards
//! warm-up frames, then captures one frame per position. The focus axis
//! and the lamp are restored on every exit path, including failures and
//! cancellation.

use std::time::Duration;

use hardware::{DeviceContext, StageTarget};
use shared::PixelBuffer;

use crate::cancel::CancelToken;
use crate::config::{RestoreOrder, ZScanConfig};
use crate::error::{MicroscopeError, Result};
use crate::routine::Routine;

pub(crate) const OPERATION: &str = "z-scan";

/// Slack when deciding whether a position lands on `end`
const POSITION_EPSILON: f64 = 1e-9;

/// Upper bound on the number of positions in one sweep
pub const MAX_SWEEP_POSITIONS: usize = 100_000;

/// One captured frame of a sweep
#[derive(Debug, Clone)]
pub struct ZStackFrame {
    /// Position of the frame in the sweep, counting skipped captures
    pub index: usize,
    /// Commanded focus-axis position
    pub position: f64,
    pub buffer: PixelBuffer,
    /// Camera sequence number
    pub frame_number: u64,
}

/// Focus-axis positions visited by a sweep
///
/// # Errors
/// * `InvalidConfig` - zero or non-finite step, a step pointing away from
///   `end`, a sweep with no positions, or more than [`MAX_SWEEP_POSITIONS`]
pub fn sweep_positions(start: f64, end: f64, step: f64, end_inclusive: bool) -> Result<Vec<f64>> {
    if !(start.is_finite() && end.is_finite() && step.is_finite()) || step == 0.0 {
        return Err(MicroscopeError::InvalidConfig(format!(
            "sweep {start} -> {end} with step {step}"
        )));
    }
    let span = (end - start) / step;
    if span < -POSITION_EPSILON {
        return Err(MicroscopeError::InvalidConfig(format!(
            "step {step} does not lead from {start} to {end}"
        )));
    }

    if span >= MAX_SWEEP_POSITIONS as f64 {
        return Err(MicroscopeError::InvalidConfig(format!(
            "sweep {start} -> {end} with step {step} exceeds {MAX_SWEEP_POSITIONS} positions"
        )));
    }

    let last = (span + POSITION_EPSILON).floor().max(0.0) as usize;
    let lands_on_end = (span - last as f64).abs() <= POSITION_EPSILON;
    let count = if lands_on_end && !end_inclusive {
        last
    } else {
        last + 1
    };
    if count == 0 {
        return Err(MicroscopeError::InvalidConfig(format!(
            "sweep {start} -> {end} (end excluded) visits no positions"
        )));
    }

    Ok((0..count).map(|i| start + i as f64 * step).collect())
}

pub struct ZScanController {
    config: ZScanConfig,
}

impl ZScanController {
    pub fn new(config: ZScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ZScanConfig {
        &self.config
    }

    /// Sweep the focus axis from `start` towards `end`
    ///
    /// Capture failures skip that position. Everything else aborts the
    /// sweep after the focus axis and the lamp have been restored.
    ///
    /// # Errors
    /// * `InvalidConfig` - see [`sweep_positions`]; raised before any device is touched
    /// * `Acquisition` - every capture failed
    /// * `Cancelled` - the token was set between steps
    /// * `Device` / `DeviceBusy` - a move or lamp command failed, or another routine holds the devices
    pub fn run_scan(
        &self,
        devices: &DeviceContext,
        start: f64,
        end: f64,
        step: f64,
        settle_delay: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<ZStackFrame>> {
        let positions = sweep_positions(start, end, step, self.config.end_inclusive)?;
        let mut routine = Routine::open(devices, OPERATION, cancel)?;
        self.scan(&mut routine, &positions, settle_delay)
    }

    /// Sweep `positions` inside a session the caller already holds
    ///
    /// The focus axis returns to the first position and the lamp is
    /// switched off before this returns, whatever the outcome.
    pub(crate) fn scan(
        &self,
        routine: &mut Routine<'_>,
        positions: &[f64],
        settle_delay: Duration,
    ) -> Result<Vec<ZStackFrame>> {
        let Some(&start) = positions.first() else {
            return Err(MicroscopeError::InvalidConfig(
                "sweep visits no positions".to_string(),
            ));
        };
        log::info!("z-scan from {start}: {} positions", positions.len());

        let outcome = self.sweep(routine, positions, settle_delay);
        let restored = self.restore(routine, start);

        match (outcome, restored) {
            (Err(e), restored) => {
                if let Err(cleanup) = restored {
                    log::error!("z-scan cleanup failed after error: {cleanup}");
                }
                Err(e)
            }
            (Ok(_), Err(cleanup)) => Err(cleanup),
            (Ok(frames), Ok(())) => {
                log::info!(
                    "z-scan captured {} of {} positions",
                    frames.len(),
                    positions.len()
                );
                Ok(frames)
            }
        }
    }

    fn sweep(
        &self,
        routine: &mut Routine<'_>,
        positions: &[f64],
        settle_delay: Duration,
    ) -> Result<Vec<ZStackFrame>> {
        routine.check_cancelled()?;
        if let Some(exposure) = self.config.exposure() {
            routine.set_exposure(exposure)?;
        }

        let start = positions.first().copied().unwrap_or_default();
        routine.move_to(StageTarget::z(start))?;
        routine.lamp_on()?;
        routine.settle(settle_delay);

        for n in 0..self.config.warmup_captures {
            routine.check_cancelled()?;
            if let Err(e) = routine.try_capture() {
                log::warn!("warm-up capture {n} failed: {e}");
            }
            routine.settle(self.config.warmup_interval());
        }

        let mut frames = Vec::with_capacity(positions.len());
        for (index, &z) in positions.iter().enumerate() {
            routine.check_cancelled()?;
            if index > 0 {
                routine.move_to(StageTarget::z(z))?;
            }
            match routine.try_capture() {
                Ok(capture) => frames.push(ZStackFrame {
                    index,
                    position: z,
                    buffer: capture.buffer,
                    frame_number: capture.frame_number,
                }),
                Err(e) => log::warn!("capture at z={z:.3} failed, skipping: {e}"),
            }
        }

        if frames.is_empty() {
            return Err(MicroscopeError::Acquisition {
                operation: OPERATION.to_string(),
                attempted: positions.len(),
                position: Some(routine.position()),
            });
        }
        Ok(frames)
    }

    /// Run both cleanup steps in the configured order, reporting the first failure
    fn restore(&self, routine: &mut Routine<'_>, start: f64) -> Result<()> {
        let (first, second) = match self.config.restore_order {
            RestoreOrder::ReturnThenDarken => (
                routine.move_to(StageTarget::z(start)),
                routine.lamp_off(),
            ),
            RestoreOrder::DarkenThenReturn => (
                routine.lamp_off(),
                routine.move_to(StageTarget::z(start)),
            ),
        };
        first.and(second)
    }
}
