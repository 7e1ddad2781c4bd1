use hardware::mock::{DeviceEvent, DeviceLog, MockCamera, MockIllumination, MockStage};
use hardware::{DeviceContext, StageTarget};
use microscope::autofocus::{FocusMetric, FocusStrategy, NormalizedVariance, ZScanController};
use microscope::config::ZScanConfig;
use microscope::{Autofocus, CancelToken, MicroscopeError};
use ndarray::Array2;
use shared::PixelBuffer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Two-level frame with `variance / mean == score` (mean 1000)
fn frame_with_score(score: f64) -> PixelBuffer {
    let s = (score * 1000.0).sqrt();
    PixelBuffer::from(Array2::from_shape_fn((8, 8), |(y, x)| {
        if (x + y) % 2 == 0 {
            (1000.0 - s).round() as u16
        } else {
            (1000.0 + s).round() as u16
        }
    }))
}

fn scripted_bench(scores: &[f64], log: &DeviceLog) -> DeviceContext {
    let frames = scores.iter().map(|&s| frame_with_score(s)).collect();
    DeviceContext::new(
        MockCamera::new(frames, log.clone()),
        MockStage::new(log.clone()),
        MockIllumination::new(log.clone()),
    )
}

#[test]
fn test_eleven_position_sweep_selects_global_maximum() {
    let _ = env_logger::builder().is_test(true).try_init();
    let log = DeviceLog::default();
    let ctx = scripted_bench(
        &[2.0, 3.0, 5.0, 9.0, 4.0, 2.0, 1.0, 1.0, 1.0, 1.0, 1.0],
        &log,
    );

    let result = Autofocus::new(ZScanConfig::immediate())
        .focus(&ctx, 1000.0, 1010.0, 1.0, &CancelToken::new())
        .unwrap();

    assert_eq!(result.position, 1003.0);
    assert_eq!(result.index, 3);
    assert_eq!(result.records.len(), 11);
    // sweep restores to start, then the axis is parked at best focus
    let moves = log.moves();
    assert_eq!(moves[moves.len() - 2], StageTarget::z(1000.0));
    assert_eq!(moves[moves.len() - 1], StageTarget::z(1003.0));
    assert!(!ctx.is_busy());
}

#[test]
fn test_end_exclusive_sweep_drops_last_position() {
    let log = DeviceLog::default();
    let ctx = scripted_bench(&[1.0; 11], &log);
    let config = ZScanConfig {
        end_inclusive: false,
        ..ZScanConfig::immediate()
    };
    let frames = ZScanController::new(config)
        .run_scan(&ctx, 1000.0, 1010.0, 1.0, Duration::ZERO, &CancelToken::new())
        .unwrap();
    assert_eq!(frames.len(), 10);
    assert_eq!(frames.last().unwrap().position, 1009.0);
}

#[test]
fn test_minimize_with_one_failed_capture() {
    let log = DeviceLog::default();
    let frames = [3.0, 0.5, 2.0, 1.0].map(frame_with_score).to_vec();
    let camera = MockCamera::new(frames, log.clone()).with_failures([1]);
    let ctx = DeviceContext::new(
        camera,
        MockStage::new(log.clone()),
        MockIllumination::new(log.clone()),
    );
    let config = ZScanConfig {
        strategy: FocusStrategy::Minimize,
        ..ZScanConfig::immediate()
    };

    // attempt 1 (z=11) fails; remaining frames land on z=10, 12, 13, 14
    let result = Autofocus::new(config)
        .focus(&ctx, 10.0, 14.0, 1.0, &CancelToken::new())
        .unwrap();
    assert_eq!(result.records.len(), 4);
    assert_eq!(result.position, 12.0);
    assert!(log
        .events()
        .contains(&DeviceEvent::CaptureFailed { attempt: 1 }));
}

#[test]
fn test_second_routine_while_session_open_is_busy() {
    let log = DeviceLog::default();
    let ctx = scripted_bench(&[1.0, 2.0], &log);
    let _held = ctx.session("manual jog").unwrap();

    let result = std::thread::scope(|s| {
        s.spawn(|| {
            Autofocus::new(ZScanConfig::immediate()).focus(
                &ctx,
                0.0,
                1.0,
                1.0,
                &CancelToken::new(),
            )
        })
        .join()
        .unwrap()
    });

    assert_eq!(
        result.unwrap_err(),
        MicroscopeError::DeviceBusy {
            requested: "z-scan".to_string(),
            active: "manual jog".to_string()
        }
    );
    assert!(log.events().is_empty());
}

#[test]
fn test_focus_on_worker_thread() {
    let log = DeviceLog::default();
    let ctx = scripted_bench(&[1.0, 4.0, 2.0], &log);

    let result = std::thread::scope(|s| {
        s.spawn(|| {
            Autofocus::new(ZScanConfig::immediate()).focus(
                &ctx,
                5.0,
                7.0,
                1.0,
                &CancelToken::new(),
            )
        })
        .join()
        .unwrap()
    })
    .unwrap();

    assert_eq!(result.position, 6.0);
    let mut session = ctx.session("inspect").unwrap();
    assert_eq!(session.position().unwrap().z, 6.0);
}

/// Normalized variance that counts frames scored while the devices were free
struct SessionAudit {
    devices: Arc<DeviceContext>,
    unguarded: Arc<AtomicUsize>,
}

impl FocusMetric for SessionAudit {
    fn evaluate(&self, buffer: &PixelBuffer) -> Option<f64> {
        if !self.devices.is_busy() {
            self.unguarded.fetch_add(1, Ordering::SeqCst);
        }
        NormalizedVariance.evaluate(buffer)
    }
}

#[test]
fn test_devices_held_from_sweep_to_best_focus_move() {
    let log = DeviceLog::default();
    let ctx = Arc::new(scripted_bench(&[1.0, 5.0, 2.0, 1.0], &log));
    let unguarded = Arc::new(AtomicUsize::new(0));
    let metric = SessionAudit {
        devices: Arc::clone(&ctx),
        unguarded: Arc::clone(&unguarded),
    };

    let result = Autofocus::with_metric(ZScanConfig::immediate(), metric)
        .focus(&ctx, 0.0, 3.0, 1.0, &CancelToken::new())
        .unwrap();

    assert_eq!(result.records.len(), 4);
    assert_eq!(unguarded.load(Ordering::SeqCst), 0);
    assert_eq!(log.moves().last(), Some(&StageTarget::z(1.0)));
    assert!(!ctx.is_busy());
}

#[test]
fn test_cancelled_before_start_still_restores() {
    let log = DeviceLog::default();
    let ctx = scripted_bench(&[1.0, 2.0], &log);
    let token = CancelToken::new();
    token.cancel();

    let err = Autofocus::new(ZScanConfig::immediate())
        .focus(&ctx, 3.0, 4.0, 1.0, &token)
        .unwrap_err();
    assert!(matches!(err, MicroscopeError::Cancelled { .. }));
    assert_eq!(
        log.events(),
        vec![DeviceEvent::Move(StageTarget::z(3.0)), DeviceEvent::LampOff]
    );
}

#[cfg(feature = "sim")]
mod simulated {
    use super::*;
    use hardware::sim::{SimConfig, SimulatedMicroscope};
    use shared::ImageSize;

    #[test]
    fn test_sim_sweep_finds_focal_plane() {
        let sim = SimulatedMicroscope::new(SimConfig {
            frame: ImageSize::from_width_height(128, 96),
            focus_z: 1003.0,
            ..Default::default()
        });
        let ctx = sim.device_context();

        let result = Autofocus::new(ZScanConfig::immediate())
            .focus(&ctx, 995.0, 1010.0, 1.0, &CancelToken::new())
            .unwrap();

        assert_eq!(result.position, 1003.0);
        assert_eq!(sim.position().z, 1003.0);
        assert!(!sim.lamp_on());
    }
}
