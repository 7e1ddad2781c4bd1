#![cfg(feature = "sim")]

use approx::assert_abs_diff_eq;
use hardware::sim::{SimConfig, SimulatedMicroscope};
use hardware::StagePosition;
use microscope::acquisition::{FullRedetection, LocalPeakSearch, TargetPoint, TargetRelocator};
use microscope::calibration::RegistrationMethod;
use microscope::config::{AcquisitionConfig, CalibrationConfig, CompensatorConfig};
use microscope::{
    CancelToken, CellAcquisition, CoordinateCalibrator, MicroscopeError, MovementCompensator,
};
use nalgebra::Matrix2;
use shared::image_proc::phase_correlation::CropMode;
use shared::{AffineTransform, PixelBuffer};
use std::cell::Cell;

fn sim_with(stage_to_pixel: [[f64; 2]; 2], cubic_error: [f64; 2], texture_gain: f64) -> SimulatedMicroscope {
    SimulatedMicroscope::new(SimConfig {
        stage_to_pixel,
        cubic_error,
        texture_gain,
        focus_z: 0.0,
        ..Default::default()
    })
}

fn transform_of(m: [[f64; 2]; 2], gain: f64) -> AffineTransform {
    let matrix = Matrix2::new(m[0][0], m[0][1], m[1][0], m[1][1]) * gain;
    AffineTransform::from_matrix(matrix, 0).unwrap()
}

fn fast(config: AcquisitionConfig) -> AcquisitionConfig {
    AcquisitionConfig {
        settle_ms: 0,
        ..config
    }
}

/// Ground-truth identifier backed by the simulator's cell list
fn redetect(sim: &SimulatedMicroscope) -> FullRedetection<impl Fn(&PixelBuffer) -> Vec<TargetPoint>> {
    let truth = sim.clone();
    FullRedetection::new(move |_: &PixelBuffer| {
        truth
            .cell_pixel_positions()
            .into_iter()
            .map(|(x, y)| TargetPoint::new(x, y))
            .collect::<Vec<_>>()
    })
}

fn first_cell(sim: &SimulatedMicroscope) -> TargetPoint {
    let (x, y) = sim.cell_pixel_positions()[0];
    TargetPoint::new(x, y)
}

#[test]
fn test_exact_calibration_centres_in_one_move() {
    let _ = env_logger::builder().is_test(true).try_init();
    let m = [[2.0, 0.0], [0.0, 2.0]];
    let sim = sim_with(m, [0.0, 0.0], 0.5);
    let ctx = sim.device_context();

    let outcome = CellAcquisition::new(transform_of(m, 1.0), fast(Default::default()))
        .acquire(&ctx, first_cell(&sim), &redetect(&sim), &CancelToken::new())
        .unwrap();

    assert!(outcome.converged);
    assert_eq!(outcome.attempts.len(), 1);
    assert_abs_diff_eq!(outcome.attempts[0].stage_delta.0, 25.0, epsilon = 1e-9);
    assert_abs_diff_eq!(outcome.attempts[0].stage_delta.1, 20.0, epsilon = 1e-9);
    let (x, y) = sim.cell_pixel_positions()[0];
    assert_abs_diff_eq!(x, 160.0, epsilon = 1e-6);
    assert_abs_diff_eq!(y, 120.0, epsilon = 1e-6);
    assert!(!sim.lamp_on());
    assert!(!ctx.is_busy());
}

#[test]
fn test_damping_absorbs_scale_error() {
    let (s, c) = 5f64.to_radians().sin_cos();
    let m = [[2.0 * c, -2.0 * s], [2.0 * s, 2.0 * c]];
    let sim = sim_with(m, [0.0, 0.0], 0.5);
    let ctx = sim.device_context();
    let config = fast(AcquisitionConfig {
        max_iterations: 10,
        tolerance_px: 0.5,
        ..Default::default()
    });

    // calibration overestimates the pixel motion by 10%
    let outcome = CellAcquisition::new(transform_of(m, 1.1), config)
        .acquire(&ctx, first_cell(&sim), &redetect(&sim), &CancelToken::new())
        .unwrap();

    assert!(outcome.converged);
    assert!(outcome.attempts.len() > 1);
    assert!(outcome.residual_px < 0.5);
    let residuals: Vec<f64> = outcome.attempts.iter().map(|a| a.residual_px).collect();
    assert!(residuals.windows(2).all(|w| w[1] < w[0]));
}

#[test]
fn test_local_peak_relocation_converges() {
    let m = [[2.0, 0.0], [0.0, 2.0]];
    let sim = sim_with(m, [0.0, 0.0], 0.2);
    let ctx = sim.device_context();

    let outcome = CellAcquisition::new(transform_of(m, 1.05), fast(Default::default()))
        .acquire(
            &ctx,
            first_cell(&sim),
            &LocalPeakSearch::default(),
            &CancelToken::new(),
        )
        .unwrap();

    assert!(outcome.converged);
    assert!(outcome.residual_px < 2.0);
    let PixelBuffer::Mono(image) = &outcome.image else {
        panic!("expected mono frame");
    };
    assert_eq!(image[[120, 160]], u16::MAX);
}

/// Moves the cell out of reach before delegating to the wrapped relocator
struct Drifting<'a, R> {
    sim: &'a SimulatedMicroscope,
    inner: R,
    moved: Cell<bool>,
}

impl<R: TargetRelocator> TargetRelocator for Drifting<'_, R> {
    fn relocate(&self, image: &PixelBuffer, expected: (f64, f64), radius: f64) -> Option<TargetPoint> {
        if !self.moved.replace(true) {
            self.sim.displace_cell(0, 120.0, 0.0);
        }
        self.inner.relocate(image, expected, radius)
    }
}

#[test]
fn test_cell_drifting_out_of_radius_is_lost() {
    let m = [[2.0, 0.0], [0.0, 2.0]];
    let sim = sim_with(m, [0.0, 0.0], 0.5);
    let ctx = sim.device_context();
    let relocator = Drifting {
        sim: &sim,
        inner: redetect(&sim),
        moved: Cell::new(false),
    };

    let err = CellAcquisition::new(transform_of(m, 1.0), fast(Default::default()))
        .acquire(&ctx, first_cell(&sim), &relocator, &CancelToken::new())
        .unwrap_err();

    assert_eq!(
        err,
        MicroscopeError::CellLost {
            iteration: 0,
            expected_x: 160.0,
            expected_y: 120.0,
            radius: 50.0
        }
    );
    assert!(!sim.lamp_on());
}

#[test]
fn test_calibrate_then_acquire_with_compensator() {
    let (s, c) = 3f64.to_radians().sin_cos();
    let m = [[2.0 * c, -2.0 * s], [2.0 * s, 2.0 * c]];
    let sim = sim_with(m, [1e-4, 1e-4], 0.5);
    let ctx = sim.device_context();
    let cancel = CancelToken::new();

    let calibration = CoordinateCalibrator::new(CalibrationConfig {
        settle_ms: 0,
        registration: RegistrationMethod::PhaseCorrelation(CropMode::Full),
        ..Default::default()
    })
    .calibrate(&ctx, &cancel)
    .unwrap();
    let mut compensator = MovementCompensator::new(CompensatorConfig::default());
    compensator
        .fit(&calibration.samples, &calibration.transform)
        .unwrap();

    let outcome = CellAcquisition::new(calibration.transform.clone(), fast(Default::default()))
        .with_compensator(compensator)
        .acquire(&ctx, first_cell(&sim), &redetect(&sim), &cancel)
        .unwrap();

    assert!(outcome.converged);
    assert!(outcome.residual_px < 2.0);
    assert!(outcome.attempts.len() <= 5);
}

#[test]
fn test_invalid_damping_rejected_before_touching_devices() {
    let m = [[2.0, 0.0], [0.0, 2.0]];
    let sim = sim_with(m, [0.0, 0.0], 0.5);
    let ctx = sim.device_context();
    let config = fast(AcquisitionConfig {
        damping: 0.0,
        ..Default::default()
    });

    let err = CellAcquisition::new(transform_of(m, 1.0), config)
        .acquire(&ctx, first_cell(&sim), &redetect(&sim), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, MicroscopeError::InvalidConfig(_)));
    assert_eq!(sim.position(), StagePosition::default());
}

#[test]
fn test_acquire_while_busy() {
    let m = [[2.0, 0.0], [0.0, 2.0]];
    let sim = sim_with(m, [0.0, 0.0], 0.5);
    let ctx = sim.device_context();
    let _held = ctx.session("calibration").unwrap();

    let err = CellAcquisition::new(transform_of(m, 1.0), fast(Default::default()))
        .acquire(&ctx, first_cell(&sim), &redetect(&sim), &CancelToken::new())
        .unwrap_err();
    assert_eq!(
        err,
        MicroscopeError::DeviceBusy {
            requested: "acquisition".to_string(),
            active: "calibration".to_string()
        }
    );
}
