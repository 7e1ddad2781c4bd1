//! Focus, calibrate and centre a cell on the simulated microscope

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hardware::sim::{SimConfig, SimulatedMicroscope};
use microscope::acquisition::{FullRedetection, LocalPeakSearch, TargetPoint, TargetRelocator};
use microscope::calibration::CalibrationModel;
use microscope::{
    Autofocus, BenchConfig, CancelToken, CellAcquisition, CoordinateCalibrator,
    MovementCompensator,
};
use shared::{ImageSize, PixelBuffer};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Relocation {
    /// Re-run the identifier on every frame
    Redetect,
    /// Brightest pixel near the expected position
    LocalPeak,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Run autofocus, calibration and cell acquisition against a simulated stage", long_about = None)]
struct Args {
    #[arg(long, help = "Bench configuration JSON (flags override its values)")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "320", help = "Frame width in pixels")]
    width: usize,

    #[arg(long, default_value = "240", help = "Frame height in pixels")]
    height: usize,

    #[arg(long, default_value = "7", help = "Specimen seed")]
    seed: u64,

    #[arg(long, default_value = "2.0", help = "Rotation of the stage axes in the image, degrees")]
    rotation_deg: f64,

    #[arg(long, default_value = "2.0", help = "Pixels per stage unit")]
    scale: f64,

    #[arg(long, default_value = "0.0", help = "Cubic stage error on x")]
    cubic_x: f64,

    #[arg(long, default_value = "0.0", help = "Cubic stage error on y")]
    cubic_y: f64,

    #[arg(long, default_value = "1003.0", help = "True focal plane of the specimen")]
    focus_z: f64,

    #[arg(long, default_value = "995.0", help = "Sweep start")]
    z_start: f64,

    #[arg(long, default_value = "1010.0", help = "Sweep end")]
    z_end: f64,

    #[arg(long, default_value = "1.0", help = "Sweep step")]
    z_step: f64,

    #[arg(long, help = "Damping applied to corrections after the first")]
    damping: Option<f64>,

    #[arg(long, help = "Acquisition iteration cap")]
    max_iterations: Option<usize>,

    #[arg(long, help = "Convergence tolerance in pixels")]
    tolerance: Option<f64>,

    #[arg(long, value_enum, default_value = "redetect", help = "How the target is found after each move")]
    relocation: Relocation,

    #[arg(long, help = "Fit the stage with a full 2x2 matrix instead of rotation and scale")]
    full_linear: bool,

    #[arg(long, help = "Skip the cubic movement compensator")]
    no_compensator: bool,

    #[arg(long, help = "Keep the configured settle delays instead of running at full speed")]
    keep_delays: bool,

    #[arg(short, long, help = "Write the final marked frame to this PNG")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut bench = match &args.config {
        Some(path) => BenchConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BenchConfig::default(),
    };
    if let Some(damping) = args.damping {
        bench.acquisition.damping = damping;
    }
    if let Some(max_iterations) = args.max_iterations {
        bench.acquisition.max_iterations = max_iterations;
    }
    if let Some(tolerance) = args.tolerance {
        bench.acquisition.tolerance_px = tolerance;
    }
    if args.full_linear {
        bench.calibration.model = CalibrationModel::FullLinear;
    }
    if args.no_compensator {
        bench.compensator.enabled = false;
    }
    if !args.keep_delays {
        bench.zscan.settle_delay_ms = 0;
        bench.zscan.warmup_captures = 0;
        bench.calibration.settle_ms = 0;
        bench.acquisition.settle_ms = 0;
    }

    let (sin, cos) = args.rotation_deg.to_radians().sin_cos();
    let frame = ImageSize::from_width_height(args.width, args.height);
    let sim = SimulatedMicroscope::new(SimConfig {
        frame,
        specimen_seed: args.seed,
        stage_to_pixel: [
            [args.scale * cos, -args.scale * sin],
            [args.scale * sin, args.scale * cos],
        ],
        cubic_error: [args.cubic_x, args.cubic_y],
        focus_z: args.focus_z,
        cells: vec![[frame.width as f64 * 0.3, frame.height as f64 * 0.35]],
        ..Default::default()
    });
    let devices = sim.device_context();
    let cancel = CancelToken::new();

    let focus = Autofocus::new(bench.zscan.clone())
        .focus(&devices, args.z_start, args.z_end, args.z_step, &cancel)
        .context("autofocus")?;
    println!(
        "focus: z={:.3} (index {}, score {:.3}, {} frames scored)",
        focus.position,
        focus.index,
        focus.score,
        focus.records.len()
    );

    let calibration = CoordinateCalibrator::new(bench.calibration.clone())
        .calibrate(&devices, &cancel)
        .context("calibration")?;
    let transform = &calibration.transform;
    println!(
        "calibration: rotation {:.3} deg, scale {:.4} px/unit, {:.4} units/px, rms {:.3} px",
        transform.rotation_degrees(),
        transform.scale,
        calibration.stage_units_per_pixel(),
        transform.rms_error.unwrap_or_default()
    );

    let mut acquisition = CellAcquisition::new(transform.clone(), bench.acquisition.clone());
    if bench.compensator.enabled {
        let mut compensator = MovementCompensator::new(bench.compensator.clone());
        compensator
            .fit(&calibration.samples, transform)
            .context("compensator fit")?;
        acquisition = acquisition.with_compensator(compensator);
    }

    let truth = sim.clone();
    let identifier = move |_: &PixelBuffer| {
        truth
            .cell_pixel_positions()
            .into_iter()
            .map(|(x, y)| TargetPoint::new(x, y))
            .collect::<Vec<_>>()
    };
    let (tx, ty) = sim
        .cell_pixel_positions()
        .first()
        .copied()
        .context("simulated specimen has no cells")?;

    let redetect = FullRedetection::new(identifier);
    let local = LocalPeakSearch::default();
    let relocator: &dyn TargetRelocator = match args.relocation {
        Relocation::Redetect => &redetect,
        Relocation::LocalPeak => &local,
    };

    let outcome = acquisition
        .acquire(&devices, TargetPoint::new(tx, ty), relocator, &cancel)
        .context("acquisition")?;
    println!(
        "acquisition: {} after {} moves, residual {:.2} px",
        if outcome.converged {
            "converged"
        } else {
            "not converged"
        },
        outcome.attempts.len(),
        outcome.residual_px
    );

    if let Some(path) = &args.output {
        outcome
            .image
            .to_dynamic_image()
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("wrote {}", path.display());
    }

    Ok(())
}
