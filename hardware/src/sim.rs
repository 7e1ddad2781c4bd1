//! Simulated microscope
//!
//! Renders a synthetic specimen as the camera would see it for the current
//! stage position. Stage motion maps onto image motion through a fixed
//! stage-to-pixel matrix after a per-axis cubic stage error:
//!
//! ```text
//! effective = commanded + k * commanded^3          (per axis)
//! content offset (pixels) = M * effective_xy
//! blur sigma = blur_per_unit * |z - focus_z|       (capped)
//! ```
//!
//! The camera, stage and lamp handles share one state, so moving the
//! stage changes what the next capture shows. Cells are bright gaussian
//! spots whose ground-truth pixel positions are available for test
//! identifiers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use image::{ImageBuffer, Luma};
use ndarray::{Array2, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use shared::test_patterns::{add_gaussian_spot, sample_bilinear, textured_field, FULL_SCALE};
use shared::{CaptureKind, ImageSize, PixelBuffer};

use crate::camera::{Camera, Capture};
use crate::context::DeviceContext;
use crate::error::DeviceError;
use crate::illumination::Illumination;
use crate::stage::{Stage, StagePosition, StageTarget};

/// Specimen pixels kept around the frame so moderate moves stay textured
const CANVAS_MARGIN: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub frame: ImageSize,
    pub specimen_seed: u64,
    /// Pixel displacement per stage unit, row major `[[a, b], [c, d]]`
    pub stage_to_pixel: [[f64; 2]; 2],
    /// Cubic stage error coefficient per axis
    pub cubic_error: [f64; 2],
    pub focus_z: f64,
    /// Blur sigma in pixels per focus unit away from `focus_z`
    pub blur_per_unit: f64,
    pub max_blur_sigma: f64,
    /// Scale applied to the background texture (cells are added on top)
    pub texture_gain: f64,
    /// Cell centres in frame pixels with the stage at the origin
    pub cells: Vec<[f64; 2]>,
    pub cell_sigma: f64,
    pub cell_amplitude: f64,
    /// Uniform read noise amplitude in counts
    pub noise: f64,
    /// 1 for a mono camera, otherwise a multi-channel buffer
    pub channels: usize,
    pub reference_exposure_ms: f64,
    pub capture_kind: CaptureKind,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frame: ImageSize::from_width_height(320, 240),
            specimen_seed: 7,
            stage_to_pixel: [[2.0, 0.0], [0.0, 2.0]],
            cubic_error: [0.0, 0.0],
            focus_z: 1003.0,
            blur_per_unit: 1.2,
            max_blur_sigma: 8.0,
            texture_gain: 0.5,
            cells: vec![[110.0, 80.0]],
            cell_sigma: 3.0,
            cell_amplitude: 2200.0,
            noise: 0.0,
            channels: 1,
            reference_exposure_ms: 15.0,
            capture_kind: CaptureKind::Image,
        }
    }
}

#[derive(Debug)]
struct SimState {
    position: StagePosition,
    lamp_on: bool,
    exposure: Duration,
    frame_number: u64,
    cells: Vec<[f64; 2]>,
}

/// Shared handle to the simulated instrument
#[derive(Clone)]
pub struct SimulatedMicroscope {
    config: Arc<SimConfig>,
    canvas: Arc<Array2<f64>>,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedMicroscope {
    pub fn new(config: SimConfig) -> Self {
        let w = config.frame.width + 2 * CANVAS_MARGIN;
        let h = config.frame.height + 2 * CANVAS_MARGIN;
        let mut canvas = textured_field(w, h, config.specimen_seed);
        canvas.mapv_inplace(|v| v * config.texture_gain);

        let state = SimState {
            position: StagePosition::default(),
            lamp_on: false,
            exposure: Duration::from_secs_f64(config.reference_exposure_ms / 1000.0),
            frame_number: 0,
            cells: config.cells.clone(),
        };

        Self {
            config: Arc::new(config),
            canvas: Arc::new(canvas),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn camera(&self) -> SimCamera {
        SimCamera { sim: self.clone() }
    }

    pub fn stage(&self) -> SimStage {
        SimStage { sim: self.clone() }
    }

    pub fn illumination(&self) -> SimIllumination {
        SimIllumination { sim: self.clone() }
    }

    /// Device context over this instrument's camera, stage and lamp
    pub fn device_context(&self) -> DeviceContext {
        DeviceContext::new(self.camera(), self.stage(), self.illumination())
    }

    pub fn position(&self) -> StagePosition {
        self.lock().position
    }

    pub fn lamp_on(&self) -> bool {
        self.lock().lamp_on
    }

    /// Content offset in pixels for the current stage position
    pub fn view_offset(&self) -> (f64, f64) {
        let pos = self.lock().position;
        self.offset_for(pos)
    }

    /// Ground-truth cell centres in frame pixels for the current stage position
    pub fn cell_pixel_positions(&self) -> Vec<(f64, f64)> {
        let state = self.lock();
        let (ox, oy) = self.offset_for(state.position);
        state.cells.iter().map(|c| (c[0] + ox, c[1] + oy)).collect()
    }

    /// Move a cell within the specimen (in pixels at the stage origin)
    pub fn displace_cell(&self, index: usize, dx: f64, dy: f64) {
        if let Some(cell) = self.lock().cells.get_mut(index) {
            cell[0] += dx;
            cell[1] += dy;
        }
    }

    /// Pixel displacement produced by an ideal (error free) stage move
    pub fn ideal_pixel_delta(&self, stage_dx: f64, stage_dy: f64) -> (f64, f64) {
        let m = &self.config.stage_to_pixel;
        (
            m[0][0] * stage_dx + m[0][1] * stage_dy,
            m[1][0] * stage_dx + m[1][1] * stage_dy,
        )
    }

    fn offset_for(&self, pos: StagePosition) -> (f64, f64) {
        let [kx, ky] = self.config.cubic_error;
        let ex = pos.x + kx * pos.x.powi(3);
        let ey = pos.y + ky * pos.y.powi(3);
        self.ideal_pixel_delta(ex, ey)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render the frame for the current state without advancing the frame counter
    pub fn render(&self) -> PixelBuffer {
        let (position, lamp_on, exposure, frame_number, cells) = {
            let s = self.lock();
            (
                s.position,
                s.lamp_on,
                s.exposure,
                s.frame_number,
                s.cells.clone(),
            )
        };
        let cfg = &self.config;
        let (w, h) = (cfg.frame.width, cfg.frame.height);

        if !lamp_on {
            return self.pack(Array2::zeros((h, w)));
        }

        let (ox, oy) = self.offset_for(position);
        let margin = CANVAS_MARGIN as f64;
        let background = self.canvas.mean().unwrap_or(0.0);

        let mut field = Array2::from_shape_fn((h, w), |(v, u)| {
            sample_bilinear(&self.canvas, u as f64 - ox + margin, v as f64 - oy + margin)
                .unwrap_or(background)
        });
        for c in &cells {
            add_gaussian_spot(&mut field, c[0] + ox, c[1] + oy, cfg.cell_sigma, cfg.cell_amplitude);
        }

        let sigma = (cfg.blur_per_unit * (position.z - cfg.focus_z).abs()).min(cfg.max_blur_sigma);
        if sigma > 0.05 {
            field = blur(&field, sigma as f32);
        }

        let gain = exposure.as_secs_f64() * 1000.0 / cfg.reference_exposure_ms.max(f64::EPSILON);
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.specimen_seed ^ frame_number);
        let noise = cfg.noise;
        field.mapv_inplace(|v| {
            let n = if noise > 0.0 {
                rng.random_range(-noise..noise)
            } else {
                0.0
            };
            (v * gain + n).clamp(0.0, FULL_SCALE)
        });

        self.pack(field.mapv(|v| v.round() as u16))
    }

    fn pack(&self, plane: Array2<u16>) -> PixelBuffer {
        if self.config.channels <= 1 {
            return PixelBuffer::Mono(plane);
        }
        let (h, w) = plane.dim();
        let channels = self.config.channels;
        let mut out = Array3::<u16>::zeros((h, w, channels));
        for ch in 0..channels {
            let weight = 1.0 - 0.2 * ch as f64 / channels as f64;
            out.index_axis_mut(Axis(2), ch)
                .assign(&plane.mapv(|v| (v as f64 * weight).round() as u16));
        }
        PixelBuffer::Multi(out)
    }
}

fn blur(field: &Array2<f64>, sigma: f32) -> Array2<f64> {
    let (h, w) = field.dim();
    let img = ImageBuffer::<Luma<f32>, Vec<f32>>::from_fn(w as u32, h as u32, |x, y| {
        Luma([field[[y as usize, x as usize]] as f32])
    });
    let blurred = imageproc::filter::gaussian_blur_f32(&img, sigma);
    Array2::from_shape_fn((h, w), |(y, x)| blurred.get_pixel(x as u32, y as u32)[0] as f64)
}

pub struct SimCamera {
    sim: SimulatedMicroscope,
}

impl Camera for SimCamera {
    fn capture(&mut self) -> Result<Capture, DeviceError> {
        let frame_number = {
            let mut s = self.sim.lock();
            s.frame_number += 1;
            s.frame_number
        };
        let buffer = self.sim.render();
        log::trace!("sim capture #{frame_number} at {}", self.sim.position());
        Ok(Capture {
            buffer,
            kind: self.sim.config.capture_kind,
            frame_number,
        })
    }

    fn set_exposure(&mut self, exposure: Duration) -> Result<(), DeviceError> {
        if exposure.is_zero() {
            return Err(DeviceError::Configuration(
                "exposure must be positive".to_string(),
            ));
        }
        self.sim.lock().exposure = exposure;
        Ok(())
    }

    fn exposure(&self) -> Duration {
        self.sim.lock().exposure
    }

    fn frame_size(&self) -> ImageSize {
        self.sim.config.frame
    }

    fn capture_kind(&self) -> CaptureKind {
        self.sim.config.capture_kind
    }

    fn name(&self) -> &str {
        "SimCamera"
    }
}

pub struct SimStage {
    sim: SimulatedMicroscope,
}

impl Stage for SimStage {
    fn move_to(&mut self, target: StageTarget) -> Result<(), DeviceError> {
        let mut s = self.sim.lock();
        s.position = target.resolve(s.position);
        Ok(())
    }

    fn position(&mut self) -> Result<StagePosition, DeviceError> {
        Ok(self.sim.lock().position)
    }
}

pub struct SimIllumination {
    sim: SimulatedMicroscope,
}

impl Illumination for SimIllumination {
    fn set_on(&mut self) -> Result<(), DeviceError> {
        self.sim.lock().lamp_on = true;
        Ok(())
    }

    fn set_off(&mut self) -> Result<(), DeviceError> {
        self.sim.lock().lamp_on = false;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.sim.lamp_on()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shared::image_proc::PixelStats;

    fn small() -> SimConfig {
        SimConfig {
            frame: ImageSize::from_width_height(96, 64),
            cells: vec![[40.0, 30.0]],
            ..Default::default()
        }
    }

    #[test]
    fn test_dark_frame_when_lamp_off() {
        let sim = SimulatedMicroscope::new(small());
        let frame = sim.camera().capture().unwrap();
        assert_eq!(frame.buffer.value_range(), Some((0, 0)));
        assert_eq!(frame.frame_number, 1);
    }

    #[test]
    fn test_stage_move_shifts_cells() {
        let sim = SimulatedMicroscope::new(small());
        sim.stage().move_to(StageTarget::xy(3.0, -2.0)).unwrap();
        let cells = sim.cell_pixel_positions();
        assert_relative_eq!(cells[0].0, 46.0);
        assert_relative_eq!(cells[0].1, 26.0);
    }

    #[test]
    fn test_cubic_error_applies_to_effective_motion() {
        let config = SimConfig {
            cubic_error: [1e-3, 0.0],
            ..small()
        };
        let sim = SimulatedMicroscope::new(config);
        sim.stage().move_to(StageTarget::xy(10.0, 0.0)).unwrap();
        let (ox, oy) = sim.view_offset();
        assert_relative_eq!(ox, 2.0 * (10.0 + 1.0));
        assert_relative_eq!(oy, 0.0);
    }

    #[test]
    fn test_focus_plane_is_sharpest() {
        let sim = SimulatedMicroscope::new(small());
        sim.illumination().set_on().unwrap();
        let mut camera = sim.camera();

        let score_at = |z: f64, camera: &mut SimCamera| {
            sim.stage().move_to(StageTarget::z(z)).unwrap();
            let stats = PixelStats::from_buffer(&camera.capture().unwrap().buffer).unwrap();
            stats.variance / stats.mean
        };
        let in_focus = score_at(1003.0, &mut camera);
        let near = score_at(1004.0, &mut camera);
        let far = score_at(1008.0, &mut camera);
        assert!(in_focus > near);
        assert!(near > far);
    }

    #[test]
    fn test_multi_channel_output() {
        let config = SimConfig {
            channels: 3,
            ..small()
        };
        let sim = SimulatedMicroscope::new(config);
        sim.illumination().set_on().unwrap();
        let frame = sim.camera().capture().unwrap();
        assert_eq!(frame.buffer.channels(), 3);
        assert_eq!(frame.buffer.size(), ImageSize::from_width_height(96, 64));
    }
}
