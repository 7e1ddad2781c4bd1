//! Camera pixel buffers
//!
//! Frames arrive either as a single 2-D plane or as a stack of channel
//! planes. Both are stored as `u16` in `(row, col[, channel])` order.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb};
use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::image_size::ImageSize;

/// What a camera produces, fixed when the camera is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CaptureKind {
    /// 2-D intensity image
    #[default]
    Image,
    /// Spectrometer readout laid out as a 2-D buffer
    Spectrum,
}

impl CaptureKind {
    /// File extension used when a capture of this kind is persisted
    pub fn file_extension(&self) -> &'static str {
        match self {
            CaptureKind::Image => "tif",
            CaptureKind::Spectrum => "csv",
        }
    }
}

/// A single- or multi-channel frame
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    Mono(Array2<u16>),
    /// Shape `(height, width, channels)`
    Multi(Array3<u16>),
}

impl PixelBuffer {
    pub fn size(&self) -> ImageSize {
        match self {
            PixelBuffer::Mono(a) => ImageSize::from_width_height(a.ncols(), a.nrows()),
            PixelBuffer::Multi(a) => {
                let (h, w, _) = a.dim();
                ImageSize::from_width_height(w, h)
            }
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            PixelBuffer::Mono(_) => 1,
            PixelBuffer::Multi(a) => a.len_of(Axis(2)),
        }
    }

    /// Number of samples across all channels
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::Mono(a) => a.len(),
            PixelBuffer::Multi(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every sample of every channel
    pub fn samples(&self) -> Box<dyn Iterator<Item = u16> + '_> {
        match self {
            PixelBuffer::Mono(a) => Box::new(a.iter().copied()),
            PixelBuffer::Multi(a) => Box::new(a.iter().copied()),
        }
    }

    /// Per-pixel mean over channels
    pub fn luminance(&self) -> Array2<f64> {
        match self {
            PixelBuffer::Mono(a) => a.mapv(f64::from),
            PixelBuffer::Multi(a) => {
                let channels = a.len_of(Axis(2)).max(1) as f64;
                a.mapv(f64::from).sum_axis(Axis(2)) / channels
            }
        }
    }

    /// Smallest and largest sample, `None` for an empty buffer
    pub fn value_range(&self) -> Option<(u16, u16)> {
        self.samples().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// 8-bit luminance image with `[lo, hi]` stretched onto `[0, 255]`
    pub fn to_gray8_with_range(&self, lo: f64, hi: f64) -> GrayImage {
        let lum = self.luminance();
        let (h, w) = lum.dim();
        let span = (hi - lo).max(f64::EPSILON);
        GrayImage::from_fn(w as u32, h as u32, |x, y| {
            let v = (lum[[y as usize, x as usize]] - lo) / span * 255.0;
            Luma([v.round().clamp(0.0, 255.0) as u8])
        })
    }

    /// 8-bit luminance image, min-max normalised
    pub fn to_gray8(&self) -> GrayImage {
        let (lo, hi) = self.value_range().unwrap_or((0, 0));
        self.to_gray8_with_range(f64::from(lo), f64::from(hi))
    }

    /// Convert for encoding with the `image` crate
    ///
    /// Mono buffers become 16-bit grey, three channel buffers 16-bit RGB;
    /// anything else falls back to the luminance plane.
    pub fn to_dynamic_image(&self) -> DynamicImage {
        let size = self.size();
        let (w, h) = (size.width as u32, size.height as u32);
        match self {
            PixelBuffer::Mono(a) => {
                let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_fn(w, h, |x, y| {
                    Luma([a[[y as usize, x as usize]]])
                });
                DynamicImage::ImageLuma16(img)
            }
            PixelBuffer::Multi(a) if a.len_of(Axis(2)) == 3 => {
                let img = ImageBuffer::<Rgb<u16>, Vec<u16>>::from_fn(w, h, |x, y| {
                    let (r, c) = (y as usize, x as usize);
                    Rgb([a[[r, c, 0]], a[[r, c, 1]], a[[r, c, 2]]])
                });
                DynamicImage::ImageRgb16(img)
            }
            PixelBuffer::Multi(_) => {
                let lum = self.luminance();
                let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_fn(w, h, |x, y| {
                    Luma([lum[[y as usize, x as usize]].round() as u16])
                });
                DynamicImage::ImageLuma16(img)
            }
        }
    }
}

impl From<Array2<u16>> for PixelBuffer {
    fn from(a: Array2<u16>) -> Self {
        PixelBuffer::Mono(a)
    }
}

impl From<Array3<u16>> for PixelBuffer {
    fn from(a: Array3<u16>) -> Self {
        PixelBuffer::Multi(a)
    }
}
