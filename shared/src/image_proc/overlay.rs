//! Centre marker overlay

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use ndarray::Axis;
use serde::{Deserialize, Serialize};

use super::frame::PixelBuffer;

/// Cross drawn at the frame centre once a target has been centred
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerStyle {
    /// Arm length from the centre in pixels
    pub half_length: u32,
    pub thickness: u32,
    /// Sample value written on every channel
    pub value: u16,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            half_length: 20,
            thickness: 2,
            value: u16::MAX,
        }
    }
}

/// Rasterise the cross into a mask the size of the frame
fn cross_mask(width: u32, height: u32, style: &MarkerStyle) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let (cx, cy) = ((width / 2) as i32, (height / 2) as i32);
    let half = style.half_length as i32;
    let t = style.thickness.max(1);
    let offset = (t / 2) as i32;
    let span = 2 * style.half_length + 1;

    draw_filled_rect_mut(
        &mut mask,
        Rect::at(cx - half, cy - offset).of_size(span, t),
        Luma([255]),
    );
    draw_filled_rect_mut(
        &mut mask,
        Rect::at(cx - offset, cy - half).of_size(t, span),
        Luma([255]),
    );
    mask
}

/// Draw the centre cross into `buffer` in place
pub fn draw_center_marker(buffer: &mut PixelBuffer, style: &MarkerStyle) {
    let size = buffer.size();
    if size.pixel_count() == 0 {
        return;
    }
    let mask = cross_mask(size.width as u32, size.height as u32, style);

    for (x, y, px) in mask.enumerate_pixels() {
        if px[0] == 0 {
            continue;
        }
        let (r, c) = (y as usize, x as usize);
        match buffer {
            PixelBuffer::Mono(a) => a[[r, c]] = style.value,
            PixelBuffer::Multi(a) => a
                .index_axis_mut(Axis(0), r)
                .index_axis_mut(Axis(0), c)
                .fill(style.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_mono_cross_geometry() {
        let mut buf = PixelBuffer::from(Array2::<u16>::zeros((100, 120)));
        draw_center_marker(&mut buf, &MarkerStyle::default());

        let PixelBuffer::Mono(a) = &buf else {
            panic!("expected mono buffer");
        };
        // centre (60, 50); arms span x 40..=80, y 30..=70, two pixels thick
        assert_eq!(a[[50, 60]], u16::MAX);
        assert_eq!(a[[50, 40]], u16::MAX);
        assert_eq!(a[[50, 80]], u16::MAX);
        assert_eq!(a[[49, 40]], u16::MAX);
        assert_eq!(a[[51, 40]], 0);
        assert_eq!(a[[50, 39]], 0);
        assert_eq!(a[[50, 81]], 0);
        assert_eq!(a[[30, 60]], u16::MAX);
        assert_eq!(a[[70, 59]], u16::MAX);
        assert_eq!(a[[71, 60]], 0);
        assert_eq!(a[[10, 10]], 0);
    }

    #[test]
    fn test_every_channel_marked() {
        let mut buf = PixelBuffer::from(Array3::<u16>::zeros((40, 40, 3)));
        let style = MarkerStyle {
            half_length: 5,
            thickness: 1,
            value: 1000,
        };
        draw_center_marker(&mut buf, &style);

        let PixelBuffer::Multi(a) = &buf else {
            panic!("expected multi buffer");
        };
        for ch in 0..3 {
            assert_eq!(a[[20, 25, ch]], 1000);
            assert_eq!(a[[20, 26, ch]], 0);
        }
    }

    #[test]
    fn test_marker_clipped_on_small_frames() {
        let mut buf = PixelBuffer::from(Array2::<u16>::zeros((6, 6)));
        draw_center_marker(&mut buf, &MarkerStyle::default());
        let PixelBuffer::Mono(a) = &buf else {
            panic!("expected mono buffer");
        };
        assert_eq!(a[[3, 0]], u16::MAX);
        assert_eq!(a[[0, 3]], u16::MAX);
    }
}
