//! FAST-9 corner detection with 3x3 non-maximum suppression

use image::GrayImage;

/// Bresenham circle of radius 3, clockwise from 12 o'clock
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required for a corner
const ARC_LENGTH: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastCorner {
    pub x: i32,
    pub y: i32,
    pub score: f32,
}

/// Detect FAST-9 corners at least `border` pixels from every edge
pub fn detect_fast(image: &GrayImage, threshold: u8, border: i32) -> Vec<FastCorner> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let border = border.max(3);
    if width <= 2 * border || height <= 2 * border {
        return Vec::new();
    }

    let mut scores = vec![0.0f32; (width * height) as usize];
    for y in border..height - border {
        for x in border..width - border {
            if let Some(score) = corner_score(image, x, y, threshold) {
                scores[(y * width + x) as usize] = score;
            }
        }
    }

    let mut corners = Vec::new();
    for y in border..height - border {
        for x in border..width - border {
            let score = scores[(y * width + x) as usize];
            if score > 0.0 && is_local_max(&scores, width, x, y, score) {
                corners.push(FastCorner { x, y, score });
            }
        }
    }
    corners
}

/// Sum of absolute excess over the threshold along the circle, or `None`
/// when there is no contiguous arc of brighter or darker pixels
fn corner_score(image: &GrayImage, x: i32, y: i32, threshold: u8) -> Option<f32> {
    let p = image.get_pixel(x as u32, y as u32)[0] as i32;
    let t = threshold as i32;

    let mut ring = [0i32; 16];
    for (v, &(dx, dy)) in ring.iter_mut().zip(CIRCLE.iter()) {
        *v = image.get_pixel((x + dx) as u32, (y + dy) as u32)[0] as i32 - p;
    }

    let brighter = has_arc(&ring, |d| d > t);
    let darker = has_arc(&ring, |d| d < -t);
    if !brighter && !darker {
        return None;
    }

    let score: i32 = ring
        .iter()
        .map(|&d| {
            if brighter && d > t {
                d - t
            } else if darker && d < -t {
                -d - t
            } else {
                0
            }
        })
        .sum();
    Some(score as f32)
}

fn has_arc(ring: &[i32; 16], pred: impl Fn(i32) -> bool) -> bool {
    let mut run = 0;
    for i in 0..(16 + ARC_LENGTH) {
        if pred(ring[i % 16]) {
            run += 1;
            if run >= ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Strict maximum over the 3x3 neighbourhood; equal neighbours earlier in
/// raster order win
fn is_local_max(scores: &[f32], width: i32, x: i32, y: i32, score: f32) -> bool {
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let n = scores[((y + dy) * width + (x + dx)) as usize];
            let earlier = dy < 0 || (dy == 0 && dx < 0);
            if n > score || (earlier && n == score) {
                return false;
            }
        }
    }
    true
}
