//! Raster primitives over a palette-indexed canvas.
//!
//! The canvas stores palette indices in a single-channel buffer; index 0 is
//! the background. Circles use the midpoint algorithm with horizontal span
//! fills, so every circle comes out solid.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_line_segment_mut;

/// Fill the span `[from_x, to_x]` on row `y`. Off-canvas pixels are clipped.
pub fn draw_horiz_line(canvas: &mut GrayImage, from_x: i32, to_x: i32, y: i32, index: u8) {
    if y < 0 || y >= canvas.height() as i32 {
        return;
    }
    draw_line_segment_mut(
        canvas,
        (from_x as f32, y as f32),
        (to_x as f32, y as f32),
        Luma([index]),
    );
}

/// Draw a filled circle centered at (`x`, `y`)
pub fn draw_circle(canvas: &mut GrayImage, x: i32, y: i32, radius: i32, index: u8) {
    let mut f = 1 - radius;
    let mut dfx = 1;
    let mut dfy = -2 * radius;
    let mut xx = 0;
    let mut yy = radius;

    set_index(canvas, x, y + radius, index);
    set_index(canvas, x, y - radius, index);
    draw_horiz_line(canvas, x - radius, x + radius, y, index);

    while xx < yy {
        if f >= 0 {
            yy -= 1;
            dfy += 2;
            f += dfy;
        }
        xx += 1;
        dfx += 2;
        f += dfx;
        draw_horiz_line(canvas, x - xx, x + xx, y + yy, index);
        draw_horiz_line(canvas, x - xx, x + xx, y - yy, index);
        draw_horiz_line(canvas, x - yy, x + yy, y + xx, index);
        draw_horiz_line(canvas, x - yy, x + yy, y - xx, index);
    }
}

/// Set a single pixel, ignoring coordinates off the canvas
pub fn set_index(canvas: &mut GrayImage, x: i32, y: i32, index: u8) {
    if in_bounds(canvas, x, y) {
        canvas.put_pixel(x as u32, y as u32, Luma([index]));
    }
}

/// Palette index at (`x`, `y`); off-canvas reads return the background
pub fn index_at(canvas: &GrayImage, x: i32, y: i32) -> u8 {
    if in_bounds(canvas, x, y) {
        canvas.get_pixel(x as u32, y as u32).0[0]
    } else {
        0
    }
}

fn in_bounds(canvas: &GrayImage, x: i32, y: i32) -> bool {
    x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(canvas: &GrayImage) -> usize {
        canvas.pixels().filter(|p| p.0[0] != 0).count()
    }

    #[test]
    fn test_circle_is_solid_and_symmetric() {
        let mut canvas = GrayImage::new(41, 41);
        draw_circle(&mut canvas, 20, 20, 10, 1);

        for d in 0..=10 {
            assert_eq!(index_at(&canvas, 20 + d, 20), 1);
            assert_eq!(index_at(&canvas, 20 - d, 20), 1);
            assert_eq!(index_at(&canvas, 20, 20 + d), 1);
            assert_eq!(index_at(&canvas, 20, 20 - d), 1);
        }
        assert_eq!(index_at(&canvas, 20 + 11, 20), 0);
        assert_eq!(index_at(&canvas, 30, 30), 0);

        // Area close to pi * r^2
        let area = filled(&canvas) as f64;
        assert!((area - std::f64::consts::PI * 100.0).abs() < 60.0, "{}", area);
    }

    #[test]
    fn test_zero_radius_is_single_dot() {
        let mut canvas = GrayImage::new(5, 5);
        draw_circle(&mut canvas, 2, 2, 0, 3);
        assert_eq!(filled(&canvas), 1);
        assert_eq!(index_at(&canvas, 2, 2), 3);
    }

    #[test]
    fn test_clipping_at_edges() {
        let mut canvas = GrayImage::new(10, 10);
        draw_circle(&mut canvas, 0, 0, 4, 2);
        draw_circle(&mut canvas, -20, 5, 3, 2);
        draw_horiz_line(&mut canvas, -5, 50, 9, 2);
        assert_eq!(index_at(&canvas, 0, 0), 2);
        assert_eq!(index_at(&canvas, 9, 9), 2);
        assert_eq!(index_at(&canvas, -1, 0), 0);
        assert_eq!(index_at(&canvas, 0, 10), 0);
    }
}
