//! CAPTCHA image rendering.
//!
//! Digits are drawn as clouds of filled circles, one circle per glyph dot,
//! with per-digit skew and jitter. A wavy strike-through line, a global wave
//! distortion, and scattered decorative circles are layered on top.

use std::f64::consts::PI;
use std::io::Write;
use std::sync::Arc;

use captcha_common::{CaptchaError, DigitSequence, Result};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, ImageError, Luma, Rgb, RgbImage};
use rand::Rng;

use crate::assets::{DigitGlyphs, Glyph};
use crate::draw::{draw_circle, index_at};
use crate::random::{rnd, rndf};

/// Maximum absolute skew factor of a single digit
pub const MAX_SKEW: f64 = 0.7;

/// Number of decorative circles (and brightness ramp entries)
pub const CIRCLE_COUNT: usize = 20;

/// Palette index of the background
pub const BACKGROUND: u8 = 0;

/// Palette index of the primary (digit) color
pub const PRIMARY: u8 = 1;

/// Rendering switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    /// Apply the global wave distortion
    pub distort: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self { distort: true }
    }
}

/// Per-digit cell geometry derived from the image size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitLayout {
    pub digit_width: i32,
    pub digit_height: i32,
    pub dot_size: i32,
}

/// Fit `count` digits of a `glyph_w` x `glyph_h` font inside the image.
///
/// The width-constrained fit is tried first; if the resulting digits are
/// taller than the interior, the fit is recomputed from the height.
pub fn calculate_layout(
    width: u32,
    height: u32,
    count: usize,
    glyph_w: usize,
    glyph_h: usize,
) -> DigitLayout {
    let border = width.min(height) / 4;
    let w = f64::from(width.saturating_sub(border * 2));
    let h = f64::from(height.saturating_sub(border * 2));
    // One extra dot of spacing between digits
    let fw = (glyph_w + 1) as f64;
    let fh = glyph_h as f64;
    let nc = count.max(1) as f64;

    let mut nw = w / nc;
    let mut nh = nw * fh / fw;
    if nh > h {
        nh = h;
        nw = fw / fh * nh;
    }

    let dot_size = ((nh / fh) as i32).max(1);
    DigitLayout {
        digit_width: nw as i32 - dot_size,
        digit_height: nh as i32,
        dot_size,
    }
}

/// A rendered captcha: palette indices plus the palette itself
#[derive(Debug, Clone)]
pub struct CaptchaImage {
    canvas: GrayImage,
    palette: Vec<Rgb<u8>>,
    layout: DigitLayout,
}

impl CaptchaImage {
    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    pub fn palette(&self) -> &[Rgb<u8>] {
        &self.palette
    }

    pub fn layout(&self) -> DigitLayout {
        self.layout
    }

    /// Palette-index buffer
    pub fn indices(&self) -> &GrayImage {
        &self.canvas
    }

    /// Resolve the palette into a full-color image
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width(), self.height(), |x, y| {
            let idx = usize::from(self.canvas.get_pixel(x, y).0[0]);
            self.palette.get(idx).copied().unwrap_or(self.palette[0])
        })
    }

    /// Encode as PNG into the given sink
    pub fn write_png<W: Write>(&self, w: W) -> Result<()> {
        let rgb = self.to_rgb();
        PngEncoder::new(w)
            .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
            .map_err(|e| match e {
                ImageError::IoError(io) => CaptchaError::Io(io),
                other => CaptchaError::Encoding(other.to_string()),
            })
    }

    /// Encode as PNG into a new buffer
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_png(&mut buf)?;
        Ok(buf)
    }
}

/// Draws digit sequences into distorted images
#[derive(Clone)]
pub struct ImageRenderer {
    glyphs: Arc<dyn DigitGlyphs>,
    options: ImageOptions,
}

impl ImageRenderer {
    pub fn new(glyphs: Arc<dyn DigitGlyphs>) -> Self {
        Self {
            glyphs,
            options: ImageOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ImageOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ImageOptions {
        self.options
    }

    /// Render `digits` into a new `width` x `height` image.
    ///
    /// Digit values above 9 are a contract violation and panic.
    pub fn render<R: Rng + ?Sized>(
        &self,
        digits: &DigitSequence,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> CaptchaImage {
        let palette = random_palette(rng);
        let (glyph_w, glyph_h) = self.glyphs.cell_size();
        let layout = calculate_layout(width, height, digits.len(), glyph_w, glyph_h);
        let mut canvas = GrayImage::new(width, height);

        // Randomly position the digit run inside the image
        let (w, h) = (width as i32, height as i32);
        let n = digits.len() as i32;
        let max_x = w - (layout.digit_width + layout.dot_size) * n - layout.dot_size;
        let max_y = h - layout.digit_height - layout.dot_size * 2;
        let border = w.min(h) / 5;
        let mut x = rnd(rng, border, max_x - border);
        let y = rnd(rng, border, max_y - border);

        for d in digits.iter() {
            draw_digit(&mut canvas, self.glyphs.glyph(d), x, y, layout.dot_size, rng);
            x += layout.digit_width + layout.dot_size;
        }

        strike_through(&mut canvas, layout.dot_size, rng);

        if self.options.distort {
            let amplitude = rndf(rng, 5.0, 10.0);
            let period = rndf(rng, 100.0, 200.0);
            canvas = distort(&canvas, amplitude, period);
        }

        fill_with_circles(&mut canvas, CIRCLE_COUNT, layout.dot_size, rng);

        CaptchaImage {
            canvas,
            palette,
            layout,
        }
    }
}

/// White background, a dark primary color, and a brightness ramp of it
fn random_palette<R: Rng + ?Sized>(rng: &mut R) -> Vec<Rgb<u8>> {
    let mut palette = Vec::with_capacity(CIRCLE_COUNT + 1);
    palette.push(Rgb([0xFF, 0xFF, 0xFF]));
    let primary = Rgb([
        rng.random_range(0..=128u8),
        rng.random_range(0..=128u8),
        rng.random_range(0..=128u8),
    ]);
    palette.push(primary);
    for _ in 2..=CIRCLE_COUNT {
        palette.push(random_brightness(primary, 255, rng));
    }
    palette
}

/// Shift all channels of `c` by the same random amount, keeping the
/// brightest channel at or below `max`
fn random_brightness<R: Rng + ?Sized>(c: Rgb<u8>, max: u8, rng: &mut R) -> Rgb<u8> {
    let [r, g, b] = c.0;
    let minc = i32::from(r.min(g).min(b));
    let maxc = i32::from(r.max(g).max(b));
    let max = i32::from(max);
    if maxc >= max {
        return c;
    }
    let n = rng.random_range(0..max - maxc) - minc;
    let shift = |v: u8| (i32::from(v) + n).clamp(0, 255) as u8;
    Rgb([shift(r), shift(g), shift(b)])
}

fn draw_digit<R: Rng + ?Sized>(
    canvas: &mut GrayImage,
    glyph: &Glyph,
    x: i32,
    y: i32,
    dot: i32,
    rng: &mut R,
) {
    let skew = rndf(rng, -MAX_SKEW, MAX_SKEW);
    let mut xs = f64::from(x);
    let mut x = x;
    let r = dot / 2;
    let y = y + rnd(rng, -r, r);

    for gy in 0..glyph.height() {
        for gx in 0..glyph.width() {
            if !glyph.is_on(gx, gy) {
                continue;
            }
            let radius = r - rnd(rng, 0, dot / 8);
            let ox = rnd(rng, 0, dot / 4);
            let oy = rnd(rng, 0, dot / 4);
            draw_circle(
                canvas,
                x + gx as i32 * dot + ox,
                y + gy as i32 * dot + oy,
                radius,
                PRIMARY,
            );
        }
        xs += skew;
        x = xs as i32;
    }
}

/// Near-horizontal wavy band of small circles across the whole image
fn strike_through<R: Rng + ?Sized>(canvas: &mut GrayImage, dot: i32, rng: &mut R) {
    let max_x = canvas.width() as i32;
    let max_y = canvas.height() as i32;
    let y = rnd(rng, max_y / 3, max_y - max_y / 3);
    let amplitude = rndf(rng, 5.0, 20.0);
    let period = rndf(rng, 80.0, 180.0);
    let dx = 2.0 * PI / period;

    for x in 0..max_x {
        let xo = amplitude * (f64::from(y) * dx).cos();
        let yo = amplitude * (f64::from(x) * dx).sin();
        for yn in 0..dot {
            let r = rnd(rng, 0, dot);
            draw_circle(
                canvas,
                x + xo as i32,
                y + yo as i32 + yn * dot,
                r / 2,
                PRIMARY,
            );
        }
    }
}

/// Wave-warp filter. Reads from `src` and writes into a new buffer.
pub fn distort(src: &GrayImage, amplitude: f64, period: f64) -> GrayImage {
    let dx = 2.0 * PI / period;
    GrayImage::from_fn(src.width(), src.height(), |x, y| {
        let ox = amplitude * (f64::from(y) * dx).sin();
        let oy = amplitude * (f64::from(x) * dx).cos();
        Luma([index_at(src, x as i32 + ox as i32, y as i32 + oy as i32)])
    })
}

fn fill_with_circles<R: Rng + ?Sized>(
    canvas: &mut GrayImage,
    count: usize,
    max_radius: i32,
    rng: &mut R,
) {
    let max_x = canvas.width() as i32;
    let max_y = canvas.height() as i32;
    for _ in 0..count {
        let index = rnd(rng, 1, CIRCLE_COUNT as i32 - 1) as u8;
        let r = rnd(rng, 1, max_radius);
        let cx = rnd(rng, r, max_x - r);
        let cy = rnd(rng, r, max_y - r);
        draw_circle(canvas, cx, cy, r, index);
    }
}
