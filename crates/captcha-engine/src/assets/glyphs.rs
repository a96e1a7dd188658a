//! Digit glyph sets.
//!
//! A glyph is a fixed grid of on/off dots. The image renderer turns every
//! "on" dot into a filled circle, so glyph sets only differ in which dots
//! are set; all glyphs of one set share the same grid size.

use std::path::Path;

use captcha_common::{CaptchaError, Result};
use rusttype::{Font, Scale, point};

/// Provides one dot-matrix glyph per digit
pub trait DigitGlyphs: Send + Sync {
    /// Grid size (width, height) shared by every glyph of the set
    fn cell_size(&self) -> (usize, usize);

    /// Glyph for a digit in 0-9. Other values are a contract violation.
    fn glyph(&self, digit: u8) -> &Glyph;
}

/// Dot-matrix mask for a single digit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    width: usize,
    height: usize,
    dots: Vec<bool>,
}

impl Glyph {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// True if the dot at column `x`, row `y` is set
    pub fn is_on(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.dots[y * self.width + x]
    }

    /// Number of set dots
    pub fn dot_count(&self) -> usize {
        self.dots.iter().filter(|&&d| d).count()
    }

    fn from_rows(rows: &[&str]) -> Self {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut dots = vec![false; width * rows.len()];
        for (y, row) in rows.iter().enumerate() {
            for (x, c) in row.bytes().enumerate() {
                dots[y * width + x] = c == b'#';
            }
        }
        Self {
            width,
            height: rows.len(),
            dots,
        }
    }
}

const BUILTIN_WIDTH: usize = 9;
const BUILTIN_HEIGHT: usize = 13;

#[rustfmt::skip]
static BUILTIN_FONT: [[&str; BUILTIN_HEIGHT]; 10] = [
    // 0
    [
        "..#####..",
        ".##...##.",
        "##.....##",
        "##.....##",
        "##....###",
        "##...#.##",
        "##..#..##",
        "##.#...##",
        "###....##",
        "##.....##",
        "##.....##",
        ".##...##.",
        "..#####..",
    ],
    // 1
    [
        "....##...",
        "...###...",
        "..####...",
        ".##.##...",
        "....##...",
        "....##...",
        "....##...",
        "....##...",
        "....##...",
        "....##...",
        "....##...",
        "....##...",
        "..######.",
    ],
    // 2
    [
        "..#####..",
        ".##...##.",
        "##.....##",
        ".......##",
        "......##.",
        ".....##..",
        "....##...",
        "...##....",
        "..##.....",
        ".##......",
        "##.......",
        "##.......",
        "#########",
    ],
    // 3
    [
        "..#####..",
        ".##...##.",
        "##.....##",
        ".......##",
        "......##.",
        "...####..",
        "......##.",
        ".......##",
        ".......##",
        ".......##",
        "##.....##",
        ".##...##.",
        "..#####..",
    ],
    // 4
    [
        ".....###.",
        "....####.",
        "...##.##.",
        "..##..##.",
        ".##...##.",
        "##....##.",
        "##....##.",
        "#########",
        "......##.",
        "......##.",
        "......##.",
        "......##.",
        "......##.",
    ],
    // 5
    [
        "#########",
        "##.......",
        "##.......",
        "##.......",
        "##.####..",
        "###...##.",
        ".......##",
        ".......##",
        ".......##",
        ".......##",
        "##.....##",
        ".##...##.",
        "..#####..",
    ],
    // 6
    [
        "...####..",
        "..##.....",
        ".##......",
        "##.......",
        "##.......",
        "##.####..",
        "###...##.",
        "##.....##",
        "##.....##",
        "##.....##",
        "##.....##",
        ".##...##.",
        "..#####..",
    ],
    // 7
    [
        "#########",
        ".......##",
        "......##.",
        "......##.",
        ".....##..",
        ".....##..",
        "....##...",
        "....##...",
        "...##....",
        "...##....",
        "..##.....",
        "..##.....",
        "..##.....",
    ],
    // 8
    [
        "..#####..",
        ".##...##.",
        "##.....##",
        "##.....##",
        ".##...##.",
        "..#####..",
        ".##...##.",
        "##.....##",
        "##.....##",
        "##.....##",
        "##.....##",
        ".##...##.",
        "..#####..",
    ],
    // 9
    [
        "..#####..",
        ".##...##.",
        "##.....##",
        "##.....##",
        "##.....##",
        "##.....##",
        ".##...###",
        "..####.##",
        ".......##",
        ".......##",
        "......##.",
        ".....##..",
        "..####...",
    ],
];

/// Embedded 9x13 dot-matrix digits
#[derive(Debug, Clone)]
pub struct BuiltinGlyphs {
    glyphs: Vec<Glyph>,
}

impl BuiltinGlyphs {
    pub fn new() -> Self {
        Self {
            glyphs: BUILTIN_FONT.iter().map(|rows| Glyph::from_rows(rows)).collect(),
        }
    }
}

impl Default for BuiltinGlyphs {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitGlyphs for BuiltinGlyphs {
    fn cell_size(&self) -> (usize, usize) {
        (BUILTIN_WIDTH, BUILTIN_HEIGHT)
    }

    fn glyph(&self, digit: u8) -> &Glyph {
        &self.glyphs[usize::from(digit)]
    }
}

/// Supersampling factor used when thresholding font coverage onto dots
const SUPERSAMPLE: usize = 4;

/// Digits rasterized from a TrueType font onto a dot grid
#[derive(Debug, Clone)]
pub struct FontGlyphs {
    width: usize,
    height: usize,
    glyphs: Vec<Glyph>,
}

impl FontGlyphs {
    /// Load a font file and rasterize digits onto a `width` x `height` grid
    pub fn from_file(path: impl AsRef<Path>, width: usize, height: usize) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            CaptchaError::Asset(format!("failed to read font {}: {}", path.display(), e))
        })?;
        Self::from_bytes(data, width, height)
    }

    pub fn from_bytes(data: Vec<u8>, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CaptchaError::Asset("glyph grid must be non-empty".to_string()));
        }
        let font = Font::try_from_vec(data)
            .ok_or_else(|| CaptchaError::Asset("invalid font data".to_string()))?;

        let glyphs = (0..10u8)
            .map(|d| rasterize(&font, char::from(b'0' + d), width, height))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(width, height, "Rasterized font glyphs");

        Ok(Self {
            width,
            height,
            glyphs,
        })
    }
}

impl DigitGlyphs for FontGlyphs {
    fn cell_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn glyph(&self, digit: u8) -> &Glyph {
        &self.glyphs[usize::from(digit)]
    }
}

/// Render `ch` scaled to fit the supersampled grid, then mark every dot
/// whose block is more than half covered.
fn rasterize(font: &Font<'_>, ch: char, width: usize, height: usize) -> Result<Glyph> {
    let (bw, bh) = (width * SUPERSAMPLE, height * SUPERSAMPLE);
    let missing = || CaptchaError::Asset(format!("font has no outline for {:?}", ch));

    let sample = font
        .glyph(ch)
        .scaled(Scale::uniform(bh as f32))
        .positioned(point(0.0, 0.0));
    let bb = sample.pixel_bounding_box().ok_or_else(missing)?;
    let fit = (bw as f32 / bb.width() as f32).min(bh as f32 / bb.height() as f32);

    let glyph = font
        .glyph(ch)
        .scaled(Scale::uniform(bh as f32 * fit))
        .positioned(point(0.0, 0.0));
    let bb = glyph.pixel_bounding_box().ok_or_else(missing)?;
    let ox = bw.saturating_sub(bb.width() as usize) / 2;
    let oy = bh.saturating_sub(bb.height() as usize) / 2;

    let mut coverage = vec![0f32; bw * bh];
    glyph.draw(|x, y, v| {
        let (px, py) = (x as usize + ox, y as usize + oy);
        if px < bw && py < bh {
            coverage[py * bw + px] = v;
        }
    });

    let area = (SUPERSAMPLE * SUPERSAMPLE) as f32;
    let mut dots = vec![false; width * height];
    for cy in 0..height {
        for cx in 0..width {
            let mut sum = 0.0;
            for sy in 0..SUPERSAMPLE {
                let row = (cy * SUPERSAMPLE + sy) * bw;
                for sx in 0..SUPERSAMPLE {
                    sum += coverage[row + cx * SUPERSAMPLE + sx];
                }
            }
            dots[cy * width + cx] = sum / area > 0.5;
        }
    }

    Ok(Glyph {
        width,
        height,
        dots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_glyph_dimensions() {
        let glyphs = BuiltinGlyphs::new();
        assert_eq!(glyphs.cell_size(), (BUILTIN_WIDTH, BUILTIN_HEIGHT));
        for d in 0..10 {
            let g = glyphs.glyph(d);
            assert_eq!((g.width(), g.height()), glyphs.cell_size(), "digit {}", d);
            assert!(g.dot_count() > 10, "digit {} is nearly empty", d);
        }
    }

    #[test]
    fn test_builtin_glyphs_distinct() {
        let glyphs = BuiltinGlyphs::new();
        for a in 0..10 {
            for b in (a + 1)..10 {
                assert_ne!(glyphs.glyph(a), glyphs.glyph(b), "{} == {}", a, b);
            }
        }
    }

    #[test]
    fn test_glyph_is_on_out_of_bounds() {
        let g = BuiltinGlyphs::new().glyph(8).clone();
        assert!(g.is_on(2, 0));
        assert!(!g.is_on(0, 0));
        assert!(!g.is_on(BUILTIN_WIDTH, 0));
        assert!(!g.is_on(0, BUILTIN_HEIGHT));
    }

    #[test]
    fn test_font_glyphs_reject_garbage() {
        let err = FontGlyphs::from_bytes(b"not a font".to_vec(), 9, 13).unwrap_err();
        assert!(matches!(err, CaptchaError::Asset(_)));

        let err = FontGlyphs::from_file("/nonexistent/font.ttf", 9, 13).unwrap_err();
        assert!(matches!(err, CaptchaError::Asset(_)));
    }

    #[test]
    fn test_font_glyphs_from_system_font() {
        let path = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
        if !Path::new(path).exists() {
            return;
        }
        let glyphs = FontGlyphs::from_file(path, 9, 13).unwrap();
        for d in 0..10 {
            assert!(glyphs.glyph(d).dot_count() > 0, "digit {} rasterized empty", d);
        }
    }
}
