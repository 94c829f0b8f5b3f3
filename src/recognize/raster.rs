//! Glyph rasterization.
//!
//! Renders single glyphs onto fixed-size grayscale canvases for the
//! recognition engine: black ink on white, centered, optionally mirrored
//! horizontally for glyphs the stylesheet flips.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};

use crate::error::{Error, Result};

/// A font loaded for glyph rendering: the rasterizer plus the set of
/// codepoints its character map actually covers.
pub struct LoadedFont {
    font: fontdue::Font,
    coverage: HashSet<u32>,
}

impl LoadedFont {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
            .map_err(|e| Error::InvalidFont(format!("{}: {e}", path.display())))
    }

    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, String> {
        let face = ttf_parser::Face::parse(data, 0).map_err(|e| e.to_string())?;
        let mut coverage = HashSet::new();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables {
                if subtable.is_unicode() {
                    subtable.codepoints(|cp| {
                        coverage.insert(cp);
                    });
                }
            }
        }

        let font = fontdue::Font::from_bytes(data, fontdue::FontSettings::default())
            .map_err(|e| e.to_string())?;

        Ok(LoadedFont { font, coverage })
    }

    /// Whether this font's glyph table contains the codepoint.
    pub fn contains(&self, c: char) -> bool {
        self.coverage.contains(&u32::from(c))
    }

    fn rasterize(&self, c: char, px: f32) -> (fontdue::Metrics, Vec<u8>) {
        self.font.rasterize(c, px)
    }
}

/// The two fonts a chapter's glyphs can come from.
pub struct GlyphSources<'a> {
    pub fixed: &'a LoadedFont,
    pub random: &'a LoadedFont,
}

impl GlyphSources<'_> {
    /// Select the font whose glyph table contains the codepoint,
    /// preferring the fixed font when both do.
    pub fn font_for(&self, c: char) -> Option<&LoadedFont> {
        if self.fixed.contains(c) {
            Some(self.fixed)
        } else if self.random.contains(c) {
            Some(self.random)
        } else {
            None
        }
    }
}

/// Render one glyph to a `canvas`×`canvas` grayscale image at `px`, flipped
/// horizontally when `mirrored`.
///
/// Returns `None` for visually blank renders (a single unique pixel value);
/// those glyphs carry no shape worth recognizing.
pub fn render_glyph(
    font: &LoadedFont,
    c: char,
    canvas: u32,
    px: f32,
    mirrored: bool,
) -> Option<GrayImage> {
    let (metrics, bitmap) = font.rasterize(c, px);
    if metrics.width == 0 || metrics.height == 0 {
        return None;
    }

    let mut image = GrayImage::from_pixel(canvas, canvas, Luma([255u8]));
    let x0 = canvas.saturating_sub(metrics.width as u32) / 2;
    let y0 = canvas.saturating_sub(metrics.height as u32) / 2;
    for row in 0..metrics.height {
        for col in 0..metrics.width {
            let x = x0 + col as u32;
            let y = y0 + row as u32;
            if x < canvas && y < canvas {
                let ink = bitmap[row * metrics.width + col];
                image.put_pixel(x, y, Luma([255 - ink]));
            }
        }
    }

    if is_blank(&image) {
        return None;
    }

    if mirrored {
        image = imageops::flip_horizontal(&image);
    }
    Some(image)
}

/// A render with a single unique pixel value carries no glyph.
pub fn is_blank(image: &GrayImage) -> bool {
    let mut pixels = image.pixels();
    let Some(first) = pixels.next() else {
        return true;
    };
    pixels.all(|p| p == first)
}

/// 64-bit average hash of a glyph image, for the perceptual-hash
/// short-circuit ahead of the expensive recognizer path.
pub fn average_hash(image: &GrayImage) -> u64 {
    let small = imageops::resize(image, 8, 8, FilterType::Triangle);
    let total: u64 = small.pixels().map(|p| u64::from(p[0])).sum();
    let mean = total / 64;

    let mut hash = 0u64;
    for (i, pixel) in small.pixels().enumerate() {
        if u64::from(pixel[0]) > mean {
            hash |= 1 << i;
        }
    }
    hash
}
