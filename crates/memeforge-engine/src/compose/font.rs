use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use tracing::{info, warn};

const BITMAP_CELL: u32 = 8;

/// Largest pixel size a face is built at.
pub const MAX_FONT_SIZE: u32 = 4096;

/// Font source for captions: the first loadable system font, or the built-in
/// 8x8 bitmap face when none is installed.
#[derive(Clone)]
pub struct FontBook {
    outline: Option<FontArc>,
    source: Option<PathBuf>,
}

impl FontBook {
    pub fn probe(paths: &[PathBuf]) -> Self {
        for path in paths {
            if !path.is_file() {
                continue;
            }
            match load_font(path) {
                Ok(font) => {
                    info!("Caption font: {}", path.display());
                    return Self {
                        outline: Some(font),
                        source: Some(path.clone()),
                    };
                }
                Err(reason) => warn!("Skipping font {}: {reason}", path.display()),
            }
        }
        warn!("No system font found; captions use the built-in bitmap font");
        Self::builtin()
    }

    pub fn builtin() -> Self {
        Self {
            outline: None,
            source: None,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Face for a caption of `size` pixels, clamped to `1..=MAX_FONT_SIZE`.
    pub fn face(&self, size: u32) -> CaptionFont {
        let size = size.clamp(1, MAX_FONT_SIZE);
        match &self.outline {
            Some(font) => CaptionFont::Outline {
                font: font.clone(),
                scale: PxScale::from(size as f32),
            },
            None => CaptionFont::Bitmap {
                scale: size.saturating_add(BITMAP_CELL / 2) / BITMAP_CELL,
            }
            .normalized(),
        }
    }
}

impl std::fmt::Debug for FontBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontBook")
            .field("source", &self.source)
            .finish()
    }
}

fn load_font(path: &Path) -> Result<FontArc, String> {
    let bytes = fs::read(path).map_err(|err| err.to_string())?;
    FontArc::try_from_vec(bytes).map_err(|err| err.to_string())
}

#[derive(Clone)]
pub enum CaptionFont {
    Outline { font: FontArc, scale: PxScale },
    Bitmap { scale: u32 },
}

impl CaptionFont {
    fn normalized(self) -> Self {
        match self {
            Self::Bitmap { scale } => Self::Bitmap {
                scale: scale.max(1),
            },
            other => other,
        }
    }

    /// Pixel width and height of `text` set on one line.
    pub fn measure(&self, text: &str) -> (u32, u32) {
        match self {
            Self::Outline { font, scale } => text_size(*scale, font, text),
            Self::Bitmap { scale } => {
                let cell = BITMAP_CELL.saturating_mul(*scale);
                let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
                (chars.saturating_mul(cell), cell)
            }
        }
    }

    pub fn draw(&self, canvas: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>) {
        match self {
            Self::Outline { font, scale } => draw_text_mut(canvas, color, x, y, *scale, font, text),
            Self::Bitmap { scale } => draw_bitmap_text(canvas, x, y, *scale, text, color),
        }
    }
}

fn draw_bitmap_text(canvas: &mut RgbaImage, x: i32, y: i32, scale: u32, text: &str, color: Rgba<u8>) {
    let scale = i64::from(scale);
    let advance = i64::from(BITMAP_CELL) * scale;
    let canvas_width = i64::from(canvas.width());
    for (index, ch) in text.chars().enumerate() {
        let origin_x = i64::from(x) + index as i64 * advance;
        if origin_x >= canvas_width {
            break;
        }
        if origin_x + advance <= 0 {
            continue;
        }
        let glyph = BASIC_FONTS
            .get(ch)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8u8 {
                if bits & (1u8 << col) == 0 {
                    continue;
                }
                let px = origin_x + i64::from(col) * scale;
                let py = i64::from(y) + row as i64 * scale;
                fill_block(canvas, px, py, scale, color);
            }
        }
    }
}

/// Fills the part of a `size` square at (`x`, `y`) that lies on the canvas.
fn fill_block(canvas: &mut RgbaImage, x: i64, y: i64, size: i64, color: Rgba<u8>) {
    let (width, height) = (i64::from(canvas.width()), i64::from(canvas.height()));
    let (left, top) = (x.max(0), y.max(0));
    let right = x.saturating_add(size).min(width);
    let bottom = y.saturating_add(size).min(height);
    for py in top..bottom {
        for px in left..right {
            canvas.put_pixel(px as u32, py as u32, color);
        }
    }
}
