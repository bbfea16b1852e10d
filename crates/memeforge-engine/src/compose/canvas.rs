use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use memeforge_contracts::memes::CaptionSpec;

use crate::config::CaptionStyle;

use super::font::{CaptionFont, FontBook};
use super::layout::{centered_x, wrap_text};

const PLACEHOLDER_BACKGROUND: Rgba<u8> = Rgba([240, 240, 240, 255]);
const PANEL_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);
const PANEL_OUTLINE: Rgba<u8> = Rgba([0, 0, 0, 255]);
const PLACEHOLDER_LABEL: &str = "MEME TEMPLATE";
const PLACEHOLDER_LABEL_SIZE: u32 = 24;
const LINE_GAP: i32 = 5;

/// Stand-in base image: two framed white panels and a centered label.
pub fn placeholder(width: u32, height: u32, fonts: &FontBook) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, PLACEHOLDER_BACKGROUND);
    let (w, h) = (i64::from(width), i64::from(height));
    let panels = [
        (50, 50, w - 50, h / 2 - 25),
        (50, h / 2 + 25, w - 50, h - 50),
    ];
    for (left, top, right, bottom) in panels {
        draw_panel(&mut canvas, left, top, right, bottom);
    }

    let face = fonts.face(PLACEHOLDER_LABEL_SIZE);
    let (text_width, text_height) = face.measure(PLACEHOLDER_LABEL);
    let x = (w - i64::from(text_width)).div_euclid(2);
    let y = (h - i64::from(text_height)).div_euclid(2);
    face.draw(&mut canvas, x as i32, y as i32, PLACEHOLDER_LABEL, PANEL_OUTLINE);
    canvas
}

/// Inclusive corner coordinates; degenerate panels on tiny canvases are
/// skipped.
fn draw_panel(canvas: &mut RgbaImage, left: i64, top: i64, right: i64, bottom: i64) {
    if right <= left || bottom <= top {
        return;
    }
    let width = (right - left + 1) as u32;
    let height = (bottom - top + 1) as u32;
    let outer = Rect::at(left as i32, top as i32).of_size(width, height);
    draw_filled_rect_mut(canvas, outer, PANEL_FILL);
    draw_hollow_rect_mut(canvas, outer, PANEL_OUTLINE);
    if width > 2 && height > 2 {
        let inner = Rect::at(left as i32 + 1, top as i32 + 1).of_size(width - 2, height - 2);
        draw_hollow_rect_mut(canvas, inner, PANEL_OUTLINE);
    }
}

/// Draws `text` with a square stroke ring under the fill.
pub fn draw_stroked_text(
    canvas: &mut RgbaImage,
    face: &CaptionFont,
    x: i32,
    y: i32,
    text: &str,
    style: &CaptionStyle,
) {
    let reach = style.stroke_width.max(0);
    for dx in -reach..=reach {
        for dy in -reach..=reach {
            if dx != 0 || dy != 0 {
                face.draw(canvas, x + dx, y + dy, text, style.stroke);
            }
        }
    }
    face.draw(canvas, x, y, text, style.fill);
}

/// Wraps a caption into its box and draws each line centered horizontally.
/// The font never grows past the canvas height. Returns the number of lines
/// drawn.
pub fn draw_caption(
    canvas: &mut RgbaImage,
    caption: &CaptionSpec,
    fonts: &FontBook,
    style: &CaptionStyle,
) -> usize {
    let face = fonts.face(caption.font_size.min(canvas.height().max(1)));
    let lines = wrap_text(&caption.text, caption.width, |line| face.measure(line).0);
    let line_height = face.measure("A").1 as i32 + LINE_GAP;
    let mut y = caption.y;
    for line in &lines {
        let (line_width, _) = face.measure(line);
        let x = centered_x(caption.x, caption.width, line_width);
        draw_stroked_text(canvas, &face, x, y, line, style);
        y = y.saturating_add(line_height);
    }
    lines.len()
}

/// Whether any part of the caption box lands on the canvas.
pub fn caption_visible(canvas: &RgbaImage, caption: &CaptionSpec) -> bool {
    let left = i64::from(caption.x);
    let top = i64::from(caption.y);
    let right = left + i64::from(caption.width);
    right > 0
        && left < i64::from(canvas.width())
        && top < i64::from(canvas.height())
        && top + i64::from(caption.height.unwrap_or(u32::MAX / 2)) > 0
}
