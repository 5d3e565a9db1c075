//! Bitmap text rendering into a rectangle.

use super::blend::{blend_pixel, PixelRect};
use super::glyphs::{glyph_or_fallback, GLYPH_HEIGHT, GLYPH_SPACING, GLYPH_WIDTH, LINE_SPACING};
use crate::core::{Color, TextAlign};
use image::{Rgba, RgbaImage};

/// What the renderer actually drew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextMetrics {
    /// Pixels per font unit after fitting.
    pub scale: u32,
    /// Number of lines drawn.
    pub lines: usize,
    /// Characters drawn with the fallback glyph.
    pub fallback_glyphs: usize,
}

/// Width of a line in font units.
fn line_units(line: &str) -> u32 {
    let chars = u32::try_from(line.chars().count()).unwrap_or(u32::MAX);
    if chars == 0 {
        return 0;
    }
    chars
        .saturating_mul(GLYPH_WIDTH + GLYPH_SPACING)
        .saturating_sub(GLYPH_SPACING)
}

/// Height of a block of lines in font units.
fn block_units(lines: usize) -> u32 {
    let lines = u32::try_from(lines).unwrap_or(u32::MAX);
    if lines == 0 {
        return 0;
    }
    lines
        .saturating_mul(GLYPH_HEIGHT + LINE_SPACING)
        .saturating_sub(LINE_SPACING)
}

/// Picks the largest scale not above the requested one at which the text
/// fits the rectangle. Never returns less than one.
fn fit_scale(lines: &[&str], font_px: u32, width: i64, height: i64) -> u32 {
    let widest = lines.iter().map(|l| line_units(l)).max().unwrap_or(0);
    let tall = block_units(lines.len());
    let mut scale = (font_px / GLYPH_HEIGHT).max(1);
    while scale > 1 {
        let fits_w = i64::from(widest) * i64::from(scale) <= width;
        let fits_h = i64::from(tall) * i64::from(scale) <= height;
        if fits_w && fits_h {
            break;
        }
        scale -= 1;
    }
    scale
}

/// Renders `text` into `rect`, vertically centred and aligned
/// horizontally. Text that does not fit at scale one is clipped to the
/// rectangle.
pub fn render_text(
    canvas: &mut RgbaImage,
    rect: PixelRect,
    text: &str,
    font_px: u32,
    color: Color,
    align: TextAlign,
) -> TextMetrics {
    let lines: Vec<&str> = text.lines().collect();
    let scale = fit_scale(&lines, font_px, rect.width(), rect.height());
    let s = i64::from(scale);

    let block_h = i64::from(block_units(lines.len())) * s;
    let mut y = rect.top + (rect.height() - block_h) / 2;
    let src = Rgba(color.to_rgba());
    let mut fallback_glyphs = 0;

    for line in &lines {
        let line_w = i64::from(line_units(line)) * s;
        let mut x = match align {
            TextAlign::Left => rect.left,
            TextAlign::Center => rect.left + (rect.width() - line_w) / 2,
            TextAlign::Right => rect.right - line_w,
        };
        for ch in line.chars() {
            let (rows, known) = glyph_or_fallback(ch);
            if !known {
                fallback_glyphs += 1;
            }
            draw_glyph(canvas, &rows, x, y, s, rect, src);
            x += i64::from(GLYPH_WIDTH + GLYPH_SPACING) * s;
        }
        y += i64::from(GLYPH_HEIGHT + LINE_SPACING) * s;
    }

    TextMetrics {
        scale,
        lines: lines.len(),
        fallback_glyphs,
    }
}

fn draw_glyph(
    canvas: &mut RgbaImage,
    rows: &[u8; 7],
    x: i64,
    y: i64,
    scale: i64,
    clip: PixelRect,
    src: Rgba<u8>,
) {
    let left = clip.left.max(0);
    let top = clip.top.max(0);
    let right = clip.right.min(i64::from(canvas.width()));
    let bottom = clip.bottom.min(i64::from(canvas.height()));

    for (row_idx, row) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if (row >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                continue;
            }
            let px0 = x + i64::from(col) * scale;
            let py0 = y + i64::try_from(row_idx).unwrap_or(0) * scale;
            for py in py0.max(top)..(py0 + scale).min(bottom) {
                for px in px0.max(left)..(px0 + scale).min(right) {
                    let (Ok(tx), Ok(ty)) = (u32::try_from(px), u32::try_from(py)) else {
                        continue;
                    };
                    let blended = blend_pixel(*canvas.get_pixel(tx, ty), src);
                    canvas.put_pixel(tx, ty, blended);
                }
            }
        }
    }
}
