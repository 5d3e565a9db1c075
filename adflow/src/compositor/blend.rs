//! Integer alpha compositing.
//!
//! All arithmetic is integer so results are bit-identical across platforms.

use crate::core::Color;
use image::{Rgba, RgbaImage};

/// An axis-aligned pixel rectangle, right and bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PixelRect {
    /// Left edge.
    pub left: i64,
    /// Top edge.
    pub top: i64,
    /// Right edge (exclusive).
    pub right: i64,
    /// Bottom edge (exclusive).
    pub bottom: i64,
}

impl PixelRect {
    /// Creates a rectangle from its edges.
    #[must_use]
    pub const fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self { left, top, right, bottom }
    }

    /// Creates a rectangle from an origin and a size.
    #[must_use]
    pub fn from_origin(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self::new(x, y, x + i64::from(width), y + i64::from(height))
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> i64 {
        self.right - self.left
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> i64 {
        self.bottom - self.top
    }

    /// Returns true if the rectangles share at least one pixel.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }
}

/// Blends `src` over `dst` with straight (non-premultiplied) alpha.
#[must_use]
pub fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = u32::from(src.0[3]);
    if sa == 255 {
        return src;
    }
    if sa == 0 {
        return dst;
    }
    let da = u32::from(dst.0[3]);
    let inv = 255 - sa;
    let out_a = sa + (da * inv + 127) / 255;
    if out_a == 0 {
        return Rgba([0, 0, 0, 0]);
    }
    let den = out_a * 255;
    let mut out = [0u8; 4];
    for c in 0..3 {
        let num = u32::from(src.0[c]) * sa * 255 + u32::from(dst.0[c]) * da * inv;
        out[c] = u8::try_from(((num + den / 2) / den).min(255)).unwrap_or(u8::MAX);
    }
    out[3] = u8::try_from(out_a.min(255)).unwrap_or(u8::MAX);
    Rgba(out)
}

/// Draws `src` over `dst` with its top-left corner at `(x, y)`, clipped to
/// `dst`.
pub fn overlay(dst: &mut RgbaImage, src: &RgbaImage, x: i64, y: i64) {
    let (dw, dh) = (i64::from(dst.width()), i64::from(dst.height()));
    let (sw, sh) = (i64::from(src.width()), i64::from(src.height()));

    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + sw).min(dw);
    let y1 = (y + sh).min(dh);

    for dy in y0..y1 {
        for dx in x0..x1 {
            let (Ok(sx), Ok(sy), Ok(tx), Ok(ty)) = (
                u32::try_from(dx - x),
                u32::try_from(dy - y),
                u32::try_from(dx),
                u32::try_from(dy),
            ) else {
                continue;
            };
            let blended = blend_pixel(*dst.get_pixel(tx, ty), *src.get_pixel(sx, sy));
            dst.put_pixel(tx, ty, blended);
        }
    }
}

/// Blends a solid colour over a rectangle, clipped to `dst`.
pub fn fill_rect(dst: &mut RgbaImage, rect: PixelRect, color: Color) {
    let src = Rgba(color.to_rgba());
    let x0 = rect.left.max(0);
    let y0 = rect.top.max(0);
    let x1 = rect.right.min(i64::from(dst.width()));
    let y1 = rect.bottom.min(i64::from(dst.height()));
    for y in y0..y1 {
        for x in x0..x1 {
            let (Ok(tx), Ok(ty)) = (u32::try_from(x), u32::try_from(y)) else {
                continue;
            };
            let blended = blend_pixel(*dst.get_pixel(tx, ty), src);
            dst.put_pixel(tx, ty, blended);
        }
    }
}

/// Scales every pixel's alpha by `num / den`.
pub fn scale_alpha(img: &mut RgbaImage, num: u32, den: u32) {
    if den == 0 {
        return;
    }
    for px in img.pixels_mut() {
        let a = u32::from(px.0[3]) * num / den;
        px.0[3] = u8::try_from(a.min(255)).unwrap_or(u8::MAX);
    }
}
