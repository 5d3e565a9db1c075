//! Deterministic layered compositing.
//!
//! [`compose`] is a pure function: it performs no I/O, uses no randomness
//! and only integer blending, so identical inputs always produce
//! byte-identical bitmaps and identical hashes.
//!
//! Layers are painted in a fixed order:
//!
//! 1. the background, resized to the canvas when needed;
//! 2. the product layer, fitted into the first image region when the layout
//!    has one, otherwise at the origin when it matches the canvas, otherwise
//!    centred;
//! 3. every text and graphic region in ascending z-order.

mod blend;
mod glyphs;
mod text;

pub use blend::{blend_pixel, fill_rect, overlay, scale_alpha, PixelRect};
pub use glyphs::{glyph, glyph_or_fallback, FALLBACK, GLYPH_HEIGHT, GLYPH_WIDTH};
pub use text::{render_text, TextMetrics};

use crate::core::Artifact;
use crate::errors::{AdflowError, CompositionError};
use crate::layout::{ResolvedContent, ResolvedLayout, ResolvedRegion};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// What an applied layer painted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// The background bitmap.
    Background,
    /// The harmonized product layer.
    Product,
    /// A text region.
    Text,
    /// A graphic region.
    Graphic,
}

/// One layer painted onto the canvas, in paint order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedLayer {
    /// Layer kind.
    pub kind: LayerKind,
    /// Source position of the layout region, if the layer came from one.
    pub region: Option<usize>,
    /// Declared z-order of the region.
    pub z: Option<i32>,
    /// Area the layer was painted into.
    pub rect: PixelRect,
    /// Glyphs drawn with the fallback shape (text layers only).
    pub fallback_glyphs: usize,
}

impl AppliedLayer {
    fn new(kind: LayerKind, rect: PixelRect) -> Self {
        Self {
            kind,
            region: None,
            z: None,
            rect,
            fallback_glyphs: 0,
        }
    }

    fn for_region(kind: LayerKind, region: &ResolvedRegion) -> Self {
        Self {
            kind,
            region: Some(region.index),
            z: Some(region.z),
            rect: region.rect,
            fallback_glyphs: 0,
        }
    }
}

/// The final bitmap with its layer list and hash.
#[derive(Debug, Clone)]
pub struct CompositeCanvas {
    /// The composited bitmap.
    pub image: RgbaImage,
    /// Layers in the order they were painted.
    pub layers: Vec<AppliedLayer>,
    /// SHA-256 (hex) of the dimensions and raw RGBA bytes.
    pub hash: String,
}

impl CompositeCanvas {
    /// Encodes the bitmap as a PNG artifact.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_artifact(&self) -> Result<Artifact, AdflowError> {
        Artifact::from_rgba(&self.image)
    }
}

/// Hashes a bitmap's dimensions and raw pixels.
#[must_use]
pub fn bitmap_hash(image: &RgbaImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_be_bytes());
    hasher.update(image.height().to_be_bytes());
    hasher.update(image.as_raw());
    hex::encode(hasher.finalize())
}

/// Composites a background, an optional product layer and the overlay
/// regions of `layout` into a canvas of the layout's size.
///
/// # Errors
///
/// Returns a [`CompositionError`] if an input bitmap is empty.
pub fn compose(
    background: &RgbaImage,
    foreground: Option<&RgbaImage>,
    layout: &ResolvedLayout,
) -> Result<CompositeCanvas, CompositionError> {
    let (width, height) = (layout.width, layout.height);
    if background.width() == 0 || background.height() == 0 {
        return Err(CompositionError::new("background bitmap is empty"));
    }

    let mut canvas = if background.dimensions() == (width, height) {
        background.clone()
    } else {
        imageops::resize(background, width, height, FilterType::Lanczos3)
    };
    let full = PixelRect::from_origin(0, 0, width, height);
    let mut layers = vec![AppliedLayer::new(LayerKind::Background, full)];

    if let Some(product) = foreground {
        layers.push(place_product(&mut canvas, product, layout)?);
    }

    for region in layout.overlay_regions() {
        let layer = match &region.content {
            ResolvedContent::Text {
                text,
                font_px,
                color,
                align,
            } => {
                let metrics = render_text(&mut canvas, region.rect, text, *font_px, *color, *align);
                let mut layer = AppliedLayer::for_region(LayerKind::Text, region);
                layer.fallback_glyphs = metrics.fallback_glyphs;
                layer
            }
            ResolvedContent::Graphic { fill } => {
                fill_rect(&mut canvas, region.rect, *fill);
                AppliedLayer::for_region(LayerKind::Graphic, region)
            }
            ResolvedContent::Image => continue,
        };
        layers.push(layer);
    }

    let hash = bitmap_hash(&canvas);
    debug!(width, height, layers = layers.len(), hash = %hash, "Composited canvas");

    Ok(CompositeCanvas {
        image: canvas,
        layers,
        hash,
    })
}

/// Decodes PNG artifacts and composites them.
///
/// # Errors
///
/// Returns a serialization error if an artifact is not a PNG, or a
/// composition error from [`compose`].
pub fn compose_artifacts(
    background: &Artifact,
    foreground: Option<&Artifact>,
    layout: &ResolvedLayout,
) -> Result<CompositeCanvas, AdflowError> {
    let background = background.decode_rgba()?;
    let foreground = foreground.map(Artifact::decode_rgba).transpose()?;
    Ok(compose(&background, foreground.as_ref(), layout)?)
}

fn place_product(
    canvas: &mut RgbaImage,
    product: &RgbaImage,
    layout: &ResolvedLayout,
) -> Result<AppliedLayer, CompositionError> {
    let (pw, ph) = product.dimensions();
    if pw == 0 || ph == 0 {
        return Err(CompositionError::new("product layer is empty"));
    }

    if let Some(slot) = layout.first_image_region() {
        let fitted = fit_into(product, slot.rect);
        let x = slot.rect.left + (slot.rect.width() - i64::from(fitted.width())) / 2;
        let y = slot.rect.top + (slot.rect.height() - i64::from(fitted.height())) / 2;
        overlay(canvas, &fitted, x, y);
        return Ok(AppliedLayer::for_region(LayerKind::Product, slot));
    }

    let (x, y) = if (pw, ph) == (layout.width, layout.height) {
        (0, 0)
    } else {
        (
            (i64::from(layout.width) - i64::from(pw)) / 2,
            (i64::from(layout.height) - i64::from(ph)) / 2,
        )
    };
    overlay(canvas, product, x, y);
    Ok(AppliedLayer::new(
        LayerKind::Product,
        PixelRect::from_origin(x, y, pw, ph),
    ))
}

/// Scales `product` to the largest size that fits `rect` with its aspect
/// ratio preserved.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn fit_into(product: &RgbaImage, rect: PixelRect) -> RgbaImage {
    let (pw, ph) = (f64::from(product.width()), f64::from(product.height()));
    let scale = (rect.width() as f64 / pw).min(rect.height() as f64 / ph);
    let nw = ((pw * scale).round() as u32).max(1);
    let nh = ((ph * scale).round() as u32).max(1);
    if (nw, nh) == product.dimensions() {
        product.clone()
    } else {
        imageops::resize(product, nw, nh, FilterType::Lanczos3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelProfile;
    use crate::core::{Channel, LayoutSpec, Region, RelativeBounds};
    use crate::layout::LayoutResolver;
    use image::Rgba;

    fn resolve(spec: &LayoutSpec, w: u32, h: u32) -> ResolvedLayout {
        LayoutResolver::new(ChannelProfile::for_channel(Channel::Instagram).font_scale)
            .resolve(spec, w, h)
            .unwrap()
    }

    fn product(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, _| {
            if x < w / 2 {
                Rgba([200, 40, 40, 255])
            } else {
                Rgba([40, 40, 200, 128])
            }
        })
    }

    fn sample_layout() -> LayoutSpec {
        LayoutSpec::new()
            .with_region(
                Region::text(RelativeBounds::new(0.1, 0.8, 0.8, 0.15), "50% OFF").with_z(2),
            )
            .with_region(
                Region::graphic(RelativeBounds::new(0.3, 0.05, 0.4, 0.1), "#00000080").with_z(1),
            )
    }

    #[test]
    fn test_identical_inputs_identical_hash() {
        let bg = RgbaImage::from_pixel(200, 200, Rgba([10, 20, 30, 255]));
        let fg = product(200, 200);
        let layout = resolve(&sample_layout(), 200, 200);

        let a = compose(&bg, Some(&fg), &layout).unwrap();
        let b = compose(&bg, Some(&fg), &layout).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.image.as_raw(), b.image.as_raw());
        assert_eq!(a.hash, bitmap_hash(&a.image));
    }

    #[test]
    fn test_layer_order() {
        let bg = RgbaImage::from_pixel(200, 200, Rgba([10, 20, 30, 255]));
        let layout = resolve(&sample_layout(), 200, 200);
        let canvas = compose(&bg, Some(&product(200, 200)), &layout).unwrap();

        let kinds: Vec<LayerKind> = canvas.layers.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LayerKind::Background,
                LayerKind::Product,
                LayerKind::Graphic,
                LayerKind::Text
            ]
        );
        assert_eq!(canvas.layers[3].rect, PixelRect::new(20, 160, 180, 190));
    }

    #[test]
    fn test_background_resized_to_canvas() {
        let bg = RgbaImage::from_pixel(50, 50, Rgba([90, 90, 90, 255]));
        let layout = resolve(&LayoutSpec::new(), 120, 80);
        let canvas = compose(&bg, None, &layout).unwrap();
        assert_eq!(canvas.image.dimensions(), (120, 80));
        let px = canvas.image.get_pixel(60, 40).0;
        assert!(px[..3].iter().all(|c| c.abs_diff(90) <= 1));
    }

    #[test]
    fn test_product_fitted_into_image_region() {
        let bg = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        let spec =
            LayoutSpec::new().with_region(Region::image(RelativeBounds::new(0.5, 0.5, 0.5, 0.5)));
        let layout = resolve(&spec, 100, 100);
        let fg = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        let canvas = compose(&bg, Some(&fg), &layout).unwrap();

        assert!(canvas.image.get_pixel(75, 75).0[0] >= 250);
        assert_eq!(*canvas.image.get_pixel(25, 25), Rgba([0, 0, 0, 255]));
        assert_eq!(canvas.layers[1].region, Some(0));
    }

    #[test]
    fn test_smaller_product_centred() {
        let bg = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        let layout = resolve(&LayoutSpec::new(), 100, 100);
        let fg = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]));
        let canvas = compose(&bg, Some(&fg), &layout).unwrap();

        assert_eq!(canvas.layers[1].rect, PixelRect::new(40, 40, 60, 60));
        assert_eq!(*canvas.image.get_pixel(50, 50), Rgba([255, 255, 255, 255]));
        assert_eq!(*canvas.image.get_pixel(10, 10), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_text_painted_inside_box() {
        let bg = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 0, 255]));
        let layout = resolve(&sample_layout(), 200, 200);
        let canvas = compose(&bg, None, &layout).unwrap();

        let white = canvas
            .image
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0 == [255, 255, 255, 255])
            .collect::<Vec<_>>();
        assert!(!white.is_empty());
        assert!(white
            .iter()
            .all(|(x, y, _)| (20..180).contains(x) && (160..190).contains(y)));
    }

    #[test]
    fn test_empty_background_rejected() {
        let layout = resolve(&LayoutSpec::new(), 10, 10);
        assert!(compose(&RgbaImage::new(0, 0), None, &layout).is_err());
    }

    #[test]
    fn test_compose_artifacts() {
        let bg = Artifact::from_rgba(&RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 255]))).unwrap();
        let layout = resolve(&LayoutSpec::new(), 10, 10);
        let canvas = compose_artifacts(&bg, None, &layout).unwrap();
        assert_eq!(canvas.layers.len(), 1);

        let json = Artifact::from_json(&serde_json::json!({"a": 1})).unwrap();
        assert!(compose_artifacts(&json, None, &layout).is_err());
    }
}
