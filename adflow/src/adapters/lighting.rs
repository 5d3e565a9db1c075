//! Lighting harmonization of the cutout against the background.

use super::{decode_input, encode_output, keys, run_blocking, with_timeout, ProviderError};
use super::{StageAdapter, StageInput};
use crate::compositor::{overlay, scale_alpha};
use crate::core::{Artifact, ContentType, StageId};
use crate::errors::{AdapterError, ValidationError};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::time::Duration;
use tracing::debug;

/// External relighting contract.
///
/// The result is the harmonized product layer at canvas resolution: the
/// placed, tone-matched product with its shadow over full transparency.
#[async_trait]
pub trait RelightProvider: Send + Sync {
    /// Harmonizes `cutout` against `background` on a `width` x `height`
    /// canvas.
    async fn relight(
        &self,
        cutout: RgbaImage,
        background: RgbaImage,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, ProviderError>;
}

/// Places the product and adds a soft drop shadow, nudging its brightness
/// toward the background's centre luminance.
#[derive(Debug, Clone, Copy)]
pub struct ShadowRelighter {
    product_fraction: f64,
    vertical_center: f64,
    shadow_opacity_pct: u32,
    shadow_sigma: f32,
    shadow_offset: (i64, i64),
    tone_strength: f64,
}

impl Default for ShadowRelighter {
    fn default() -> Self {
        Self {
            product_fraction: 0.6,
            vertical_center: 0.55,
            shadow_opacity_pct: 35,
            shadow_sigma: 24.0,
            shadow_offset: (0, 24),
            tone_strength: 0.15,
        }
    }
}

/// The shadow is blurred at this fraction of its size.
const SHADOW_DOWNSAMPLE: u32 = 4;

impl ShadowRelighter {
    /// Creates a relighter with the default placement and shadow.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Brightness factor for a background, clamped to `0.85..=1.15`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tone_factor(&self, background: &RgbaImage) -> f64 {
        let (w, h) = background.dimensions();
        let (x0, x1) = (w * 2 / 5, (w * 3 / 5).max(w * 2 / 5 + 1).min(w));
        let (y0, y1) = (h * 2 / 5, (h * 3 / 5).max(h * 2 / 5 + 1).min(h));
        let mut sum = 0u64;
        let mut n = 0u64;
        for y in y0..y1 {
            for x in x0..x1 {
                let px = background.get_pixel(x, y).0;
                sum += u64::from(px[0]) + u64::from(px[1]) + u64::from(px[2]);
                n += 3;
            }
        }
        if n == 0 {
            return 1.0;
        }
        let lum = sum as f64 / n as f64 / 255.0;
        (1.0 + (lum - 0.5) * self.tone_strength).clamp(0.85, 1.15)
    }

    /// Harmonizes synchronously.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn relight_sync(
        &self,
        cutout: &RgbaImage,
        background: &RgbaImage,
        width: u32,
        height: u32,
    ) -> RgbaImage {
        let mut layer = RgbaImage::new(width, height);
        let (fw, fh) = cutout.dimensions();
        if fw == 0 || fh == 0 || width == 0 || height == 0 {
            return layer;
        }

        let background = if background.dimensions() == (width, height) {
            background.clone()
        } else {
            imageops::resize(background, width, height, FilterType::Triangle)
        };

        let scale = (f64::from(width) / f64::from(fw)).min(f64::from(height) / f64::from(fh))
            * self.product_fraction;
        let nw = ((f64::from(fw) * scale) as u32).max(1);
        let nh = ((f64::from(fh) * scale) as u32).max(1);
        let mut product = imageops::resize(cutout, nw, nh, FilterType::Lanczos3);

        let x = (i64::from(width) - i64::from(nw)) / 2;
        let y = (f64::from(height) * self.vertical_center - f64::from(nh) / 2.0) as i64;

        let (shadow, pad) = self.shadow(&product);
        overlay(
            &mut layer,
            &shadow,
            x - pad + self.shadow_offset.0,
            y - pad + self.shadow_offset.1,
        );

        let factor = self.tone_factor(&background);
        brighten(&mut product, factor);
        overlay(&mut layer, &product, x, y);

        debug!(x, y, width = nw, height = nh, factor, "Relit product");
        layer
    }

    /// Builds the blurred shadow and the padding added on each side.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn shadow(&self, product: &RgbaImage) -> (RgbaImage, i64) {
        let pad = (self.shadow_sigma * 2.0).ceil() as u32;
        let (w, h) = (product.width() + 2 * pad, product.height() + 2 * pad);
        let mut shadow = RgbaImage::new(w, h);
        for (x, y, px) in product.enumerate_pixels() {
            shadow.put_pixel(x + pad, y + pad, Rgba([0, 0, 0, px.0[3]]));
        }
        scale_alpha(&mut shadow, self.shadow_opacity_pct, 100);

        if self.shadow_sigma > 0.0 {
            let (sw, sh) = (
                (w / SHADOW_DOWNSAMPLE).max(1),
                (h / SHADOW_DOWNSAMPLE).max(1),
            );
            let small = imageops::resize(&shadow, sw, sh, FilterType::Triangle);
            let sigma = (self.shadow_sigma / SHADOW_DOWNSAMPLE as f32).max(0.5);
            let blurred = imageops::blur(&small, sigma);
            shadow = imageops::resize(&blurred, w, h, FilterType::Triangle);
        }
        (shadow, i64::from(pad))
    }
}

/// Multiplies colour channels by `factor`, leaving alpha untouched.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn brighten(img: &mut RgbaImage, factor: f64) {
    let milli = (factor * 1000.0).round() as u32;
    for px in img.pixels_mut() {
        for c in &mut px.0[..3] {
            let v = (u32::from(*c) * milli + 500) / 1000;
            *c = u8::try_from(v.min(255)).unwrap_or(u8::MAX);
        }
    }
}

#[async_trait]
impl RelightProvider for ShadowRelighter {
    async fn relight(
        &self,
        cutout: RgbaImage,
        background: RgbaImage,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, ProviderError> {
        let relighter = *self;
        run_blocking(move || Ok(relighter.relight_sync(&cutout, &background, width, height))).await
    }
}

/// Lighting composite stage adapter.
#[derive(Debug)]
pub struct LightingCompositeAdapter<P> {
    provider: P,
}

impl<P: RelightProvider> LightingCompositeAdapter<P> {
    /// Wraps a provider.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: RelightProvider> StageAdapter for LightingCompositeAdapter<P> {
    fn stage(&self) -> StageId {
        StageId::LightingComposite
    }

    fn validate(&self, input: &StageInput) -> Result<(), ValidationError> {
        input.typed_artifact(keys::CUTOUT, ContentType::Png)?;
        input.typed_artifact(keys::BACKGROUND, ContentType::Png)?;
        input.require_dimension(keys::WIDTH)?;
        input.require_dimension(keys::HEIGHT)?;
        Ok(())
    }

    async fn invoke(&self, input: &StageInput, timeout: Duration) -> Result<Artifact, AdapterError> {
        self.validate(input)?;
        let width = input.require_dimension(keys::WIDTH)?;
        let height = input.require_dimension(keys::HEIGHT)?;
        let cutout = decode_input(input, keys::CUTOUT)?;
        let background = decode_input(input, keys::BACKGROUND)?;

        let layer = with_timeout(timeout, async {
            self.provider
                .relight(cutout, background, width, height)
                .await
                .map_err(AdapterError::from)
        })
        .await?;

        if layer.dimensions() != (width, height) {
            return Err(AdapterError::transient(format!(
                "malformed response: expected a {width}x{height} layer, got {}x{}",
                layer.width(),
                layer.height()
            )));
        }
        encode_output(&layer)
    }
}
