//! Product cutout.

use super::{decode_input, encode_output, keys, run_blocking, with_timeout, ProviderError};
use super::{StageAdapter, StageInput};
use crate::core::{Artifact, ContentType, StageId};
use crate::errors::{AdapterError, ValidationError};
use async_trait::async_trait;
use image::{imageops, GrayImage, Luma, RgbaImage};
use std::time::Duration;
use tracing::debug;

/// External segmentation contract.
#[async_trait]
pub trait SegmentationProvider: Send + Sync {
    /// Removes the background, returning an RGBA cutout.
    async fn segment(&self, image: RgbaImage) -> Result<RgbaImage, ProviderError>;
}

/// Heuristic segmenter for studio shots: the subject sits in the centre on
/// a roughly uniform background.
///
/// The background colour is the mean of a border strip. Pixels far enough
/// from it are foreground, with the threshold derived from the centre of
/// the frame. The mask is feathered and the cutout cropped to it.
#[derive(Debug, Clone, Copy)]
pub struct BorderColorSegmenter {
    border: u32,
    center_margin: f64,
    feather_sigma: f32,
}

impl Default for BorderColorSegmenter {
    fn default() -> Self {
        Self {
            border: 24,
            center_margin: 0.18,
            feather_sigma: 6.0,
        }
    }
}

impl BorderColorSegmenter {
    /// Creates a segmenter with the default border, centre and feather.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the border strip thickness (at least 4 pixels).
    #[must_use]
    pub fn with_border(mut self, border: u32) -> Self {
        self.border = border.max(4);
        self
    }

    /// Sets the feather blur sigma. Zero disables feathering.
    #[must_use]
    pub fn with_feather(mut self, sigma: f32) -> Self {
        self.feather_sigma = sigma.max(0.0);
        self
    }

    /// Segments synchronously. Returns `None` when nothing stands out from
    /// the background.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn segment_sync(&self, image: &RgbaImage) -> Option<RgbaImage> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return None;
        }
        let b = self.border.max(4);

        let mut sum = [0f64; 3];
        let mut count = 0f64;
        for (x, y, px) in image.enumerate_pixels() {
            if x < b || y < b || x + b >= w || y + b >= h {
                for (acc, c) in sum.iter_mut().zip(px.0) {
                    *acc += f64::from(c);
                }
                count += 1.0;
            }
        }
        let bg = sum.map(|s| s / count.max(1.0));

        let distance = |px: &image::Rgba<u8>| -> f64 {
            (0..3)
                .map(|i| (f64::from(px.0[i]) - bg[i]).powi(2))
                .sum::<f64>()
                .sqrt()
        };

        let m = self.center_margin.clamp(0.0, 0.45);
        let (top, bottom) = ((f64::from(h) * m) as u32, (f64::from(h) * (1.0 - m)) as u32);
        let (left, right) = ((f64::from(w) * m) as u32, (f64::from(w) * (1.0 - m)) as u32);
        let mut center_sum = 0.0;
        let mut center_n = 0u64;
        for y in top..bottom.max(top) {
            for x in left..right.max(left) {
                center_sum += distance(image.get_pixel(x, y));
                center_n += 1;
            }
        }
        let center_mean = if center_n == 0 {
            0.0
        } else {
            center_sum / center_n as f64
        };
        let threshold = (center_mean * 0.55).max(18.0);

        let hard = GrayImage::from_fn(w, h, |x, y| {
            Luma([if distance(image.get_pixel(x, y)) > threshold { 255 } else { 0 }])
        });
        let mask = if self.feather_sigma > 0.0 {
            imageops::blur(&hard, self.feather_sigma)
        } else {
            hard
        };

        let (x0, y0, x1, y1) = mask_bbox(&mask)?;
        let cutout = RgbaImage::from_fn(x1 - x0, y1 - y0, |x, y| {
            let mut px = *image.get_pixel(x0 + x, y0 + y);
            px.0[3] = mask.get_pixel(x0 + x, y0 + y).0[0];
            px
        });
        Some(cutout)
    }
}

/// Bounding box of the non-zero mask pixels, right and bottom exclusive.
fn mask_bbox(mask: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    let mut bbox: Option<(u32, u32, u32, u32)> = None;
    for (x, y, px) in mask.enumerate_pixels() {
        if px.0[0] == 0 {
            continue;
        }
        bbox = Some(match bbox {
            None => (x, y, x + 1, y + 1),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
        });
    }
    bbox
}

#[async_trait]
impl SegmentationProvider for BorderColorSegmenter {
    async fn segment(&self, image: RgbaImage) -> Result<RgbaImage, ProviderError> {
        let segmenter = *self;
        run_blocking(move || {
            segmenter
                .segment_sync(&image)
                .ok_or_else(|| ProviderError::Refused("no foreground subject found".into()))
        })
        .await
    }
}

/// Background removal stage adapter.
#[derive(Debug)]
pub struct BackgroundRemovalAdapter<P> {
    provider: P,
}

impl<P: SegmentationProvider> BackgroundRemovalAdapter<P> {
    /// Wraps a provider.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: SegmentationProvider> StageAdapter for BackgroundRemovalAdapter<P> {
    fn stage(&self) -> StageId {
        StageId::BackgroundRemoval
    }

    fn validate(&self, input: &StageInput) -> Result<(), ValidationError> {
        input
            .typed_artifact(keys::PRODUCT_IMAGE, ContentType::Png)
            .map(|_| ())
    }

    async fn invoke(&self, input: &StageInput, timeout: Duration) -> Result<Artifact, AdapterError> {
        let source = decode_input(input, keys::PRODUCT_IMAGE)?;
        let cutout = with_timeout(timeout, async {
            self.provider.segment(source).await.map_err(AdapterError::from)
        })
        .await?;

        if cutout.width() == 0 || cutout.height() == 0 {
            return Err(AdapterError::rejected("segmentation produced an empty cutout"));
        }
        let artifact = encode_output(&cutout)?;
        if !artifact.has_alpha() {
            return Err(AdapterError::rejected(
                "segmentation did not separate the subject from its background",
            ));
        }
        debug!(width = cutout.width(), height = cutout.height(), "Cut out product");
        Ok(artifact)
    }
}
