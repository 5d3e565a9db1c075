//! Super-resolution of the composite.

use super::{decode_input, encode_output, keys, run_blocking, with_timeout, ProviderError};
use super::{StageAdapter, StageInput};
use crate::core::{Artifact, ContentType, StageId};
use crate::errors::{AdapterError, ValidationError};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::time::Duration;
use tracing::debug;

/// External super-resolution contract.
#[async_trait]
pub trait SuperResolutionProvider: Send + Sync {
    /// Enlarges `image` to exactly `width` x `height`.
    async fn upscale(
        &self,
        image: RgbaImage,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, ProviderError>;
}

/// Lanczos resampling.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResizeUpscaler;

impl ResizeUpscaler {
    /// Creates the upscaler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SuperResolutionProvider for ResizeUpscaler {
    async fn upscale(
        &self,
        image: RgbaImage,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, ProviderError> {
        run_blocking(move || {
            if image.dimensions() == (width, height) {
                return Ok(image);
            }
            Ok(imageops::resize(&image, width, height, FilterType::Lanczos3))
        })
        .await
    }
}

/// Upscale stage adapter.
#[derive(Debug)]
pub struct UpscaleAdapter<P> {
    provider: P,
}

impl<P: SuperResolutionProvider> UpscaleAdapter<P> {
    /// Wraps a provider.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: SuperResolutionProvider> StageAdapter for UpscaleAdapter<P> {
    fn stage(&self) -> StageId {
        StageId::Upscale
    }

    fn validate(&self, input: &StageInput) -> Result<(), ValidationError> {
        input.typed_artifact(keys::COMPOSITE, ContentType::Png)?;
        input.require_dimension(keys::WIDTH)?;
        input.require_dimension(keys::HEIGHT)?;
        Ok(())
    }

    async fn invoke(&self, input: &StageInput, timeout: Duration) -> Result<Artifact, AdapterError> {
        self.validate(input)?;
        let width = input.require_dimension(keys::WIDTH)?;
        let height = input.require_dimension(keys::HEIGHT)?;
        let composite = decode_input(input, keys::COMPOSITE)?;

        let upscaled = with_timeout(timeout, async {
            self.provider
                .upscale(composite, width, height)
                .await
                .map_err(AdapterError::from)
        })
        .await?;

        if upscaled.dimensions() != (width, height) {
            return Err(AdapterError::transient(format!(
                "malformed response: expected {width}x{height}, got {}x{}",
                upscaled.width(),
                upscaled.height()
            )));
        }
        debug!(width, height, "Upscaled composite");
        encode_output(&upscaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[tokio::test]
    async fn test_resizes_to_target() {
        let composite = RgbaImage::from_pixel(20, 30, Rgba([50, 60, 70, 255]));
        let input = StageInput::new(StageId::Upscale)
            .with_artifact(keys::COMPOSITE, Artifact::from_rgba(&composite).unwrap())
            .with_param(keys::WIDTH, 40)
            .with_param(keys::HEIGHT, 60);
        let adapter = UpscaleAdapter::new(ResizeUpscaler::new());
        assert!(adapter.validate(&input).is_ok());

        let out = adapter.invoke(&input, Duration::from_secs(5)).await.unwrap();
        assert_eq!((out.width(), out.height()), (40, 60));
    }

    #[tokio::test]
    async fn test_missing_target_is_validation_error() {
        let composite = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let input = StageInput::new(StageId::Upscale)
            .with_artifact(keys::COMPOSITE, Artifact::from_rgba(&composite).unwrap());
        let err = UpscaleAdapter::new(ResizeUpscaler::new())
            .invoke(&input, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));
    }
}
