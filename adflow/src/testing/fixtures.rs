//! Fixtures for pipeline tests.

use crate::adapters::CopyPlan;
use crate::config::AdflowConfig;
use crate::core::{
    Artifact, Channel, CreativeRequest, FontSize, LayoutSpec, Region, RelativeBounds, RunContext,
    Tone,
};
use crate::errors::AdflowError;
use crate::pipeline::InMemoryImageSource;
use crate::resilience::{BackoffStrategy, BreakerConfig, JitterStrategy, RetryPolicy};
use image::{Rgba, RgbaImage};

/// Reference under which [`image_source`] serves [`product_image`].
pub const PRODUCT_REF: &str = "mem://product";

/// Text of the single region in [`e2e_plan`].
pub const E2E_HEADLINE: &str = "50% OFF";

/// A logged-in caller.
#[must_use]
pub fn context() -> RunContext {
    RunContext::new("owner@shop.test")
}

/// A request for [`PRODUCT_REF`] on `channel`.
#[must_use]
pub fn request(channel: Channel) -> CreativeRequest {
    CreativeRequest::builder(PRODUCT_REF, channel)
        .with_brief("hand-glazed ceramic mug")
        .with_product_name("Mug")
        .with_tone(Tone::Casual)
        .with_discount(E2E_HEADLINE)
        .build()
}

/// A product photo: a saturated square on a near-white studio backdrop.
#[must_use]
pub fn product_image(width: u32, height: u32) -> RgbaImage {
    let (x0, x1) = (width / 4, width - width / 4);
    let (y0, y1) = (height / 4, height - height / 4);
    RgbaImage::from_fn(width, height, |x, y| {
        if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
            Rgba([200, 40, 40, 255])
        } else {
            Rgba([245, 245, 245, 255])
        }
    })
}

/// A cutout: an opaque square centred on a transparent canvas.
#[must_use]
pub fn cutout_image(width: u32, height: u32) -> RgbaImage {
    let (x0, x1) = (width / 4, width - width / 4);
    let (y0, y1) = (height / 4, height - height / 4);
    RgbaImage::from_fn(width, height, |x, y| {
        if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
            Rgba([200, 40, 40, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// [`product_image`] as a PNG artifact.
pub fn product_artifact() -> Result<Artifact, AdflowError> {
    Artifact::from_rgba(&product_image(240, 240))
}

/// An image source serving [`product_artifact`] under [`PRODUCT_REF`].
pub fn image_source() -> Result<InMemoryImageSource, AdflowError> {
    Ok(InMemoryImageSource::new().with_image(PRODUCT_REF, product_artifact()?))
}

/// A copy plan whose layout holds one headline box at `{0.1, 0.8, 0.8, 0.15}`.
#[must_use]
pub fn e2e_plan() -> CopyPlan {
    CopyPlan {
        headline: E2E_HEADLINE.to_string(),
        subcopy: "Hand-glazed, dishwasher safe".to_string(),
        cta: "See now".to_string(),
        background_prompt: "soft studio backdrop, warm light, no text, no logo, no watermark"
            .to_string(),
        layout: LayoutSpec::new().with_region(
            Region::text(RelativeBounds::new(0.1, 0.8, 0.8, 0.15), E2E_HEADLINE)
                .with_z(2)
                .with_font_size(FontSize::Px(64))
                .with_color("#FFFFFF"),
        ),
    }
}

/// A copy plan as the copy stage would emit it.
pub fn plan_artifact(plan: &CopyPlan) -> Result<Artifact, AdflowError> {
    Artifact::from_json(plan)
}

/// Config with millisecond retry delays and no jitter.
#[must_use]
pub fn fast_config() -> AdflowConfig {
    AdflowConfig::default()
        .with_retry(
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_base_delay_ms(1)
                .with_max_delay_ms(4)
                .with_backoff(BackoffStrategy::Exponential)
                .with_jitter(JitterStrategy::None),
        )
        .with_breaker(BreakerConfig::default().with_failure_threshold(5))
}
