//! Resolution of each stage's input from the request and earlier outputs.

use crate::adapters::{keys, CopyPlan, StageInput};
use crate::config::ChannelProfile;
use crate::core::{Artifact, CreativeRequest, StageId};
use crate::errors::AdflowError;
use std::collections::BTreeMap;

/// Stages whose artifacts `stage` reads.
#[must_use]
pub fn data_dependencies(stage: StageId) -> &'static [StageId] {
    match stage {
        StageId::Copywriting | StageId::BackgroundRemoval => &[],
        StageId::BackgroundGeneration => &[StageId::Copywriting],
        StageId::LightingComposite => &[StageId::BackgroundRemoval, StageId::BackgroundGeneration],
        StageId::Compose => &[
            StageId::Copywriting,
            StageId::BackgroundGeneration,
            StageId::LightingComposite,
        ],
        StageId::Upscale => &[StageId::Compose],
    }
}

/// Builds stage inputs for one run.
#[derive(Debug, Clone, Copy)]
pub struct InputResolver<'a> {
    request: &'a CreativeRequest,
    profile: &'a ChannelProfile,
    allow_overlap: bool,
}

impl<'a> InputResolver<'a> {
    /// Creates a resolver for a request targeting `profile`.
    #[must_use]
    pub fn new(request: &'a CreativeRequest, profile: &'a ChannelProfile, allow_overlap: bool) -> Self {
        Self {
            request,
            profile,
            allow_overlap,
        }
    }

    /// Resolves the input of `stage`.
    ///
    /// `product_image` is the resolved primary product image; `outputs`
    /// holds the artifacts of stages that already ran.
    ///
    /// # Errors
    ///
    /// Returns an internal error if an upstream artifact is missing and a
    /// serialization error if the copy plan cannot be decoded.
    pub fn resolve(
        &self,
        stage: StageId,
        product_image: &Artifact,
        outputs: &BTreeMap<StageId, Artifact>,
    ) -> Result<StageInput, AdflowError> {
        let upstream = |dep: StageId| {
            outputs.get(&dep).cloned().ok_or_else(|| {
                AdflowError::Internal(format!("stage '{stage}' needs the output of '{dep}'"))
            })
        };
        let (cw, ch) = self.profile.canvas();
        let request = self.request;

        let input = match stage {
            StageId::Copywriting => StageInput::new(stage)
                .with_param(keys::BRIEF, request.brief.trim())
                .with_optional_param(keys::PRODUCT_NAME, request.product_name.clone())
                .with_param(keys::CHANNEL, request.channel.as_str())
                .with_param(keys::LOCALE, request.locale.trim())
                .with_param(keys::TONE, request.tone.to_string())
                .with_optional_param(keys::DISCOUNT, request.discount.clone())
                .with_optional_param(keys::MOOD_HINT, request.mood_hint.clone())
                .with_optional_param(keys::STYLE_ID, request.style_id.clone())
                .with_param(keys::SAFE_MARGIN, self.profile.safe_margin),
            StageId::BackgroundRemoval => {
                StageInput::new(stage).with_artifact(keys::PRODUCT_IMAGE, product_image.clone())
            }
            StageId::BackgroundGeneration => {
                let plan: CopyPlan = upstream(StageId::Copywriting)?.decode_json()?;
                StageInput::new(stage)
                    .with_param(keys::PROMPT, plan.background_prompt)
                    .with_param(keys::WIDTH, cw)
                    .with_param(keys::HEIGHT, ch)
                    .with_optional_param(keys::STYLE_ID, request.style_id.clone())
            }
            StageId::LightingComposite => StageInput::new(stage)
                .with_artifact(keys::CUTOUT, upstream(StageId::BackgroundRemoval)?)
                .with_artifact(keys::BACKGROUND, upstream(StageId::BackgroundGeneration)?)
                .with_param(keys::WIDTH, cw)
                .with_param(keys::HEIGHT, ch),
            StageId::Compose => StageInput::new(stage)
                .with_artifact(keys::COPY_PLAN, upstream(StageId::Copywriting)?)
                .with_artifact(keys::BACKGROUND, upstream(StageId::BackgroundGeneration)?)
                .with_artifact(keys::PRODUCT_LAYER, upstream(StageId::LightingComposite)?)
                .with_param(keys::WIDTH, cw)
                .with_param(keys::HEIGHT, ch)
                .with_param(keys::ALLOW_OVERLAP, self.allow_overlap)
                .with_param(keys::FONT_SCALE, serde_json::to_value(self.profile.font_scale)?),
            StageId::Upscale => {
                let (tw, th) = self.profile.target();
                StageInput::new(stage)
                    .with_artifact(keys::COMPOSITE, upstream(StageId::Compose)?)
                    .with_param(keys::WIDTH, tw)
                    .with_param(keys::HEIGHT, th)
            }
        };
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Channel, Tone};
    use image::{Rgba, RgbaImage};

    fn request() -> CreativeRequest {
        CreativeRequest::builder("mem://mug", Channel::Poster)
            .with_brief("mug promo")
            .with_tone(Tone::Emotional)
            .with_discount("20% OFF")
            .build()
    }

    fn png(w: u32, h: u32) -> Artifact {
        Artifact::from_rgba(&RgbaImage::from_pixel(w, h, Rgba([9, 9, 9, 255]))).unwrap()
    }

    #[test]
    fn test_copywriting_input_from_request() {
        let req = request();
        let profile = ChannelProfile::for_channel(req.channel);
        let input = InputResolver::new(&req, &profile, false)
            .resolve(StageId::Copywriting, &png(1, 1), &BTreeMap::new())
            .unwrap();

        assert_eq!(input.str_param(keys::CHANNEL), Some("poster"));
        assert_eq!(input.str_param(keys::TONE), Some("emotional"));
        assert_eq!(input.str_param(keys::DISCOUNT), Some("20% OFF"));
        assert_eq!(input.param(keys::PRODUCT_NAME), None);
        assert!(input.artifacts().is_empty());
    }

    #[test]
    fn test_missing_upstream_is_internal() {
        let req = request();
        let profile = ChannelProfile::for_channel(req.channel);
        let err = InputResolver::new(&req, &profile, false)
            .resolve(StageId::Upscale, &png(1, 1), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, AdflowError::Internal(_)));
    }

    #[test]
    fn test_upscale_targets_channel_resolution() {
        let req = request();
        let profile = ChannelProfile::for_channel(req.channel);
        let mut outputs = BTreeMap::new();
        outputs.insert(StageId::Compose, png(4, 4));

        let input = InputResolver::new(&req, &profile, false)
            .resolve(StageId::Upscale, &png(1, 1), &outputs)
            .unwrap();
        assert_eq!(input.require_dimension(keys::WIDTH).unwrap(), 2160);
        assert_eq!(input.require_dimension(keys::HEIGHT).unwrap(), 3056);
    }

    #[test]
    fn test_data_dependencies_point_backwards() {
        for (i, stage) in StageId::ALL.iter().enumerate() {
            for dep in data_dependencies(*stage) {
                assert!(StageId::ALL[..i].contains(dep));
            }
        }
    }
}
