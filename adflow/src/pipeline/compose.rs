//! The compose stage: layout resolution plus compositing.

use crate::adapters::{keys, CopyPlan, StageInput};
use crate::compositor::compose_artifacts;
use crate::config::FontScale;
use crate::core::{Artifact, ContentType};
use crate::errors::AdflowError;
use crate::layout::LayoutResolver;
use tracing::debug;

/// Renders the composite for a resolved compose input.
///
/// # Errors
///
/// Returns a validation error for a malformed input and a composition
/// error if the layout does not fit the canvas.
pub fn run_compose(input: &StageInput) -> Result<Artifact, AdflowError> {
    let width = input.require_dimension(keys::WIDTH)?;
    let height = input.require_dimension(keys::HEIGHT)?;
    let font_scale: FontScale = input.require_typed(keys::FONT_SCALE)?;
    let allow_overlap = input
        .param(keys::ALLOW_OVERLAP)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    let plan: CopyPlan = input
        .typed_artifact(keys::COPY_PLAN, ContentType::Json)?
        .decode_json()?;
    let background = input.typed_artifact(keys::BACKGROUND, ContentType::Png)?;
    let product = input.typed_artifact(keys::PRODUCT_LAYER, ContentType::Png)?;

    let resolved = LayoutResolver::new(font_scale)
        .with_allow_overlap(allow_overlap)
        .resolve(&plan.layout, width, height)?;
    let canvas = compose_artifacts(background, Some(product), &resolved)?;
    debug!(hash = %canvas.hash, layers = canvas.layers.len(), "Composed creative");
    canvas.to_artifact()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelProfile;
    use crate::core::{Channel, LayoutSpec, Region, RelativeBounds, StageId};
    use image::{Rgba, RgbaImage};

    fn plan(layout: LayoutSpec) -> Artifact {
        Artifact::from_json(&CopyPlan {
            headline: "h".into(),
            subcopy: "s".into(),
            cta: "c".into(),
            background_prompt: "p".into(),
            layout,
        })
        .unwrap()
    }

    fn input(layout: LayoutSpec) -> StageInput {
        let scale = ChannelProfile::for_channel(Channel::Instagram).font_scale;
        StageInput::new(StageId::Compose)
            .with_artifact(keys::COPY_PLAN, plan(layout))
            .with_artifact(
                keys::BACKGROUND,
                Artifact::from_rgba(&RgbaImage::from_pixel(50, 50, Rgba([1, 1, 1, 255]))).unwrap(),
            )
            .with_artifact(
                keys::PRODUCT_LAYER,
                Artifact::from_rgba(&RgbaImage::new(100, 100)).unwrap(),
            )
            .with_param(keys::WIDTH, 100)
            .with_param(keys::HEIGHT, 100)
            .with_param(keys::ALLOW_OVERLAP, false)
            .with_param(keys::FONT_SCALE, serde_json::to_value(scale).unwrap())
    }

    #[test]
    fn test_composite_has_canvas_size() {
        let layout = LayoutSpec::new()
            .with_region(Region::text(RelativeBounds::new(0.1, 0.1, 0.8, 0.2), "SALE"));
        let out = run_compose(&input(layout)).unwrap();
        assert_eq!((out.width(), out.height()), (100, 100));
        assert!(!out.has_alpha());
    }

    #[test]
    fn test_out_of_bounds_layout_fails() {
        let layout = LayoutSpec::new()
            .with_region(Region::text(RelativeBounds::new(0.9, 0.9, 0.3, 0.3), "X"));
        let err = run_compose(&input(layout)).unwrap_err();
        assert!(matches!(err, AdflowError::Composition(_)));
    }
}
