use super::{ResolvedContent, ResolvedLayout, ResolvedRegion};
use crate::compositor::PixelRect;
use crate::config::FontScale;
use crate::core::{Color, LayoutSpec, Region, RegionKind};
use crate::errors::CompositionError;
use tracing::debug;

/// Converts relative layouts into absolute canvas instructions.
#[derive(Debug, Clone)]
pub struct LayoutResolver {
    allow_overlap: bool,
    font_scale: FontScale,
}

impl LayoutResolver {
    /// Creates a resolver that resolves font tokens through `font_scale`.
    ///
    /// Overlap between regions sharing a z value is forbidden unless the
    /// layout itself allows it.
    #[must_use]
    pub fn new(font_scale: FontScale) -> Self {
        Self {
            allow_overlap: false,
            font_scale,
        }
    }

    /// Sets the overlap policy used when a layout does not specify one.
    #[must_use]
    pub fn with_allow_overlap(mut self, allow: bool) -> Self {
        self.allow_overlap = allow;
        self
    }

    /// Resolves `spec` against a `width` x `height` canvas.
    ///
    /// Edges are rounded to the nearest pixel independently, so adjacent
    /// regions never leave gaps.
    ///
    /// # Errors
    ///
    /// Returns a [`CompositionError`] naming the offending region when a
    /// region is malformed, falls outside the canvas, or overlaps another
    /// region at the same z while overlap is forbidden.
    pub fn resolve(
        &self,
        spec: &LayoutSpec,
        width: u32,
        height: u32,
    ) -> Result<ResolvedLayout, CompositionError> {
        if width == 0 || height == 0 {
            return Err(CompositionError::new(format!(
                "canvas must be non-empty, got {width}x{height}"
            )));
        }

        let mut regions = spec
            .regions
            .iter()
            .enumerate()
            .map(|(index, region)| self.resolve_region(index, region, width, height))
            .collect::<Result<Vec<_>, _>>()?;

        // Stable: equal z keeps source order.
        regions.sort_by_key(|r| r.z);

        let allow_overlap = spec.allow_overlap.unwrap_or(self.allow_overlap);
        if !allow_overlap {
            check_overlaps(&regions)?;
        }

        debug!(
            regions = regions.len(),
            width, height, allow_overlap, "Resolved layout"
        );

        Ok(ResolvedLayout {
            width,
            height,
            regions,
        })
    }

    fn resolve_region(
        &self,
        index: usize,
        region: &Region,
        width: u32,
        height: u32,
    ) -> Result<ResolvedRegion, CompositionError> {
        let b = &region.bounds;
        if !b.is_finite() {
            return Err(CompositionError::for_region(
                index,
                format!("region {index} has non-finite bounds"),
            ));
        }
        if b.w <= 0.0 || b.h <= 0.0 {
            return Err(CompositionError::for_region(
                index,
                format!("region {index} must have a positive size"),
            ));
        }

        let rect = PixelRect::new(
            to_pixel(b.x, width),
            to_pixel(b.y, height),
            to_pixel(b.x + b.w, width),
            to_pixel(b.y + b.h, height),
        );
        if rect.left < 0
            || rect.top < 0
            || rect.right > i64::from(width)
            || rect.bottom > i64::from(height)
        {
            return Err(CompositionError::for_region(
                index,
                format!(
                    "region {index} ({},{})-({},{}) lies outside the {width}x{height} canvas",
                    rect.left, rect.top, rect.right, rect.bottom
                ),
            ));
        }
        if rect.width() <= 0 || rect.height() <= 0 {
            return Err(CompositionError::for_region(
                index,
                format!("region {index} rounds to an empty rectangle"),
            ));
        }

        let content = match region.kind {
            RegionKind::Text => {
                let text = region
                    .text
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        CompositionError::for_region(index, format!("text region {index} has no text"))
                    })?;
                let style = &region.style;
                ResolvedContent::Text {
                    text: text.to_string(),
                    font_px: self.font_scale.resolve(style.font_size.unwrap_or_default()),
                    color: parse_color(index, style.color.as_deref(), Color::WHITE)?,
                    align: style.align.unwrap_or_default(),
                }
            }
            RegionKind::Image => ResolvedContent::Image,
            RegionKind::Graphic => ResolvedContent::Graphic {
                fill: parse_color(index, region.style.fill.as_deref(), Color::BLACK)?,
            },
        };

        Ok(ResolvedRegion {
            index,
            rect,
            z: region.z,
            content,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_pixel(relative: f64, extent: u32) -> i64 {
    (relative * f64::from(extent)).round() as i64
}

fn parse_color(index: usize, value: Option<&str>, default: Color) -> Result<Color, CompositionError> {
    value.map_or(Ok(default), |hex| {
        Color::parse_hex(hex).map_err(|e| {
            CompositionError::for_region(index, format!("region {index}: {}", e.message))
        })
    })
}

fn check_overlaps(regions: &[ResolvedRegion]) -> Result<(), CompositionError> {
    // Sorted by z, so equal-z regions are contiguous.
    for (i, a) in regions.iter().enumerate() {
        for b in regions[i + 1..].iter().take_while(|b| b.z == a.z) {
            if a.rect.intersects(&b.rect) {
                let (first, second) = (a.index.min(b.index), a.index.max(b.index));
                return Err(CompositionError::for_region(
                    second,
                    format!("regions {first} and {second} overlap at z={}", a.z),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelProfile;
    use crate::core::{Channel, FontSize, FontToken, RelativeBounds, TextAlign};
    use pretty_assertions::assert_eq;

    fn resolver() -> LayoutResolver {
        LayoutResolver::new(ChannelProfile::for_channel(Channel::Instagram).font_scale)
    }

    #[test]
    fn test_rounds_edges() {
        let spec = LayoutSpec::new().with_region(
            Region::text(RelativeBounds::new(0.1, 0.8, 0.8, 0.15), "50% OFF").with_z(2),
        );
        let resolved = resolver().resolve(&spec, 1080, 1080).unwrap();

        assert_eq!(resolved.regions[0].rect, PixelRect::new(108, 864, 972, 1026));
        assert_eq!(resolved.regions[0].z, 2);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let spec = LayoutSpec::new()
            .with_region(Region::text(RelativeBounds::new(0.9, 0.9, 0.3, 0.3), "X"));
        let err = resolver().resolve(&spec, 1080, 1080).unwrap_err();
        assert_eq!(err.region, Some(0));
        assert!(err.message.contains("outside"));
    }

    #[test]
    fn test_paint_order_is_z_then_position() {
        let spec = LayoutSpec::new()
            .with_region(Region::text(RelativeBounds::new(0.0, 0.0, 0.2, 0.2), "A").with_z(3))
            .with_region(Region::graphic(RelativeBounds::new(0.5, 0.0, 0.2, 0.2), "#000000").with_z(1))
            .with_region(Region::text(RelativeBounds::new(0.5, 0.5, 0.2, 0.2), "B").with_z(3))
            .with_region(Region::image(RelativeBounds::new(0.0, 0.5, 0.2, 0.2)).with_z(1));
        let resolved = resolver().resolve(&spec, 100, 100).unwrap();

        let order: Vec<usize> = resolved.regions.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
        assert_eq!(resolved.first_image_region().map(|r| r.index), Some(3));
        assert_eq!(resolved.overlay_regions().count(), 3);
    }

    #[test]
    fn test_equal_z_overlap() {
        let spec = LayoutSpec::new()
            .with_region(Region::text(RelativeBounds::new(0.0, 0.0, 0.5, 0.5), "A"))
            .with_region(Region::text(RelativeBounds::new(0.25, 0.25, 0.5, 0.5), "B"));

        let err = resolver().resolve(&spec, 100, 100).unwrap_err();
        assert_eq!(err.region, Some(1));

        assert!(resolver().with_allow_overlap(true).resolve(&spec, 100, 100).is_ok());
        let spec = spec.with_allow_overlap(true);
        assert!(resolver().resolve(&spec, 100, 100).is_ok());
    }

    #[test]
    fn test_layout_flag_overrides_default() {
        let spec = LayoutSpec::new()
            .with_region(Region::text(RelativeBounds::new(0.0, 0.0, 0.5, 0.5), "A"))
            .with_region(Region::text(RelativeBounds::new(0.25, 0.25, 0.5, 0.5), "B"))
            .with_allow_overlap(false);
        assert!(resolver().with_allow_overlap(true).resolve(&spec, 100, 100).is_err());
    }

    #[test]
    fn test_different_z_may_overlap() {
        let spec = LayoutSpec::new()
            .with_region(Region::graphic(RelativeBounds::new(0.0, 0.0, 0.5, 0.5), "#FF0000").with_z(1))
            .with_region(Region::text(RelativeBounds::new(0.1, 0.1, 0.3, 0.3), "A").with_z(2));
        assert!(resolver().resolve(&spec, 100, 100).is_ok());
    }

    #[test]
    fn test_adjacent_regions_do_not_overlap() {
        let spec = LayoutSpec::new()
            .with_region(Region::text(RelativeBounds::new(0.0, 0.0, 0.5, 1.0), "A"))
            .with_region(Region::text(RelativeBounds::new(0.5, 0.0, 0.5, 1.0), "B"));
        let resolved = resolver().resolve(&spec, 101, 100).unwrap();
        assert_eq!(resolved.regions[0].rect.right, resolved.regions[1].rect.left);
    }

    #[test]
    fn test_font_and_colour_resolution() {
        let spec = LayoutSpec::new().with_region(
            Region::text(RelativeBounds::new(0.0, 0.0, 1.0, 0.5), "Hi")
                .with_font_size(FontSize::Token(FontToken::Xl))
                .with_color("#FF4D4D")
                .with_align(TextAlign::Left),
        );
        let resolved = resolver().resolve(&spec, 1080, 1080).unwrap();
        assert_eq!(
            resolved.regions[0].content,
            ResolvedContent::Text {
                text: "Hi".to_string(),
                font_px: 84,
                color: Color::rgb(0xFF, 0x4D, 0x4D),
                align: TextAlign::Left,
            }
        );
    }

    #[test]
    fn test_invalid_regions() {
        let cases = [
            Region::text(RelativeBounds::new(0.0, 0.0, 0.0, 0.5), "A"),
            Region::text(RelativeBounds::new(f64::NAN, 0.0, 0.5, 0.5), "A"),
            Region::text(RelativeBounds::new(0.0, 0.0, 0.5, 0.5), "   "),
            Region::text(RelativeBounds::new(0.0, 0.0, 0.5, 0.5), "A").with_color("red"),
            Region::graphic(RelativeBounds::new(0.0, 0.0, 0.5, 0.5), "#12"),
            Region::text(RelativeBounds::new(0.0, 0.0, 0.001, 0.5), "A"),
        ];
        for region in cases {
            let spec = LayoutSpec::new().with_region(region);
            assert!(resolver().resolve(&spec, 100, 100).is_err());
        }
    }

    #[test]
    fn test_empty_canvas() {
        assert!(resolver().resolve(&LayoutSpec::new(), 0, 10).is_err());
    }
}
