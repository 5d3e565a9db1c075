//! Declarative layout resolution.
//!
//! A [`LayoutSpec`](crate::core::LayoutSpec) describes regions in relative
//! coordinates. The [`LayoutResolver`] turns it into a [`ResolvedLayout`]:
//! absolute pixel rectangles, concrete colours and font sizes, and a final
//! paint order.

mod resolver;

pub use resolver::LayoutResolver;

use crate::compositor::PixelRect;
use crate::core::{Color, RegionKind, TextAlign};
use serde::Serialize;

/// What a resolved region paints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedContent {
    /// Bitmap text.
    Text {
        /// The text, possibly multi-line.
        text: String,
        /// Requested glyph height in pixels.
        font_px: u32,
        /// Text colour.
        color: Color,
        /// Horizontal alignment.
        align: TextAlign,
    },
    /// Slot for the product layer.
    Image,
    /// A solid fill.
    Graphic {
        /// Fill colour.
        fill: Color,
    },
}

/// One region in absolute canvas pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRegion {
    /// Position of the region in the source layout.
    pub index: usize,
    /// Pixel rectangle, right and bottom exclusive.
    pub rect: PixelRect,
    /// Declared z-order.
    pub z: i32,
    /// Paint instructions.
    pub content: ResolvedContent,
}

impl ResolvedRegion {
    /// The region's kind.
    #[must_use]
    pub fn kind(&self) -> RegionKind {
        match self.content {
            ResolvedContent::Text { .. } => RegionKind::Text,
            ResolvedContent::Image => RegionKind::Image,
            ResolvedContent::Graphic { .. } => RegionKind::Graphic,
        }
    }
}

/// A layout with absolute coordinates and finalized z-order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLayout {
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Regions in paint order: ascending z, ties by source position.
    pub regions: Vec<ResolvedRegion>,
}

impl ResolvedLayout {
    /// The earliest declared image region, if any.
    #[must_use]
    pub fn first_image_region(&self) -> Option<&ResolvedRegion> {
        self.regions
            .iter()
            .filter(|r| r.kind() == RegionKind::Image)
            .min_by_key(|r| r.index)
    }

    /// Text and graphic regions in paint order.
    pub fn overlay_regions(&self) -> impl Iterator<Item = &ResolvedRegion> {
        self.regions.iter().filter(|r| r.kind() != RegionKind::Image)
    }

    /// Looks up a region by its source position.
    #[must_use]
    pub fn region(&self, index: usize) -> Option<&ResolvedRegion> {
        self.regions.iter().find(|r| r.index == index)
    }
}
