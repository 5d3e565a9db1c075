//! Declarative layout specifications.
//!
//! A [`LayoutSpec`] describes regions in canvas-relative coordinates. It is
//! produced by the copy stage (or supplied by a caller) and turned into
//! absolute pixel instructions by the layout resolver.

use crate::errors::{AdflowError, ValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Kind of a layout region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// Rendered text.
    Text,
    /// Slot for the product layer.
    Image,
    /// Filled shape.
    Graphic,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Graphic => write!(f, "graphic"),
        }
    }
}

/// Region bounds relative to the canvas, each component in `0..1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeBounds {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
}

impl RelativeBounds {
    /// Creates new bounds.
    #[must_use]
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Returns true if every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }
}

/// Abstract font size token, resolved through a channel font scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontToken {
    /// Small.
    Sm,
    /// Medium.
    Md,
    /// Large.
    Lg,
    /// Extra large.
    Xl,
}

/// Font size: either absolute pixels or an abstract token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FontSize {
    /// Absolute pixel height.
    Px(u32),
    /// Abstract size token.
    Token(FontToken),
}

impl Default for FontSize {
    fn default() -> Self {
        Self::Token(FontToken::Md)
    }
}

/// Horizontal text alignment inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    /// Flush left.
    Left,
    /// Centred.
    #[default]
    Center,
    /// Flush right.
    Right,
}

/// An RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha.
    pub a: u8,
}

impl Color {
    /// Opaque white.
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    /// Opaque black.
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    /// Creates an opaque colour.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses `#RRGGBB` or `#RRGGBBAA`.
    pub fn parse_hex(value: &str) -> Result<Self, ValidationError> {
        static HEX: OnceLock<Option<Regex>> = OnceLock::new();
        let re = HEX
            .get_or_init(|| Regex::new(r"^#([0-9a-fA-F]{6})([0-9a-fA-F]{2})?$").ok())
            .as_ref()
            .ok_or_else(|| ValidationError::new("colour pattern unavailable"))?;
        let caps = re
            .captures(value.trim())
            .ok_or_else(|| ValidationError::field("color", format!("invalid colour '{value}'")))?;
        let channel = |s: &str| u8::from_str_radix(s, 16).unwrap_or(0);
        let rgb = &caps[1];
        let a = caps.get(2).map_or(255, |m| channel(m.as_str()));
        Ok(Self {
            r: channel(&rgb[0..2]),
            g: channel(&rgb[2..4]),
            b: channel(&rgb[4..6]),
            a,
        })
    }

    /// Returns the colour as `[r, g, b, a]`.
    #[must_use]
    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02X}", self.a)?;
        }
        Ok(())
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Type-specific region style. Colours are kept as hex strings and parsed
/// during resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStyle {
    /// Font family name (informational; the built-in glyph set is used).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    /// Font size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<FontSize>,
    /// Text colour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Fill colour for graphics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    /// Horizontal alignment for text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<TextAlign>,
}

/// One region of a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Region kind.
    #[serde(rename = "type")]
    pub kind: RegionKind,
    /// Relative bounds.
    pub bounds: RelativeBounds,
    /// Stacking order; higher draws later.
    #[serde(default)]
    pub z: i32,
    /// Style.
    #[serde(default)]
    pub style: RegionStyle,
    /// Text content, required for text regions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Region {
    /// Creates a text region.
    #[must_use]
    pub fn text(bounds: RelativeBounds, text: impl Into<String>) -> Self {
        Self {
            kind: RegionKind::Text,
            bounds,
            z: 0,
            style: RegionStyle::default(),
            text: Some(text.into()),
        }
    }

    /// Creates an image slot.
    #[must_use]
    pub fn image(bounds: RelativeBounds) -> Self {
        Self {
            kind: RegionKind::Image,
            bounds,
            z: 0,
            style: RegionStyle::default(),
            text: None,
        }
    }

    /// Creates a filled graphic.
    #[must_use]
    pub fn graphic(bounds: RelativeBounds, fill: impl Into<String>) -> Self {
        Self {
            kind: RegionKind::Graphic,
            bounds,
            z: 0,
            style: RegionStyle {
                fill: Some(fill.into()),
                ..RegionStyle::default()
            },
            text: None,
        }
    }

    /// Sets the z-order.
    #[must_use]
    pub fn with_z(mut self, z: i32) -> Self {
        self.z = z;
        self
    }

    /// Sets the font size.
    #[must_use]
    pub fn with_font_size(mut self, size: FontSize) -> Self {
        self.style.font_size = Some(size);
        self
    }

    /// Sets the text colour.
    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.style.color = Some(color.into());
        self
    }

    /// Sets the text alignment.
    #[must_use]
    pub fn with_align(mut self, align: TextAlign) -> Self {
        self.style.align = Some(align);
        self
    }
}

/// An ordered list of regions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutSpec {
    /// Regions in declaration order.
    pub regions: Vec<Region>,
    /// Overrides the configured overlap policy when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_overlap: Option<bool>,
}

impl LayoutSpec {
    /// Creates an empty layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a region.
    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    /// Sets the overlap override.
    #[must_use]
    pub fn with_allow_overlap(mut self, allow: bool) -> Self {
        self.allow_overlap = Some(allow);
        self
    }

    /// Parses a layout from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, AdflowError> {
        serde_json::from_str(json).map_err(|e| {
            AdflowError::Validation(ValidationError::field("layout", format!("invalid layout JSON: {e}")))
        })
    }
}
