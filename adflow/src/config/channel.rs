//! Per-channel canvas profiles.

use crate::core::{Channel, FontSize, FontToken};
use serde::{Deserialize, Serialize};

/// Pixel sizes of the abstract font tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontScale {
    /// `sm` size.
    pub sm: u32,
    /// `md` size.
    pub md: u32,
    /// `lg` size.
    pub lg: u32,
    /// `xl` size.
    pub xl: u32,
}

impl FontScale {
    /// Resolves a font size to pixels.
    #[must_use]
    pub fn resolve(&self, size: FontSize) -> u32 {
        match size {
            FontSize::Px(px) => px,
            FontSize::Token(FontToken::Sm) => self.sm,
            FontSize::Token(FontToken::Md) => self.md,
            FontSize::Token(FontToken::Lg) => self.lg,
            FontSize::Token(FontToken::Xl) => self.xl,
        }
    }
}

/// Canvas and typography settings of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProfile {
    /// Composition canvas width.
    pub canvas_width: u32,
    /// Composition canvas height.
    pub canvas_height: u32,
    /// Final output width; upscale runs when the canvas is smaller.
    pub target_width: u32,
    /// Final output height.
    pub target_height: u32,
    /// Fraction of each edge kept free of generated copy.
    pub safe_margin: f64,
    /// Font token sizes.
    pub font_scale: FontScale,
}

impl ChannelProfile {
    /// The built-in profile of a channel.
    #[must_use]
    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Instagram => Self {
                canvas_width: 1080,
                canvas_height: 1080,
                target_width: 1080,
                target_height: 1080,
                safe_margin: 0.10,
                font_scale: FontScale { sm: 28, md: 42, lg: 64, xl: 84 },
            },
            Channel::Banner => Self {
                canvas_width: 1200,
                canvas_height: 628,
                target_width: 1200,
                target_height: 628,
                safe_margin: 0.15,
                font_scale: FontScale { sm: 21, md: 28, lg: 42, xl: 56 },
            },
            Channel::Poster => Self {
                canvas_width: 1080,
                canvas_height: 1528,
                target_width: 2160,
                target_height: 3056,
                safe_margin: 0.08,
                font_scale: FontScale { sm: 28, md: 42, lg: 70, xl: 98 },
            },
        }
    }

    /// Canvas size as `(width, height)`.
    #[must_use]
    pub fn canvas(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }

    /// Target size as `(width, height)`.
    #[must_use]
    pub fn target(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Returns true if an image of the given size needs no upscaling.
    #[must_use]
    pub fn meets_target(&self, width: u32, height: u32) -> bool {
        width >= self.target_width && height >= self.target_height
    }

    /// Checks the profile for unusable values.
    pub fn validate(&self) -> Result<(), String> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err("canvas size must be positive".to_string());
        }
        if self.target_width == 0 || self.target_height == 0 {
            return Err("target size must be positive".to_string());
        }
        if !(0.0..0.5).contains(&self.safe_margin) {
            return Err("safe_margin must be in [0, 0.5)".to_string());
        }
        let s = self.font_scale;
        if s.sm == 0 || s.md == 0 || s.lg == 0 || s.xl == 0 {
            return Err("font sizes must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles() {
        let insta = ChannelProfile::for_channel(Channel::Instagram);
        assert_eq!(insta.canvas(), (1080, 1080));
        assert!(insta.meets_target(1080, 1080));

        let poster = ChannelProfile::for_channel(Channel::Poster);
        assert_eq!(poster.target(), (2160, 3056));
        assert!(!poster.meets_target(1080, 1528));

        for channel in Channel::ALL {
            assert!(ChannelProfile::for_channel(channel).validate().is_ok());
        }
    }

    #[test]
    fn test_font_scale_resolve() {
        let scale = ChannelProfile::for_channel(Channel::Instagram).font_scale;
        assert_eq!(scale.resolve(FontSize::Token(FontToken::Xl)), 84);
        assert_eq!(scale.resolve(FontSize::Px(17)), 17);
    }

    #[test]
    fn test_invalid_margin() {
        let mut profile = ChannelProfile::for_channel(Channel::Banner);
        profile.safe_margin = 0.6;
        assert!(profile.validate().is_err());
    }
}
