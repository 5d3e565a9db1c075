//! Stage identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies one stage of the creative pipeline.
///
/// The declaration order is the default execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Ad copy, background prompt and layout generation.
    Copywriting,
    /// Product cutout (segmentation).
    BackgroundRemoval,
    /// Text-to-image background synthesis.
    BackgroundGeneration,
    /// Lighting harmonization of cutout and background.
    LightingComposite,
    /// Deterministic text/graphic compositing.
    Compose,
    /// Super-resolution.
    Upscale,
}

impl StageId {
    /// All stages in default execution order.
    pub const ALL: [Self; 6] = [
        Self::Copywriting,
        Self::BackgroundRemoval,
        Self::BackgroundGeneration,
        Self::LightingComposite,
        Self::Compose,
        Self::Upscale,
    ];

    /// Returns the snake_case name of the stage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copywriting => "copywriting",
            Self::BackgroundRemoval => "background_removal",
            Self::BackgroundGeneration => "background_generation",
            Self::LightingComposite => "lighting_composite",
            Self::Compose => "compose",
            Self::Upscale => "upscale",
        }
    }

    /// Returns true if the stage calls an external service.
    #[must_use]
    pub fn is_external(&self) -> bool {
        !matches!(self, Self::Compose)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display_round_trips_through_from_str() {
        for stage in StageId::ALL {
            assert_eq!(stage.to_string().parse::<StageId>(), Ok(stage));
        }
        assert!("render".parse::<StageId>().is_err());
    }

    #[test]
    fn test_only_compose_is_internal() {
        let internal: Vec<_> = StageId::ALL.into_iter().filter(|s| !s.is_external()).collect();
        assert_eq!(internal, vec![StageId::Compose]);
    }

    #[test]
    fn test_stage_serialize() {
        let json = serde_json::to_string(&StageId::LightingComposite).unwrap();
        assert_eq!(json, r#""lighting_composite""#);
    }
}
