//! Creative requests.

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target channel of a creative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Square social feed post.
    Instagram,
    /// Wide web banner.
    Banner,
    /// Tall print poster.
    Poster,
}

impl Channel {
    /// All channels.
    pub const ALL: [Self; 3] = [Self::Instagram, Self::Banner, Self::Poster];

    /// Returns the lowercase channel name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Banner => "banner",
            Self::Poster => "poster",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ValidationError::field("channel", format!("unknown channel '{s}'")))
    }
}

/// Voice of the generated copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    /// Light and friendly.
    #[default]
    Casual,
    /// Refined, launch-style.
    Premium,
    /// Warm and sentimental.
    Emotional,
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Casual => write!(f, "casual"),
            Self::Premium => write!(f, "premium"),
            Self::Emotional => write!(f, "emotional"),
        }
    }
}

/// Reference to a product image, resolved through an `ImageSource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductImageRef(String);

impl ProductImageRef {
    /// Creates a new reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the reference string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A creative brief submitted to the orchestrator.
///
/// Immutable once submitted; the orchestrator only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreativeRequest {
    /// Product images; the first one is the primary product.
    pub product_images: Vec<ProductImageRef>,
    /// Free-text brief.
    pub brief: String,
    /// Target channel.
    pub channel: Channel,
    /// Locale of the copy, e.g. `en-US`.
    pub locale: String,
    /// Optional brand or style identifier.
    #[serde(default)]
    pub style_id: Option<String>,
    /// Optional product name used by the copy stage.
    #[serde(default)]
    pub product_name: Option<String>,
    /// Voice of the copy.
    #[serde(default)]
    pub tone: Tone,
    /// Optional discount text, e.g. `50% OFF`.
    #[serde(default)]
    pub discount: Option<String>,
    /// Optional mood hint appended to the background prompt.
    #[serde(default)]
    pub mood_hint: Option<String>,
}

impl CreativeRequest {
    /// Starts building a request for one product image.
    #[must_use]
    pub fn builder(product_image: impl Into<String>, channel: Channel) -> CreativeRequestBuilder {
        CreativeRequestBuilder::new(product_image, channel)
    }

    /// Returns the primary product image.
    #[must_use]
    pub fn primary_image(&self) -> Option<&ProductImageRef> {
        self.product_images.first()
    }

    /// Returns the product name, falling back to the brief.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.product_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.brief.trim())
    }

    /// Validates the request before any stage runs.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.product_images.is_empty() {
            return Err(ValidationError::field(
                "product_images",
                "at least one product image is required",
            ));
        }
        if self.product_images.iter().any(|r| r.as_str().trim().is_empty()) {
            return Err(ValidationError::field(
                "product_images",
                "product image reference must not be empty",
            ));
        }
        if self.brief.trim().is_empty() && self.subject().is_empty() {
            return Err(ValidationError::field("brief", "brief must not be empty"));
        }
        if self.locale.trim().is_empty() {
            return Err(ValidationError::field("locale", "locale must not be empty"));
        }
        Ok(())
    }
}

/// Builder for [`CreativeRequest`].
#[derive(Debug, Clone)]
pub struct CreativeRequestBuilder {
    request: CreativeRequest,
}

impl CreativeRequestBuilder {
    /// Creates a builder with an empty brief and the `en-US` locale.
    #[must_use]
    pub fn new(product_image: impl Into<String>, channel: Channel) -> Self {
        Self {
            request: CreativeRequest {
                product_images: vec![ProductImageRef::new(product_image)],
                brief: String::new(),
                channel,
                locale: "en-US".to_string(),
                style_id: None,
                product_name: None,
                tone: Tone::default(),
                discount: None,
                mood_hint: None,
            },
        }
    }

    /// Adds another product image.
    #[must_use]
    pub fn with_image(mut self, reference: impl Into<String>) -> Self {
        self.request.product_images.push(ProductImageRef::new(reference));
        self
    }

    /// Sets the brief.
    #[must_use]
    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.request.brief = brief.into();
        self
    }

    /// Sets the locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.request.locale = locale.into();
        self
    }

    /// Sets the style identifier.
    #[must_use]
    pub fn with_style_id(mut self, style_id: impl Into<String>) -> Self {
        self.request.style_id = Some(style_id.into());
        self
    }

    /// Sets the product name.
    #[must_use]
    pub fn with_product_name(mut self, name: impl Into<String>) -> Self {
        self.request.product_name = Some(name.into());
        self
    }

    /// Sets the tone.
    #[must_use]
    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.request.tone = tone;
        self
    }

    /// Sets the discount text.
    #[must_use]
    pub fn with_discount(mut self, discount: impl Into<String>) -> Self {
        self.request.discount = Some(discount.into());
        self
    }

    /// Sets the mood hint.
    #[must_use]
    pub fn with_mood_hint(mut self, hint: impl Into<String>) -> Self {
        self.request.mood_hint = Some(hint.into());
        self
    }

    /// Finishes the request.
    #[must_use]
    pub fn build(self) -> CreativeRequest {
        self.request
    }
}
