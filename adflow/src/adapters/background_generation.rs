//! Background synthesis.

use super::copywriting::MANDATORY_NEGATIVES;
use super::{encode_output, keys, run_blocking, with_timeout, ProviderError};
use super::{StageAdapter, StageInput};
use crate::core::{Artifact, StageId};
use crate::errors::{AdapterError, ValidationError};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// What to synthesize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    /// Scene description.
    pub prompt: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Brand or style identifier.
    pub style_id: Option<String>,
}

impl SynthesisRequest {
    /// Reads a request from a background generation stage input.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the prompt or a dimension is
    /// missing.
    pub fn from_input(input: &StageInput) -> Result<Self, ValidationError> {
        Ok(Self {
            prompt: input.require_str(keys::PROMPT)?.to_string(),
            width: input.require_dimension(keys::WIDTH)?,
            height: input.require_dimension(keys::HEIGHT)?,
            style_id: input.str_param(keys::STYLE_ID).map(str::to_string),
        })
    }
}

/// External background synthesis contract.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Produces an opaque background of the requested size.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<RgbaImage, ProviderError>;
}

/// Vertical two-colour gradient picked from prompt keywords.
///
/// The colour order comes from the prompt hash, so the same request always
/// yields the same bitmap.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientBackgroundProvider;

impl GradientBackgroundProvider {
    /// Creates the synthesizer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the offending word if the prompt asks for text or branding.
    ///
    /// The mandatory negative clauses are removed before checking.
    #[must_use]
    pub fn forbidden_token(prompt: &str) -> Option<String> {
        static FORBIDDEN: OnceLock<Option<Regex>> = OnceLock::new();
        let re = FORBIDDEN
            .get_or_init(|| Regex::new(r"(?i)\b(texts?|logos?|watermarks?)\b").ok())
            .as_ref()?;
        let mut cleaned = prompt.to_lowercase();
        for clause in MANDATORY_NEGATIVES {
            cleaned = cleaned.replace(clause, " ");
        }
        re.find(&cleaned).map(|m| m.as_str().to_string())
    }

    /// The two gradient colours for a prompt, top first.
    #[must_use]
    pub fn palette(request: &SynthesisRequest) -> ([u8; 3], [u8; 3]) {
        let lower = request.prompt.to_lowercase();
        let (a, b) = if lower.contains("luxury") || lower.contains("premium") {
            ([40, 30, 20], [90, 70, 50])
        } else if lower.contains("warm") || lower.contains("cozy") {
            ([120, 80, 50], [220, 180, 140])
        } else {
            ([200, 200, 200], [245, 245, 245])
        };

        let mut hasher = Sha256::new();
        hasher.update(request.prompt.as_bytes());
        if let Some(style) = &request.style_id {
            hasher.update(b"\n");
            hasher.update(style.as_bytes());
        }
        if hasher.finalize()[0] & 1 == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Renders the gradient synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Refused`] if the prompt asks for text,
    /// logos or watermarks.
    pub fn synthesize_sync(request: &SynthesisRequest) -> Result<RgbaImage, ProviderError> {
        if let Some(token) = Self::forbidden_token(&request.prompt) {
            return Err(ProviderError::Refused(format!(
                "background prompt must not ask for '{token}'"
            )));
        }
        let (top, bottom) = Self::palette(request);
        let span = request.height.saturating_sub(1).max(1);
        let mut img = RgbaImage::new(request.width, request.height);
        for y in 0..request.height {
            let t = y.min(span);
            let mut px = [0u8, 0, 0, 255];
            for i in 0..3 {
                let mixed = (u32::from(top[i]) * (span - t) + u32::from(bottom[i]) * t) / span;
                px[i] = u8::try_from(mixed).unwrap_or(u8::MAX);
            }
            for x in 0..request.width {
                img.put_pixel(x, y, Rgba(px));
            }
        }
        Ok(img)
    }
}

#[async_trait]
impl SynthesisProvider for GradientBackgroundProvider {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<RgbaImage, ProviderError> {
        let request = request.clone();
        run_blocking(move || Self::synthesize_sync(&request)).await
    }
}

/// Background generation stage adapter.
#[derive(Debug)]
pub struct BackgroundGenerationAdapter<P> {
    provider: P,
}

impl<P: SynthesisProvider> BackgroundGenerationAdapter<P> {
    /// Wraps a provider.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: SynthesisProvider> StageAdapter for BackgroundGenerationAdapter<P> {
    fn stage(&self) -> StageId {
        StageId::BackgroundGeneration
    }

    fn validate(&self, input: &StageInput) -> Result<(), ValidationError> {
        SynthesisRequest::from_input(input).map(|_| ())
    }

    async fn invoke(&self, input: &StageInput, timeout: Duration) -> Result<Artifact, AdapterError> {
        let request = SynthesisRequest::from_input(input)?;
        let background = with_timeout(timeout, async {
            self.provider.synthesize(&request).await.map_err(AdapterError::from)
        })
        .await?;

        if background.dimensions() != (request.width, request.height) {
            return Err(AdapterError::transient(format!(
                "malformed response: expected {}x{}, got {}x{}",
                request.width,
                request.height,
                background.width(),
                background.height()
            )));
        }
        debug!(width = request.width, height = request.height, "Synthesized background");
        encode_output(&background)
    }
}
