//! Copy and layout planning.

use super::{keys, with_timeout, ProviderError, StageAdapter, StageInput};
use crate::core::{
    Artifact, Channel, FontSize, FontToken, LayoutSpec, Region, RelativeBounds, StageId, Tone,
};
use crate::errors::{AdapterError, ValidationError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Clauses every background prompt must carry.
pub const MANDATORY_NEGATIVES: [&str; 3] = ["no text", "no logo", "no watermark"];

const HEADLINE_MAX: usize = 20;
const SUBCOPY_MAX: usize = 40;
const EMPHASIS_COLOR: &str = "#FF4D4D";
const TEXT_COLOR: &str = "#FFFFFF";
const BUTTON_FILL: &str = "#00000099";
const HINT_BLACKLIST: [&str; 3] = ["text", "logo", "watermark"];

/// Everything the copy stage knows about the creative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyBrief {
    /// Product name, or the brief when no name was given.
    pub subject: String,
    /// Free-text brief.
    pub brief: String,
    /// Target channel.
    pub channel: Channel,
    /// Copy locale.
    pub locale: String,
    /// Copy tone.
    pub tone: Tone,
    /// Discount text, e.g. `50% OFF`.
    pub discount: Option<String>,
    /// Extra mood hint for the background.
    pub mood_hint: Option<String>,
    /// Brand or style identifier.
    pub style_id: Option<String>,
    /// Relative safe-area margin of the channel.
    pub safe_margin: f64,
}

impl CopyBrief {
    /// Reads a brief from a copywriting stage input.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if a required parameter is missing or
    /// malformed.
    pub fn from_input(input: &StageInput) -> Result<Self, ValidationError> {
        let brief = input.str_param(keys::BRIEF).unwrap_or_default().to_string();
        let product_name = input.str_param(keys::PRODUCT_NAME).map(str::to_string);
        let subject = product_name.clone().unwrap_or_else(|| brief.clone());
        if subject.is_empty() {
            return Err(ValidationError::field(keys::BRIEF, "a brief or product name is required")
                .with_stage(input.stage()));
        }

        let channel: Channel = input
            .require_str(keys::CHANNEL)?
            .parse()
            .map_err(|e: ValidationError| e.with_stage(input.stage()))?;
        let tone = match input.param(keys::TONE) {
            Some(_) => input.require_typed::<Tone>(keys::TONE)?,
            None => Tone::default(),
        };
        let safe_margin = input
            .param(keys::SAFE_MARGIN)
            .and_then(serde_json::Value::as_f64)
            .filter(|m| m.is_finite() && (0.0..0.5).contains(m))
            .ok_or_else(|| {
                ValidationError::field(keys::SAFE_MARGIN, "must be a number in [0, 0.5)")
                    .with_stage(input.stage())
            })?;

        Ok(Self {
            subject,
            brief,
            channel,
            locale: input.require_str(keys::LOCALE)?.to_string(),
            tone,
            discount: input.str_param(keys::DISCOUNT).map(str::to_string),
            mood_hint: input.str_param(keys::MOOD_HINT).map(str::to_string),
            style_id: input.str_param(keys::STYLE_ID).map(str::to_string),
            safe_margin,
        })
    }
}

/// Output of the copy stage: ad copy, background prompt and layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyPlan {
    /// Main line.
    pub headline: String,
    /// Supporting line.
    pub subcopy: String,
    /// Call to action.
    pub cta: String,
    /// Prompt for the background synthesizer. Never asks for text.
    pub background_prompt: String,
    /// Text and graphic layout over the canvas.
    pub layout: LayoutSpec,
}

impl CopyPlan {
    /// Appends any missing mandatory negative clause to the prompt.
    #[must_use]
    pub fn with_enforced_negatives(mut self) -> Self {
        let lower = self.background_prompt.to_lowercase();
        let missing: Vec<&str> = MANDATORY_NEGATIVES
            .into_iter()
            .filter(|clause| !lower.contains(clause))
            .collect();
        if !missing.is_empty() {
            let mut parts = vec![self.background_prompt.trim().to_string()];
            parts.extend(missing.into_iter().map(str::to_string));
            self.background_prompt = parts.join(", ");
        }
        self
    }
}

/// External copywriting contract.
#[async_trait]
pub trait CopyProvider: Send + Sync {
    /// Plans copy and layout for a brief.
    async fn plan(&self, brief: &CopyBrief) -> Result<CopyPlan, ProviderError>;
}

/// Rule-based planner with tone-dependent copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedCopyProvider;

impl RuleBasedCopyProvider {
    /// Creates the planner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Plans synchronously.
    #[must_use]
    pub fn plan_sync(&self, brief: &CopyBrief) -> CopyPlan {
        let subject = brief.subject.trim();
        let headline = brief.discount.as_deref().map_or_else(
            || format!("Meet {subject} now"),
            |d| format!("Today only {d}"),
        );
        let (subcopy, cta) = match brief.tone {
            Tone::Premium => (
                format!("The deep charm of {subject}, in a premium mood."),
                "Book now",
            ),
            Tone::Emotional => (format!("A warm moment with {subject}."), "Check it out"),
            Tone::Casual => (format!("Enjoy {subject}, easy and light!"), "See now"),
        };

        let headline = truncate(&headline, HEADLINE_MAX);
        let subcopy = truncate(&subcopy, SUBCOPY_MAX);
        let emphasis = brief
            .discount
            .as_ref()
            .and_then(|_| percent_phrase(&headline));
        let layout = plan_layout(brief, &headline, &subcopy, cta, emphasis.as_deref());

        CopyPlan {
            background_prompt: background_prompt(brief),
            headline,
            subcopy,
            cta: cta.to_string(),
            layout,
        }
    }
}

#[async_trait]
impl CopyProvider for RuleBasedCopyProvider {
    async fn plan(&self, brief: &CopyBrief) -> Result<CopyPlan, ProviderError> {
        Ok(self.plan_sync(brief))
    }
}

/// Cuts `text` to at most `max` characters, ellipsis included.
fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

fn percent_phrase(text: &str) -> Option<String> {
    static PERCENT: OnceLock<Option<Regex>> = OnceLock::new();
    let re = PERCENT.get_or_init(|| Regex::new(r"(\d+\s?%)").ok()).as_ref()?;
    re.captures(text).map(|c| c[1].replace(' ', ""))
}

fn background_prompt(brief: &CopyBrief) -> String {
    let mut parts: Vec<String> = vec![
        "high quality background for advertisement".into(),
        format!("{}-friendly composition", brief.channel),
        "soft depth of field".into(),
        "clean scene".into(),
    ];
    parts.extend(MANDATORY_NEGATIVES.iter().map(|s| (*s).to_string()));

    let mood: &[&str] = match brief.tone {
        Tone::Premium => &[
            "luxury cafe mood",
            "premium interior",
            "warm but elegant lighting",
            "wood texture",
        ],
        Tone::Emotional => &[
            "warm cozy cafe mood",
            "soft warm lighting",
            "wooden table",
            "gentle bokeh",
        ],
        Tone::Casual => &[
            "bright friendly cafe mood",
            "natural lighting",
            "wooden table",
            "simple clean",
        ],
    };
    parts.extend(mood.iter().map(|s| (*s).to_string()));
    parts.push(format!("fits well with {}", brief.subject.trim()));

    // Hints asking for text or branding are dropped entirely.
    if let Some(hint) = brief.mood_hint.as_deref().map(str::trim) {
        let lower = hint.to_lowercase();
        if !hint.is_empty() && !HINT_BLACKLIST.iter().any(|b| lower.contains(b)) {
            parts.push(hint.to_string());
        }
    }
    parts.join(", ")
}

/// Headline at the top of the safe area, subcopy and CTA button at the
/// bottom. A discount phrase found in the headline is repeated below it in
/// the emphasis colour, one font step larger than the headline.
fn plan_layout(
    brief: &CopyBrief,
    headline: &str,
    subcopy: &str,
    cta: &str,
    emphasis: Option<&str>,
) -> LayoutSpec {
    let m = brief.safe_margin.clamp(0.0, 0.25);
    let width = 1.0 - 2.0 * m;
    let headline_size = if brief.tone == Tone::Premium {
        FontToken::Lg
    } else {
        FontToken::Xl
    };
    let cta_bounds = RelativeBounds::new(0.3, 1.0 - m - 0.1, 0.4, 0.1);

    let mut layout = LayoutSpec::new().with_region(
        Region::text(RelativeBounds::new(m, m, width, 0.18), headline)
            .with_z(2)
            .with_font_size(FontSize::Token(headline_size))
            .with_color(TEXT_COLOR),
    );
    if let Some(phrase) = emphasis {
        let emphasis_size = match headline_size {
            FontToken::Sm => FontToken::Md,
            FontToken::Md => FontToken::Lg,
            FontToken::Lg | FontToken::Xl => FontToken::Xl,
        };
        layout = layout.with_region(
            Region::text(RelativeBounds::new(m, m + 0.18, width, 0.1), phrase)
                .with_z(4)
                .with_font_size(FontSize::Token(emphasis_size))
                .with_color(EMPHASIS_COLOR),
        );
    }

    layout
        .with_region(
            Region::text(RelativeBounds::new(m, 1.0 - m - 0.22, width, 0.1), subcopy)
                .with_z(2)
                .with_font_size(FontSize::Token(FontToken::Md))
                .with_color(TEXT_COLOR),
        )
        .with_region(Region::graphic(cta_bounds, BUTTON_FILL).with_z(1))
        .with_region(
            Region::text(cta_bounds, cta)
                .with_z(3)
                .with_font_size(FontSize::Token(FontToken::Md))
                .with_color(TEXT_COLOR),
        )
}

/// Copywriting stage adapter.
#[derive(Debug)]
pub struct CopywritingAdapter<P> {
    provider: P,
}

impl<P: CopyProvider> CopywritingAdapter<P> {
    /// Wraps a provider.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: CopyProvider> StageAdapter for CopywritingAdapter<P> {
    fn stage(&self) -> StageId {
        StageId::Copywriting
    }

    fn validate(&self, input: &StageInput) -> Result<(), ValidationError> {
        CopyBrief::from_input(input).map(|_| ())
    }

    async fn invoke(&self, input: &StageInput, timeout: Duration) -> Result<Artifact, AdapterError> {
        let brief = CopyBrief::from_input(input)?;
        let plan = with_timeout(timeout, async {
            self.provider.plan(&brief).await.map_err(AdapterError::from)
        })
        .await?;

        if plan.headline.trim().is_empty() || plan.background_prompt.trim().is_empty() {
            return Err(AdapterError::transient(
                "malformed response: copy plan is missing a headline or prompt",
            ));
        }
        let plan = plan.with_enforced_negatives();
        debug!(
            channel = %brief.channel,
            tone = %brief.tone,
            regions = plan.layout.regions.len(),
            "Planned copy"
        );

        Artifact::from_json(&plan)
            .map_err(|e| AdapterError::transient(format!("could not encode copy plan: {e}")))
    }
}
