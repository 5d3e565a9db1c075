//! Uniform wrappers around the external generative capabilities.
//!
//! Every stage except compose is backed by a [`StageAdapter`]. An adapter
//! validates its [`StageInput`], calls a provider under a time bound, and
//! maps every provider failure onto the [`AdapterError`] taxonomy. The
//! provider traits describe each external contract and come with local
//! implementations so a pipeline can run end to end offline.

mod background_generation;
mod background_removal;
mod copywriting;
mod lighting;
mod provider;
mod upscale;

pub use background_generation::{
    BackgroundGenerationAdapter, GradientBackgroundProvider, SynthesisProvider, SynthesisRequest,
};
pub use background_removal::{
    BackgroundRemovalAdapter, BorderColorSegmenter, SegmentationProvider,
};
pub use copywriting::{
    CopyBrief, CopyPlan, CopyProvider, CopywritingAdapter, RuleBasedCopyProvider,
    MANDATORY_NEGATIVES,
};
pub use lighting::{LightingCompositeAdapter, RelightProvider, ShadowRelighter};
pub use provider::ProviderError;
pub use upscale::{ResizeUpscaler, SuperResolutionProvider, UpscaleAdapter};

use crate::core::{Artifact, ContentType, StageId};
use crate::errors::{AdapterError, ValidationError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Names of stage input parameters and artifacts.
pub mod keys {
    /// Free-text brief.
    pub const BRIEF: &str = "brief";
    /// Product name.
    pub const PRODUCT_NAME: &str = "product_name";
    /// Target channel.
    pub const CHANNEL: &str = "channel";
    /// Copy locale.
    pub const LOCALE: &str = "locale";
    /// Copy tone.
    pub const TONE: &str = "tone";
    /// Discount text.
    pub const DISCOUNT: &str = "discount";
    /// Extra mood hint for the background.
    pub const MOOD_HINT: &str = "mood_hint";
    /// Brand or style identifier.
    pub const STYLE_ID: &str = "style_id";
    /// Safe-area margin of the channel.
    pub const SAFE_MARGIN: &str = "safe_margin";
    /// Background prompt.
    pub const PROMPT: &str = "prompt";
    /// Output width.
    pub const WIDTH: &str = "width";
    /// Output height.
    pub const HEIGHT: &str = "height";
    /// Overlap policy for the compose stage.
    pub const ALLOW_OVERLAP: &str = "allow_overlap";
    /// Font scale for the compose stage.
    pub const FONT_SCALE: &str = "font_scale";

    /// The source product image.
    pub const PRODUCT_IMAGE: &str = "product_image";
    /// The copy plan produced by the copywriting stage.
    pub const COPY_PLAN: &str = "copy_plan";
    /// The product cutout.
    pub const CUTOUT: &str = "cutout";
    /// The generated background.
    pub const BACKGROUND: &str = "background";
    /// The harmonized product layer.
    pub const PRODUCT_LAYER: &str = "product_layer";
    /// The low-resolution composite.
    pub const COMPOSITE: &str = "composite";
}

/// Fully resolved input of one stage.
///
/// Parameters and artifacts are kept in sorted maps, so the canonical hash
/// does not depend on insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInput {
    stage: StageId,
    params: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    artifacts: BTreeMap<String, Artifact>,
}

impl StageInput {
    /// Creates an empty input for `stage`.
    #[must_use]
    pub fn new(stage: StageId) -> Self {
        Self {
            stage,
            params: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Adds a parameter if present.
    #[must_use]
    pub fn with_optional_param<V: Into<serde_json::Value>>(
        self,
        name: impl Into<String>,
        value: Option<V>,
    ) -> Self {
        match value {
            Some(v) => self.with_param(name, v),
            None => self,
        }
    }

    /// Adds an input artifact.
    #[must_use]
    pub fn with_artifact(mut self, name: impl Into<String>, artifact: Artifact) -> Self {
        self.artifacts.insert(name.into(), artifact);
        self
    }

    /// The stage this input is for.
    #[must_use]
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// All parameters.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.params
    }

    /// All input artifacts.
    #[must_use]
    pub fn artifacts(&self) -> &BTreeMap<String, Artifact> {
        &self.artifacts
    }

    /// Looks up a raw parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(name)
    }

    /// Returns a string parameter, if present and non-blank.
    #[must_use]
    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Returns a required string parameter.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the parameter if it is missing
    /// or blank.
    pub fn require_str(&self, name: &str) -> Result<&str, ValidationError> {
        self.str_param(name).ok_or_else(|| {
            ValidationError::field(name, "required parameter is missing").with_stage(self.stage)
        })
    }

    /// Returns a required positive dimension parameter.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the parameter is missing, not an
    /// integer, zero, or larger than `u32::MAX`.
    pub fn require_dimension(&self, name: &str) -> Result<u32, ValidationError> {
        self.params
            .get(name)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                ValidationError::field(name, "must be a positive integer").with_stage(self.stage)
            })
    }

    /// Deserializes a required parameter.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the parameter is missing or has the
    /// wrong shape.
    pub fn require_typed<T: DeserializeOwned>(&self, name: &str) -> Result<T, ValidationError> {
        let value = self.params.get(name).ok_or_else(|| {
            ValidationError::field(name, "required parameter is missing").with_stage(self.stage)
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::field(name, e.to_string()).with_stage(self.stage))
    }

    /// Returns a required input artifact.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the artifact is missing.
    pub fn artifact(&self, name: &str) -> Result<&Artifact, ValidationError> {
        self.artifacts.get(name).ok_or_else(|| {
            ValidationError::field(name, "required input artifact is missing")
                .with_stage(self.stage)
        })
    }

    /// Returns a required input artifact with the given content type.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the artifact is missing or has a
    /// different content type.
    pub fn typed_artifact(
        &self,
        name: &str,
        content_type: ContentType,
    ) -> Result<&Artifact, ValidationError> {
        let artifact = self.artifact(name)?;
        if artifact.content_type() != content_type {
            return Err(ValidationError::field(
                name,
                format!("expected {content_type}, got {}", artifact.content_type()),
            )
            .with_stage(self.stage));
        }
        Ok(artifact)
    }

    /// Canonical hash of the input: SHA-256 over the stage id, the sorted
    /// parameter JSON, and each input artifact's name and content hash.
    #[must_use]
    pub fn canonical_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.stage.as_str().as_bytes());
        hasher.update(b"\n");
        // BTreeMap keys serialize sorted; nested objects are sorted by serde_json's Map.
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        hasher.update(params.as_bytes());
        for (name, artifact) in &self.artifacts {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(artifact.content_hash().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Uniform contract of one external generative capability.
#[async_trait]
pub trait StageAdapter: Send + Sync {
    /// The stage this adapter serves.
    fn stage(&self) -> StageId;

    /// Checks the input schema. Runs before any external call.
    fn validate(&self, input: &StageInput) -> Result<(), ValidationError>;

    /// Calls the capability, bounded by `timeout`.
    async fn invoke(&self, input: &StageInput, timeout: Duration) -> Result<Artifact, AdapterError>;
}

/// Runs `fut` with a time bound, mapping expiry to [`AdapterError::Timeout`].
///
/// # Errors
///
/// Returns the future's own error, or a timeout.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>> + Send,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| {
            Err(AdapterError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        })
}

/// Runs CPU-bound provider work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, ProviderError>
where
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ProviderError::Transport(format!("worker task failed: {e}")))?
}

/// Encodes a provider bitmap as an artifact.
pub(crate) fn encode_output(image: &image::RgbaImage) -> Result<Artifact, AdapterError> {
    Artifact::from_rgba(image)
        .map_err(|e| AdapterError::transient(format!("could not encode output: {e}")))
}

/// Decodes an input artifact as RGBA.
pub(crate) fn decode_input(
    input: &StageInput,
    name: &str,
) -> Result<image::RgbaImage, AdapterError> {
    let artifact = input.typed_artifact(name, ContentType::Png)?;
    artifact.decode_rgba().map_err(|e| {
        AdapterError::Validation(
            ValidationError::field(name, e.to_string()).with_stage(input.stage()),
        )
    })
}

/// Adapters by stage.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<StageId, Arc<dyn StageAdapter>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under the stage it reports.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn StageAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    /// Registers an adapter, replacing any previous one for its stage.
    pub fn insert(&mut self, adapter: Arc<dyn StageAdapter>) {
        self.adapters.insert(adapter.stage(), adapter);
    }

    /// Looks up the adapter for a stage.
    #[must_use]
    pub fn get(&self, stage: StageId) -> Option<Arc<dyn StageAdapter>> {
        self.adapters.get(&stage).cloned()
    }

    /// Returns true if an adapter is registered for `stage`.
    #[must_use]
    pub fn contains(&self, stage: StageId) -> bool {
        self.adapters.contains_key(&stage)
    }

    /// Registers the local providers for every external stage.
    #[must_use]
    pub fn local() -> Self {
        Self::new()
            .with_adapter(Arc::new(CopywritingAdapter::new(RuleBasedCopyProvider::new())))
            .with_adapter(Arc::new(BackgroundRemovalAdapter::new(BorderColorSegmenter::new())))
            .with_adapter(Arc::new(BackgroundGenerationAdapter::new(
                GradientBackgroundProvider::new(),
            )))
            .with_adapter(Arc::new(LightingCompositeAdapter::new(ShadowRelighter::new())))
            .with_adapter(Arc::new(UpscaleAdapter::new(ResizeUpscaler::new())))
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut stages: Vec<_> = self.adapters.keys().copied().collect();
        stages.sort();
        f.debug_struct("AdapterRegistry").field("stages", &stages).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png() -> Artifact {
        Artifact::from_rgba(&RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255]))).unwrap()
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let a = StageInput::new(StageId::BackgroundGeneration)
            .with_param("prompt", "x")
            .with_param("width", 10);
        let b = StageInput::new(StageId::BackgroundGeneration)
            .with_param("width", 10)
            .with_param("prompt", "x");
        assert_eq!(a.canonical_hash(), b.canonical_hash());
    }

    #[test]
    fn test_hash_covers_stage_params_and_artifacts() {
        let base = StageInput::new(StageId::Upscale).with_param("width", 10);
        let other_stage = StageInput::new(StageId::Compose).with_param("width", 10);
        let other_param = StageInput::new(StageId::Upscale).with_param("width", 11);
        let with_art = base.clone().with_artifact("composite", png());

        let hashes = [
            base.canonical_hash(),
            other_stage.canonical_hash(),
            other_param.canonical_hash(),
            with_art.canonical_hash(),
        ];
        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(hashes[0].len(), 64);
    }

    #[test]
    fn test_param_helpers() {
        let input = StageInput::new(StageId::Upscale)
            .with_param("width", 2160)
            .with_param("height", 0)
            .with_param("name", "  ")
            .with_optional_param::<String>("absent", None);

        assert_eq!(input.require_dimension("width").unwrap(), 2160);
        assert!(input.require_dimension("height").is_err());
        assert!(input.require_str("name").is_err());
        assert_eq!(input.param("absent"), None);

        let err = input.artifact("composite").unwrap_err();
        assert_eq!(err.field.as_deref(), Some("composite"));
        assert_eq!(err.stage, Some(StageId::Upscale));
    }

    #[test]
    fn test_typed_artifact() {
        let json = Artifact::from_json(&serde_json::json!({"k": 1})).unwrap();
        let input = StageInput::new(StageId::Upscale)
            .with_artifact("composite", json)
            .with_artifact("other", png());
        assert!(input.typed_artifact("composite", ContentType::Png).is_err());
        assert!(input.typed_artifact("other", ContentType::Png).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, AdapterError>(1)
        };
        let err = with_timeout(Duration::from_millis(100), slow).await.unwrap_err();
        assert_eq!(err, AdapterError::Timeout { timeout_ms: 100 });

        let fast = async { Ok::<_, AdapterError>(2) };
        assert_eq!(with_timeout(Duration::from_millis(100), fast).await.unwrap(), 2);
    }

    #[test]
    fn test_local_registry_covers_external_stages() {
        let registry = AdapterRegistry::local();
        for stage in StageId::ALL {
            assert_eq!(registry.contains(stage), stage.is_external());
        }
    }
}
