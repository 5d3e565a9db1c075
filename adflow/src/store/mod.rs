//! Content-addressed storage of stage outputs.
//!
//! Artifacts are keyed by the stage that produced them and the canonical
//! hash of that stage's resolved input. Identical inputs therefore map to
//! the same entry across runs.

mod memory;
mod single_flight;

pub use memory::InMemoryArtifactStore;
pub use single_flight::{FlightGuard, SingleFlight};

use crate::core::{Artifact, StageId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache identity of a stage output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// The producing stage.
    pub stage: StageId,
    /// Canonical hash of the stage's resolved input.
    pub input_hash: String,
}

impl ArtifactKey {
    /// Creates a key.
    #[must_use]
    pub fn new(stage: StageId, input_hash: impl Into<String>) -> Self {
        Self {
            stage,
            input_hash: input_hash.into(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.input_hash.get(..12).unwrap_or(&self.input_hash);
        write!(f, "{}:{}", self.stage, short)
    }
}

/// Storage backend for stage artifacts.
///
/// Implementations must be safe for concurrent reads and writes from
/// independent runs.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Looks up an artifact.
    async fn get(&self, key: &ArtifactKey) -> Option<Artifact>;

    /// Stores an artifact, replacing any previous entry for the key.
    async fn put(&self, key: ArtifactKey, artifact: Artifact);
}
