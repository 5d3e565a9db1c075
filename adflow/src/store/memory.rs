//! In-memory artifact store.

use super::{ArtifactKey, ArtifactStore};
use crate::core::Artifact;
use async_trait::async_trait;
use dashmap::DashMap;

/// An in-memory [`ArtifactStore`].
///
/// Payloads are deduplicated by content hash: two keys resolving to the
/// same bytes share one allocation. Entries live until removed.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    index: DashMap<ArtifactKey, String>,
    blobs: DashMap<String, Artifact>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of distinct payloads.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Removes a key, dropping its payload once no other key references it.
    pub fn remove(&self, key: &ArtifactKey) -> Option<Artifact> {
        let (_, hash) = self.index.remove(key)?;
        let artifact = self.blobs.get(&hash).map(|a| a.clone());
        if !self.index.iter().any(|entry| *entry.value() == hash) {
            self.blobs.remove(&hash);
        }
        artifact
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.index.clear();
        self.blobs.clear();
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn get(&self, key: &ArtifactKey) -> Option<Artifact> {
        let hash = self.index.get(key)?.value().clone();
        self.blobs.get(&hash).map(|a| a.clone())
    }

    async fn put(&self, key: ArtifactKey, artifact: Artifact) {
        let hash = artifact.content_hash().to_string();
        self.blobs.entry(hash.clone()).or_insert(artifact);
        tracing::debug!(key = %key, content_hash = %hash, "Stored artifact");
        self.index.insert(key, hash);
    }
}
