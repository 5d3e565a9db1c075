//! Services the orchestrator calls around a run: caller authorization,
//! product image lookup, run persistence and notifications.

use crate::adapters::CopyPlan;
use crate::core::{
    Artifact, Channel, PipelineRun, ProductImageRef, RunContext, RunManifest, RunStatus, StageId,
    Tone,
};
use crate::errors::{AdflowError, ValidationError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

fn is_email(value: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

/// Decides whether a caller may submit runs.
pub trait AuthGate: Send + Sync {
    /// Returns an `Unauthorized` error if the caller is not allowed in.
    fn authorize(&self, context: &RunContext) -> Result<(), AdflowError>;
}

/// Admits any caller with a well-formed email address.
///
/// With `admin_only` set, only callers flagged as administrators or listed
/// in `admin_emails` are admitted.
#[derive(Debug, Clone, Default)]
pub struct EmailAuthGate {
    admin_only: bool,
    admin_emails: BTreeSet<String>,
}

impl EmailAuthGate {
    /// Creates a gate that admits every logged-in caller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the gate to administrators.
    #[must_use]
    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }

    /// Adds addresses treated as administrators.
    #[must_use]
    pub fn with_admin_emails<I, S>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.admin_emails
            .extend(emails.into_iter().map(|e| e.as_ref().trim().to_lowercase()));
        self
    }

    fn is_admin(&self, context: &RunContext) -> bool {
        context.is_admin || self.admin_emails.contains(&context.user_email)
    }
}

impl AuthGate for EmailAuthGate {
    fn authorize(&self, context: &RunContext) -> Result<(), AdflowError> {
        if !is_email(&context.user_email) {
            return Err(AdflowError::Unauthorized("login required".into()));
        }
        if self.admin_only && !self.is_admin(context) {
            return Err(AdflowError::Unauthorized(format!(
                "{} is not an administrator",
                context.user_email
            )));
        }
        Ok(())
    }
}

/// Resolves product image references to image artifacts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Loads the referenced image.
    async fn load(&self, reference: &ProductImageRef) -> Result<Artifact, AdflowError>;
}

/// Images held in memory, keyed by reference string.
#[derive(Debug, Default, Clone)]
pub struct InMemoryImageSource {
    images: Arc<DashMap<String, Artifact>>,
}

impl InMemoryImageSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an image under a reference.
    pub fn insert(&self, reference: impl Into<String>, image: Artifact) {
        self.images.insert(reference.into(), image);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_image(self, reference: impl Into<String>, image: Artifact) -> Self {
        self.insert(reference, image);
        self
    }
}

#[async_trait]
impl ImageSource for InMemoryImageSource {
    async fn load(&self, reference: &ProductImageRef) -> Result<Artifact, AdflowError> {
        self.images
            .get(reference.as_str())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ValidationError::field("product_images", format!("unknown product image '{reference}'"))
                    .into()
            })
    }
}

/// PNG files below a root directory.
///
/// References are relative paths; an optional `file://` prefix is ignored.
#[derive(Debug, Clone)]
pub struct FsImageSource {
    root: PathBuf,
}

impl FsImageSource {
    /// Creates a source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &ProductImageRef) -> Result<PathBuf, ValidationError> {
        let raw = reference.as_str();
        let relative = Path::new(raw.strip_prefix("file://").unwrap_or(raw));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.as_os_str().is_empty() || escapes {
            return Err(ValidationError::field(
                "product_images",
                format!("product image '{reference}' must be a relative path inside the image root"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    async fn load(&self, reference: &ProductImageRef) -> Result<Artifact, AdflowError> {
        let path = self.resolve(reference)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ValidationError::field(
                    "product_images",
                    format!("product image '{reference}' not found"),
                )
                .into());
            }
            Err(e) => {
                return Err(AdflowError::Internal(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        // Re-encode through the decoder so any readable format lands as PNG.
        let image = image::load_from_memory(&bytes)
            .map_err(|e| ValidationError::field("product_images", format!("unreadable image '{reference}': {e}")))?
            .to_rgba8();
        Artifact::from_rgba(&image)
    }
}

/// Ad copy recorded with a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRecord {
    /// Headline.
    pub headline: String,
    /// Supporting line.
    pub subcopy: String,
    /// Call to action.
    pub cta: String,
}

/// What gets persisted about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    /// Run id.
    pub run_id: Uuid,
    /// Caller email.
    pub user_email: String,
    /// Target channel.
    pub channel: Channel,
    /// Terminal status.
    pub status: RunStatus,
    /// Product name or brief.
    pub subject: String,
    /// Copy tone.
    pub tone: Tone,
    /// Discount text, if any.
    pub discount: Option<String>,
    /// Background prompt used, if copywriting succeeded.
    pub prompt: Option<String>,
    /// Copy used, if copywriting succeeded.
    pub copy: Option<CopyRecord>,
    /// Content hash of the final creative.
    pub image_hash: Option<String>,
    /// Pixel size of the final creative.
    pub image_size: Option<(u32, u32)>,
    /// Per-stage manifest.
    pub manifest: RunManifest,
    /// Terminal error message.
    pub error: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Terminal transition time.
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Snapshots a run.
    #[must_use]
    pub fn from_run(run: &PipelineRun) -> Self {
        let plan: Option<CopyPlan> = run
            .artifact_for(StageId::Copywriting)
            .and_then(|a| a.decode_json().ok());
        let final_artifact = run.final_artifact.as_ref();

        Self {
            run_id: run.run_id,
            user_email: run.context.user_email.clone(),
            channel: run.request.channel,
            status: run.status,
            subject: run.request.subject().to_string(),
            tone: run.request.tone,
            discount: run.request.discount.clone(),
            prompt: plan.as_ref().map(|p| p.background_prompt.clone()),
            copy: plan.map(|p| CopyRecord {
                headline: p.headline,
                subcopy: p.subcopy,
                cta: p.cta,
            }),
            image_hash: final_artifact.map(|a| a.content_hash().to_string()),
            image_size: final_artifact.map(|a| (a.width(), a.height())),
            manifest: run.manifest(),
            error: run.error.as_ref().map(ToString::to_string),
            created_at: run.created_at,
            finished_at: run.finished_at,
        }
    }
}

/// Persists finished runs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Stores the record of a run that reached a terminal state.
    async fn persist(&self, record: &RunRecord) -> Result<(), AdflowError>;
}

/// Run history kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<Vec<RunRecord>>,
}

impl InMemoryMetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<RunRecord> {
        self.records.read().clone()
    }

    /// Records of one caller, newest first.
    #[must_use]
    pub fn for_user(&self, email: &str) -> Vec<RunRecord> {
        let email = email.trim().to_lowercase();
        self.records
            .read()
            .iter()
            .rev()
            .filter(|r| r.user_email == email)
            .cloned()
            .collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing was persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn persist(&self, record: &RunRecord) -> Result<(), AdflowError> {
        self.records.write().push(record.clone());
        Ok(())
    }
}

/// What a notification says about a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunNotice {
    /// Run id.
    pub run_id: Uuid,
    /// Caller to notify.
    pub user_email: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Failed stage, if any.
    pub failed_stage: Option<StageId>,
    /// Terminal error message.
    pub message: Option<String>,
}

impl RunNotice {
    /// Builds the notice for a finished run.
    #[must_use]
    pub fn from_run(run: &PipelineRun) -> Self {
        Self {
            run_id: run.run_id,
            user_email: run.context.user_email.clone(),
            status: run.status,
            failed_stage: run
                .results()
                .iter()
                .find(|r| r.error.is_some())
                .map(|r| r.stage),
            message: run.error.as_ref().map(ToString::to_string),
        }
    }
}

/// Delivers run notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Notifies the caller that a run completed or failed.
    async fn notify(&self, notice: &RunNotice) -> Result<(), AdflowError>;
}

/// Discards notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpNotificationService;

#[async_trait]
impl NotificationService for NoOpNotificationService {
    async fn notify(&self, _notice: &RunNotice) -> Result<(), AdflowError> {
        Ok(())
    }
}
