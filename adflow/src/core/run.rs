//! Pipeline runs, stage results and manifests.

use super::{Artifact, ArtifactSummary, Channel, CreativeRequest, RunContext, RunStatus, StageId, StageStatus};
use crate::errors::{AdflowError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Error detail recorded on a failed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Error kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl From<&AdflowError> for StageError {
    fn from(err: &AdflowError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// The outcome of one stage within one run.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// The stage.
    pub stage: StageId,
    /// Final status.
    pub status: StageStatus,
    /// Produced artifact, if any.
    pub artifact: Option<Artifact>,
    /// Number of adapter invocations (zero on a cache hit or skip).
    pub attempts: u32,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: f64,
    /// Whether the artifact was served from the artifact store.
    pub cached: bool,
    /// Error detail if failed.
    pub error: Option<StageError>,
    /// When the stage finished.
    pub finished_at: DateTime<Utc>,
}

impl StageResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(stage: StageId, artifact: Artifact, attempts: u32, latency_ms: f64) -> Self {
        Self {
            stage,
            status: StageStatus::Success,
            artifact: Some(artifact),
            attempts,
            latency_ms,
            cached: false,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Creates a cache-hit result.
    #[must_use]
    pub fn cached(stage: StageId, artifact: Artifact, latency_ms: f64) -> Self {
        Self {
            cached: true,
            ..Self::success(stage, artifact, 0, latency_ms)
        }
    }

    /// Creates a skipped result carrying an artifact through unchanged.
    #[must_use]
    pub fn skipped(stage: StageId, passthrough: Option<Artifact>) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            artifact: passthrough,
            attempts: 0,
            latency_ms: 0.0,
            cached: false,
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(stage: StageId, error: &AdflowError, attempts: u32, latency_ms: f64) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            artifact: None,
            attempts,
            latency_ms,
            cached: false,
            error: Some(StageError::from(error)),
            finished_at: Utc::now(),
        }
    }
}

/// A single creative-generation run.
///
/// The run is an explicit state machine: `Pending -> Running -> Completed |
/// Failed | Cancelled`. Terminal states are never left, and the results list
/// only grows.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    /// Run id.
    pub run_id: Uuid,
    /// The submitting caller.
    pub context: RunContext,
    /// The submitted request.
    pub request: CreativeRequest,
    /// Current status.
    pub status: RunStatus,
    /// The stage currently executing.
    pub current_stage: Option<StageId>,
    results: Vec<StageResult>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When the first stage started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal error, if failed or cancelled.
    pub error: Option<AdflowError>,
    /// The final creative, once completed.
    pub final_artifact: Option<Artifact>,
}

impl PipelineRun {
    /// Creates a pending run.
    #[must_use]
    pub fn new(run_id: Uuid, context: RunContext, request: CreativeRequest) -> Self {
        Self {
            run_id,
            context,
            request,
            status: RunStatus::Pending,
            current_stage: None,
            results: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            final_artifact: None,
        }
    }

    /// Returns the stage results in execution order.
    #[must_use]
    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    /// Returns the result recorded for a stage.
    #[must_use]
    pub fn result_for(&self, stage: StageId) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    /// Returns the artifact produced (or passed through) by a stage.
    #[must_use]
    pub fn artifact_for(&self, stage: StageId) -> Option<&Artifact> {
        self.result_for(stage).and_then(|r| r.artifact.as_ref())
    }

    /// Returns the last stage that completed successfully.
    #[must_use]
    pub fn last_success(&self) -> Option<&StageResult> {
        self.results
            .iter()
            .rev()
            .find(|r| r.status == StageStatus::Success)
    }

    /// Returns true if the run is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Marks a stage as executing. Returns false if the run is terminal.
    pub fn begin_stage(&mut self, stage: StageId) -> bool {
        if !self.status.can_transition_to(RunStatus::Running) {
            return false;
        }
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = RunStatus::Running;
        self.current_stage = Some(stage);
        true
    }

    /// Appends a stage result. Returns false if the run is terminal.
    pub fn record(&mut self, result: StageResult) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.results.push(result);
        true
    }

    /// Completes the run with its final artifact.
    pub fn complete(&mut self, final_artifact: Artifact) -> bool {
        if !self.finish(RunStatus::Completed) {
            return false;
        }
        self.final_artifact = Some(final_artifact);
        true
    }

    /// Fails the run.
    pub fn fail(&mut self, error: AdflowError) -> bool {
        if !self.finish(RunStatus::Failed) {
            return false;
        }
        self.error = Some(error);
        true
    }

    /// Cancels the run.
    pub fn cancel(&mut self, reason: impl Into<String>) -> bool {
        if !self.finish(RunStatus::Cancelled) {
            return false;
        }
        self.error = Some(AdflowError::Cancelled(reason.into()));
        true
    }

    fn finish(&mut self, status: RunStatus) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }
        self.status = status;
        self.current_stage = None;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Sum of the recorded stage latencies.
    #[must_use]
    pub fn total_latency_ms(&self) -> f64 {
        self.results.iter().map(|r| r.latency_ms).sum()
    }

    /// Builds the run manifest.
    #[must_use]
    pub fn manifest(&self) -> RunManifest {
        let entries: Vec<ManifestEntry> = self
            .results
            .iter()
            .map(|r| ManifestEntry {
                stage: r.stage,
                status: r.status,
                cached: r.cached,
                attempts: r.attempts,
                latency_ms: r.latency_ms,
                artifact: r.artifact.as_ref().map(Artifact::summary),
                error: r.error.clone(),
            })
            .collect();
        let count = |status: StageStatus| entries.iter().filter(|e| e.status == status).count();
        let cached_count = entries.iter().filter(|e| e.cached).count();

        RunManifest {
            run_id: self.run_id,
            status: self.status,
            channel: self.request.channel,
            success_count: count(StageStatus::Success),
            skipped_count: count(StageStatus::Skipped),
            failed_count: count(StageStatus::Failed),
            cached_count,
            any_cached: cached_count > 0,
            total_latency_ms: self.total_latency_ms(),
            final_artifact: self.final_artifact.as_ref().map(Artifact::summary),
            entries,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

/// One stage's line in a run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// The stage.
    pub stage: StageId,
    /// Final status.
    pub status: StageStatus,
    /// Whether the artifact came from the store.
    pub cached: bool,
    /// Adapter invocations.
    pub attempts: u32,
    /// Latency in milliseconds.
    pub latency_ms: f64,
    /// Produced artifact.
    pub artifact: Option<ArtifactSummary>,
    /// Error detail if failed.
    pub error: Option<StageError>,
}

/// Summary of a run for callers and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Run id.
    pub run_id: Uuid,
    /// Status at the time the manifest was built.
    pub status: RunStatus,
    /// Target channel.
    pub channel: Channel,
    /// Per-stage entries in execution order.
    pub entries: Vec<ManifestEntry>,
    /// Number of successful stages (cache hits included).
    pub success_count: usize,
    /// Number of skipped stages.
    pub skipped_count: usize,
    /// Number of failed stages.
    pub failed_count: usize,
    /// Number of stages served from cache.
    pub cached_count: usize,
    /// Whether any stage was served from cache.
    pub any_cached: bool,
    /// Sum of stage latencies.
    pub total_latency_ms: f64,
    /// Final creative.
    pub final_artifact: Option<ArtifactSummary>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Terminal time.
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunManifest {
    /// Returns the entry for a stage.
    #[must_use]
    pub fn entry(&self, stage: StageId) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.stage == stage)
    }

    /// Converts the manifest to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn run() -> PipelineRun {
        let request = CreativeRequest::builder("mem://p", Channel::Instagram)
            .with_brief("Mug")
            .build();
        PipelineRun::new(Uuid::new_v4(), RunContext::new("a@b.co"), request)
    }

    fn artifact() -> Artifact {
        Artifact::from_rgba(&RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]))).unwrap()
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = run();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.begin_stage(StageId::Copywriting));
        assert_eq!(run.current_stage, Some(StageId::Copywriting));
        assert!(run.record(StageResult::success(StageId::Copywriting, artifact(), 1, 5.0)));
        assert!(run.complete(artifact()));
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.current_stage.is_none());
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut run = run();
        assert!(run.cancel("user"));
        assert!(!run.complete(artifact()));
        assert!(!run.fail(AdflowError::Internal("late".into())));
        assert!(!run.begin_stage(StageId::Upscale));
        assert!(!run.record(StageResult::skipped(StageId::Upscale, None)));
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(matches!(run.error, Some(AdflowError::Cancelled(_))));
    }

    #[test]
    fn test_manifest_counts_and_latency() {
        let mut run = run();
        run.begin_stage(StageId::Copywriting);
        run.record(StageResult::success(StageId::Copywriting, artifact(), 2, 10.5));
        run.record(StageResult::cached(StageId::BackgroundRemoval, artifact(), 0.5));
        run.record(StageResult::skipped(StageId::Upscale, Some(artifact())));
        run.complete(artifact());

        let manifest = run.manifest();
        assert_eq!(manifest.success_count, 2);
        assert_eq!(manifest.skipped_count, 1);
        assert_eq!(manifest.cached_count, 1);
        assert!(manifest.any_cached);
        assert!((manifest.total_latency_ms - 11.0).abs() < f64::EPSILON);
        assert_eq!(manifest.entry(StageId::Copywriting).unwrap().attempts, 2);
        assert!(manifest.final_artifact.is_some());
        assert_eq!(manifest.to_dict()["status"], "completed");
    }

    #[test]
    fn test_last_success_ignores_skips_and_failures() {
        let mut run = run();
        run.begin_stage(StageId::Copywriting);
        run.record(StageResult::success(StageId::Copywriting, artifact(), 1, 1.0));
        let err = AdflowError::Internal("boom".into());
        run.record(StageResult::failed(StageId::BackgroundRemoval, &err, 3, 1.0));
        assert_eq!(run.last_success().unwrap().stage, StageId::Copywriting);
        let failed = run.result_for(StageId::BackgroundRemoval).unwrap();
        assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::Internal);
    }
}
