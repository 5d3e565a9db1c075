//! Event sink trait and implementations.

use crate::core::StageId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, Level};
use uuid::Uuid;

/// Kind of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    /// A run was accepted.
    #[serde(rename = "run.submitted")]
    RunSubmitted,
    /// A worker picked the run up.
    #[serde(rename = "run.started")]
    RunStarted,
    /// A stage began executing.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// A stage's artifact was served from the store.
    #[serde(rename = "stage.cache_hit")]
    StageCacheHit,
    /// A stage attempt failed and will be retried.
    #[serde(rename = "stage.retrying")]
    StageRetrying,
    /// A stage produced its artifact.
    #[serde(rename = "stage.completed")]
    StageCompleted,
    /// A stage was not needed.
    #[serde(rename = "stage.skipped")]
    StageSkipped,
    /// A stage failed terminally.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// The run completed.
    #[serde(rename = "run.completed")]
    RunCompleted,
    /// The run failed.
    #[serde(rename = "run.failed")]
    RunFailed,
    /// The run was cancelled.
    #[serde(rename = "run.cancelled")]
    RunCancelled,
}

impl EventType {
    /// Dotted event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunSubmitted => "run.submitted",
            Self::RunStarted => "run.started",
            Self::StageStarted => "stage.started",
            Self::StageCacheHit => "stage.cache_hit",
            Self::StageRetrying => "stage.retrying",
            Self::StageCompleted => "stage.completed",
            Self::StageSkipped => "stage.skipped",
            Self::StageFailed => "stage.failed",
            Self::RunCompleted => "run.completed",
            Self::RunFailed => "run.failed",
            Self::RunCancelled => "run.cancelled",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event of one run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    /// Event kind.
    pub event_type: EventType,
    /// The run the event belongs to.
    pub run_id: Uuid,
    /// The stage, for stage events.
    pub stage: Option<StageId>,
    /// Event payload.
    pub data: serde_json::Value,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    /// Creates a run-level event.
    #[must_use]
    pub fn run(event_type: EventType, run_id: Uuid) -> Self {
        Self {
            event_type,
            run_id,
            stage: None,
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Creates a stage-level event.
    #[must_use]
    pub fn stage(event_type: EventType, run_id: Uuid, stage: StageId) -> Self {
        Self {
            stage: Some(stage),
            ..Self::run(event_type, run_id)
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Receives lifecycle events from the orchestrator.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: PipelineEvent);

    /// Emits an event without blocking. Never fails.
    fn try_emit(&self, event: PipelineEvent);
}

/// Discards every event. Used when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: PipelineEvent) {}

    fn try_emit(&self, _event: PipelineEvent) {}
}

/// Logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &PipelineEvent) {
        let stage = event.stage.map(|s| s.as_str()).unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.event_type,
                run_id = %event.run_id,
                stage,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                event_type = %event.event_type,
                run_id = %event.run_id,
                stage,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.log_event(&event);
    }
}

/// Keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<EventType> {
        self.events.read().iter().map(|e| e.event_type).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears the collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose name starts with a prefix, e.g. `stage.`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.as_str().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }
}
