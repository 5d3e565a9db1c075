//! The pipeline orchestrator.
//!
//! Each submitted run executes on its own task. Stages within a run execute
//! strictly in graph order; independent runs share adapters, guards and the
//! artifact store. A semaphore bounds how many runs execute at once.

use super::collaborators::{
    AuthGate, EmailAuthGate, ImageSource, InMemoryImageSource, InMemoryMetadataStore,
    MetadataStore, NoOpNotificationService, NotificationService, RunNotice, RunRecord,
};
use super::compose::run_compose;
use super::graph::StageGraph;
use super::inputs::{data_dependencies, InputResolver};
use crate::adapters::{with_timeout, AdapterRegistry, StageAdapter, StageInput};
use crate::cancellation::CancellationToken;
use crate::config::AdflowConfig;
use crate::core::{
    Artifact, CreativeRequest, PipelineRun, RunContext, RunManifest, RunStatus, StageId,
    StageResult,
};
use crate::errors::{AdflowError, ErrorKind, FatalPipelineError, ValidationError};
use crate::events::{EventSink, EventType, NoOpEventSink, PipelineEvent};
use crate::resilience::{AdapterGuards, BreakerSnapshot, GuardRegistry, RetryDecision};
use crate::store::{ArtifactKey, ArtifactStore, InMemoryArtifactStore, SingleFlight};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// The run was moved to Cancelled.
    Cancelled,
    /// The run had already finished; nothing changed.
    AlreadyTerminal,
    /// No run with that id exists.
    NotFound,
}

struct RunHandle {
    run: RwLock<PipelineRun>,
    token: CancellationToken,
    done: watch::Sender<bool>,
}

struct StageOutcome {
    artifact: Artifact,
    attempts: u32,
    cached: bool,
}

struct StageFailure {
    error: AdflowError,
    attempts: u32,
    exhausted: bool,
}

impl StageFailure {
    fn new(error: AdflowError, attempts: u32) -> Self {
        Self {
            error,
            attempts,
            exhausted: false,
        }
    }

    fn exhausted(error: AdflowError, attempts: u32) -> Self {
        Self {
            error,
            attempts,
            exhausted: true,
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Builder for [`PipelineOrchestrator`].
pub struct OrchestratorBuilder {
    config: AdflowConfig,
    adapters: AdapterRegistry,
    store: Arc<dyn ArtifactStore>,
    images: Arc<dyn ImageSource>,
    auth: Arc<dyn AuthGate>,
    metadata: Arc<dyn MetadataStore>,
    notifier: Arc<dyn NotificationService>,
    events: Arc<dyn EventSink>,
    graph: Option<StageGraph>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            config: AdflowConfig::default(),
            adapters: AdapterRegistry::local(),
            store: Arc::new(InMemoryArtifactStore::new()),
            images: Arc::new(InMemoryImageSource::new()),
            auth: Arc::new(EmailAuthGate::new()),
            metadata: Arc::new(InMemoryMetadataStore::new()),
            notifier: Arc::new(NoOpNotificationService),
            events: Arc::new(NoOpEventSink),
            graph: None,
        }
    }
}

impl OrchestratorBuilder {
    /// Starts from the local adapters and in-memory collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: AdflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the whole adapter registry.
    #[must_use]
    pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Replaces the adapter of one stage.
    #[must_use]
    pub fn adapter(mut self, adapter: Arc<dyn StageAdapter>) -> Self {
        self.adapters.insert(adapter);
        self
    }

    /// Sets the artifact store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the product image source.
    #[must_use]
    pub fn images(mut self, images: Arc<dyn ImageSource>) -> Self {
        self.images = images;
        self
    }

    /// Sets the auth gate.
    #[must_use]
    pub fn auth(mut self, auth: Arc<dyn AuthGate>) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the metadata store.
    #[must_use]
    pub fn metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the notification service.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn NotificationService>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Overrides the stage graph.
    #[must_use]
    pub fn graph(mut self, graph: StageGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Validates the setup and builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the config is invalid, the graph
    /// misses a stage or orders a stage before the stages it reads from, or
    /// an external stage has no adapter.
    pub fn build(self) -> Result<PipelineOrchestrator, AdflowError> {
        self.config.validate()?;
        let graph = match self.graph {
            Some(graph) => graph,
            None => StageGraph::standard()?,
        };

        let order = graph.execution_order();
        let position = |stage: StageId| order.iter().position(|s| *s == stage);
        for stage in StageId::ALL {
            let Some(at) = position(stage) else {
                return Err(AdflowError::Configuration(format!(
                    "stage graph is missing stage '{stage}'"
                )));
            };
            for dep in data_dependencies(stage) {
                if position(*dep).map_or(true, |dep_at| dep_at > at) {
                    return Err(AdflowError::Configuration(format!(
                        "stage '{stage}' must run after '{dep}'"
                    )));
                }
            }
        }

        let mut guards = GuardRegistry::new();
        for stage in StageId::ALL.into_iter().filter(StageId::is_external) {
            if !self.adapters.contains(stage) {
                return Err(AdflowError::Configuration(format!(
                    "no adapter registered for stage '{stage}'"
                )));
            }
            let adapter = self.config.adapter(stage);
            guards.insert(
                stage,
                AdapterGuards::new(stage, &self.config.breaker, adapter.rate_limit.as_ref()),
            );
        }

        let workers = Arc::new(Semaphore::new(self.config.orchestrator.max_concurrent_runs));
        info!(
            stages = graph.stage_count(),
            max_concurrent_runs = self.config.orchestrator.max_concurrent_runs,
            "Pipeline orchestrator ready"
        );

        Ok(PipelineOrchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                adapters: self.adapters,
                guards,
                store: self.store,
                flights: SingleFlight::new(),
                images: self.images,
                auth: self.auth,
                metadata: self.metadata,
                notifier: self.notifier,
                events: self.events,
                graph,
                runs: DashMap::new(),
                finished: Mutex::new(VecDeque::new()),
                workers,
            }),
        })
    }
}

struct Inner {
    config: AdflowConfig,
    adapters: AdapterRegistry,
    guards: GuardRegistry,
    store: Arc<dyn ArtifactStore>,
    flights: SingleFlight,
    images: Arc<dyn ImageSource>,
    auth: Arc<dyn AuthGate>,
    metadata: Arc<dyn MetadataStore>,
    notifier: Arc<dyn NotificationService>,
    events: Arc<dyn EventSink>,
    graph: StageGraph,
    runs: DashMap<Uuid, Arc<RunHandle>>,
    finished: Mutex<VecDeque<Uuid>>,
    workers: Arc<Semaphore>,
}

/// Drives creative requests through the stage pipeline.
///
/// Cloning is cheap; clones share runs, guards and the artifact store.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("stages", &self.inner.graph.execution_order())
            .field("runs", &self.inner.runs.len())
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Starts building an orchestrator.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Accepts a request and starts its run in the background.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` if the auth gate rejects the caller and a
    /// validation error for a malformed request. No run is created then.
    pub async fn submit(
        &self,
        context: RunContext,
        request: CreativeRequest,
    ) -> Result<Uuid, AdflowError> {
        self.inner.auth.authorize(&context)?;
        request.validate()?;

        let run_id = Uuid::new_v4();
        let channel = request.channel;
        let (done, _) = watch::channel(false);
        let handle = Arc::new(RunHandle {
            run: RwLock::new(PipelineRun::new(run_id, context, request)),
            token: CancellationToken::new(),
            done,
        });
        self.inner.runs.insert(run_id, handle.clone());

        info!(%run_id, %channel, "Run submitted");
        self.inner
            .events
            .emit(
                PipelineEvent::run(EventType::RunSubmitted, run_id)
                    .with_data(json!({ "channel": channel })),
            )
            .await;

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.drive(handle).await });
        Ok(run_id)
    }

    /// Snapshot of a run.
    #[must_use]
    pub fn status(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.inner.runs.get(&run_id).map(|h| h.run.read().clone())
    }

    /// Cancels a run and aborts its in-flight adapter call.
    pub fn cancel(&self, run_id: Uuid) -> CancelAck {
        let Some(handle) = self.inner.runs.get(&run_id).map(|h| h.value().clone()) else {
            return CancelAck::NotFound;
        };
        let reason = "cancelled by caller";
        if !handle.run.write().cancel(reason) {
            return CancelAck::AlreadyTerminal;
        }
        handle.token.cancel(reason);
        info!(%run_id, "Run cancelled");
        CancelAck::Cancelled
    }

    /// Waits until a run has finished, including its persistence and
    /// notification side effects.
    pub async fn wait(&self, run_id: Uuid) -> Option<PipelineRun> {
        let handle = self.inner.runs.get(&run_id).map(|h| h.value().clone())?;
        let mut done = handle.done.subscribe();
        // The sender lives in the handle, so the channel cannot close here.
        let _ = done.wait_for(|finished| *finished).await;
        let run = handle.run.read().clone();
        Some(run)
    }

    /// The final artifact and manifest of a completed run.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown or unfinished run and the
    /// run's own error if it failed or was cancelled.
    pub fn output(&self, run_id: Uuid) -> Result<(Artifact, RunManifest), AdflowError> {
        let run = self
            .status(run_id)
            .ok_or_else(|| ValidationError::field("run_id", format!("unknown run {run_id}")))?;
        match (&run.final_artifact, &run.error) {
            (Some(artifact), _) => Ok((artifact.clone(), run.manifest())),
            (None, Some(err)) => Err(err.clone()),
            (None, None) => Err(ValidationError::field(
                "run_id",
                format!("run {run_id} is still {}", run.status),
            )
            .into()),
        }
    }

    /// Releases a finished run. Returns false for unknown or unfinished runs.
    ///
    /// Finished runs beyond `orchestrator.max_retained_runs` are released
    /// automatically, oldest first.
    pub fn forget(&self, run_id: Uuid) -> bool {
        let removed = self
            .inner
            .runs
            .remove_if(&run_id, |_, handle| *handle.done.borrow())
            .is_some();
        if removed {
            self.inner.finished.lock().retain(|id| *id != run_id);
            debug!(%run_id, "Run released");
        }
        removed
    }

    /// Breaker state of every external stage.
    #[must_use]
    pub fn breaker_snapshots(&self) -> HashMap<StageId, BreakerSnapshot> {
        self.inner.guards.breaker_snapshots()
    }

    /// The stage graph in execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[StageId] {
        self.inner.graph.execution_order()
    }

    /// Number of runs known to the orchestrator.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.inner.runs.len()
    }
}

impl Inner {
    async fn drive(self: Arc<Self>, handle: Arc<RunHandle>) {
        let permit = handle.token.run(self.workers.clone().acquire_owned()).await;
        match permit {
            Ok(Ok(_permit)) => {
                let outcome = match AssertUnwindSafe(self.execute(&handle)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => Err(Self::record_panic(&handle, panic.as_ref())),
                };
                let mut run = handle.run.write();
                match outcome {
                    Ok(artifact) => {
                        run.complete(artifact);
                    }
                    Err(AdflowError::Cancelled(reason)) => {
                        run.cancel(reason);
                    }
                    Err(err) => {
                        run.fail(err);
                    }
                }
            }
            Ok(Err(closed)) => {
                handle
                    .run
                    .write()
                    .fail(AdflowError::Internal(format!("worker pool closed: {closed}")));
            }
            // Cancelled while queued; `cancel` already moved the run.
            Err(_) => {}
        }
        self.finalize(&handle).await;
    }

    fn record_panic(handle: &RunHandle, payload: &(dyn Any + Send)) -> AdflowError {
        let message = panic_message(payload);
        let error = AdflowError::Internal(format!("run panicked: {message}"));
        let mut run = handle.run.write();
        error!(run_id = %run.run_id, stage = ?run.current_stage, panic = %message, "Run panicked");
        if let Some(stage) = run.current_stage {
            if run.result_for(stage).is_none() {
                run.record(StageResult::failed(stage, &error, 0, 0.0));
            }
        }
        error
    }

    async fn execute(&self, handle: &RunHandle) -> Result<Artifact, AdflowError> {
        let (run_id, request) = {
            let run = handle.run.read();
            (run.run_id, run.request.clone())
        };
        let token = &handle.token;
        let profile = self.config.channel(request.channel);

        info!(%run_id, channel = %request.channel, "Run started");
        self.events
            .emit(PipelineEvent::run(EventType::RunStarted, run_id))
            .await;

        let primary = request.primary_image().ok_or_else(|| {
            ValidationError::field("product_images", "at least one product image is required")
        })?;
        let product = token.run(self.images.load(primary)).await??;

        let resolver = InputResolver::new(&request, &profile, self.config.layout.allow_overlap);
        let mut outputs: BTreeMap<StageId, Artifact> = BTreeMap::new();
        let mut last: Option<Artifact> = None;

        for &stage in self.graph.execution_order() {
            if token.is_cancelled() || !handle.run.write().begin_stage(stage) {
                return Err(token.cancelled_error());
            }
            debug!(%run_id, %stage, "Stage started");
            self.events
                .emit(PipelineEvent::stage(EventType::StageStarted, run_id, stage))
                .await;

            if stage == StageId::Upscale {
                if let Some(composite) = outputs.get(&StageId::Compose).cloned() {
                    if profile.meets_target(composite.width(), composite.height()) {
                        handle
                            .run
                            .write()
                            .record(StageResult::skipped(stage, Some(composite.clone())));
                        info!(%run_id, %stage, "Composite already meets target, skipping upscale");
                        self.events
                            .emit(
                                PipelineEvent::stage(EventType::StageSkipped, run_id, stage)
                                    .with_data(json!({ "reason": "meets_target" })),
                            )
                            .await;
                        last = Some(composite);
                        continue;
                    }
                }
            }

            let input = match resolver.resolve(stage, &product, &outputs) {
                Ok(input) => input,
                Err(error) => {
                    let failure = StageFailure::new(error, 0);
                    return Err(self.record_failure(handle, run_id, stage, failure, 0.0).await);
                }
            };
            let started = Instant::now();
            match self.run_stage(run_id, stage, &input, token).await {
                Ok(outcome) => {
                    let latency_ms = elapsed_ms(started);
                    let artifact = outcome.artifact;
                    let (result, event) = if outcome.cached {
                        (
                            StageResult::cached(stage, artifact.clone(), latency_ms),
                            EventType::StageCacheHit,
                        )
                    } else {
                        (
                            StageResult::success(stage, artifact.clone(), outcome.attempts, latency_ms),
                            EventType::StageCompleted,
                        )
                    };
                    if !handle.run.write().record(result) {
                        return Err(token.cancelled_error());
                    }
                    info!(
                        %run_id,
                        %stage,
                        attempts = outcome.attempts,
                        cached = outcome.cached,
                        latency_ms,
                        "Stage completed"
                    );
                    self.events
                        .emit(PipelineEvent::stage(event, run_id, stage).with_data(json!({
                            "attempts": outcome.attempts,
                            "latency_ms": latency_ms,
                            "content_hash": artifact.content_hash(),
                        })))
                        .await;
                    outputs.insert(stage, artifact.clone());
                    last = Some(artifact);
                }
                Err(failure) => {
                    if matches!(failure.error, AdflowError::Cancelled(_)) {
                        return Err(failure.error);
                    }
                    return Err(self
                        .record_failure(handle, run_id, stage, failure, elapsed_ms(started))
                        .await);
                }
            }
        }

        last.ok_or_else(|| AdflowError::Internal("pipeline produced no artifact".into()))
    }

    async fn record_failure(
        &self,
        handle: &RunHandle,
        run_id: Uuid,
        stage: StageId,
        failure: StageFailure,
        latency_ms: f64,
    ) -> AdflowError {
        let StageFailure {
            error,
            attempts,
            exhausted,
        } = failure;
        warn!(%run_id, %stage, attempts, error = %error, "Stage failed");
        self.events
            .emit(
                PipelineEvent::stage(EventType::StageFailed, run_id, stage)
                    .with_data(json!({ "attempts": attempts, "error": error.to_dict() })),
            )
            .await;

        let mut run = handle.run.write();
        run.record(StageResult::failed(stage, &error, attempts, latency_ms));
        if !exhausted {
            return error;
        }
        let last = run.last_success();
        FatalPipelineError::new(stage, attempts, &error)
            .with_last_success(
                last.map(|r| r.stage),
                last.and_then(|r| r.artifact.as_ref()).map(Artifact::summary),
            )
            .into()
    }

    async fn run_stage(
        &self,
        run_id: Uuid,
        stage: StageId,
        input: &StageInput,
        token: &CancellationToken,
    ) -> Result<StageOutcome, StageFailure> {
        let key = ArtifactKey::new(stage, input.canonical_hash());
        let cached = |artifact| StageOutcome {
            artifact,
            attempts: 0,
            cached: true,
        };

        if let Some(artifact) = self.store.get(&key).await {
            debug!(%run_id, %key, "Cache hit");
            return Ok(cached(artifact));
        }
        let _flight = token
            .run(self.flights.acquire(&key))
            .await
            .map_err(|e| StageFailure::new(e, 0))?;
        if let Some(artifact) = self.store.get(&key).await {
            debug!(%run_id, %key, "Cache hit after waiting on identical call");
            return Ok(cached(artifact));
        }

        let (artifact, attempts) = if stage == StageId::Compose {
            let input = input.clone();
            let artifact = token
                .run(tokio::task::spawn_blocking(move || run_compose(&input)))
                .await
                .map_err(|e| StageFailure::new(e, 1))?
                .map_err(|e| {
                    StageFailure::new(AdflowError::Internal(format!("compose task failed: {e}")), 1)
                })?
                .map_err(|e| StageFailure::new(e, 1))?;
            (artifact, 1)
        } else {
            self.invoke_with_retry(run_id, stage, input, token).await?
        };

        self.store.put(key, artifact.clone()).await;
        Ok(StageOutcome {
            artifact,
            attempts,
            cached: false,
        })
    }

    async fn invoke_with_retry(
        &self,
        run_id: Uuid,
        stage: StageId,
        input: &StageInput,
        token: &CancellationToken,
    ) -> Result<(Artifact, u32), StageFailure> {
        let adapter = self.adapters.get(stage).ok_or_else(|| {
            StageFailure::new(
                AdflowError::Internal(format!("no adapter registered for stage '{stage}'")),
                0,
            )
        })?;
        adapter
            .validate(input)
            .map_err(|e| StageFailure::new(AdflowError::Validation(e.with_stage(stage)), 0))?;

        let guards = self.guards.get(stage);
        let timeout = self.config.adapter(stage).timeout();
        let mut retry = self.config.retry.start();

        loop {
            retry.begin_attempt();
            let attempt = retry.attempts();
            let error = match self
                .attempt(stage, adapter.as_ref(), input, guards.as_deref(), timeout, token)
                .await
            {
                Ok(artifact) => return Ok((artifact, attempt)),
                Err(error) => error,
            };
            if matches!(error, AdflowError::Cancelled(_)) {
                return Err(StageFailure::new(error, attempt));
            }

            match retry.on_failure(error.kind()) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        %run_id,
                        %stage,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Stage attempt failed, retrying"
                    );
                    self.events
                        .emit(
                            PipelineEvent::stage(EventType::StageRetrying, run_id, stage).with_data(
                                json!({
                                    "attempt": attempt,
                                    "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                    "error": error.to_string(),
                                }),
                            ),
                        )
                        .await;
                    token
                        .run(tokio::time::sleep(delay))
                        .await
                        .map_err(|e| StageFailure::new(e, attempt))?;
                }
                RetryDecision::GiveUp => return Err(StageFailure::exhausted(error, attempt)),
                RetryDecision::NotRetryable => return Err(StageFailure::new(error, attempt)),
            }
        }
    }

    async fn attempt(
        &self,
        stage: StageId,
        adapter: &dyn StageAdapter,
        input: &StageInput,
        guards: Option<&AdapterGuards>,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Artifact, AdflowError> {
        if let Some(guards) = guards {
            if !guards.breaker.try_acquire() {
                return Err(AdflowError::breaker_open(stage));
            }
            if let Some(limiter) = &guards.limiter {
                match token.run(limiter.acquire()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        guards.breaker.record_neutral();
                        return Err(AdflowError::TransientService {
                            stage,
                            message: "rate limit exhausted".into(),
                        });
                    }
                    Err(cancelled) => {
                        guards.breaker.record_neutral();
                        return Err(cancelled);
                    }
                }
            }
        }

        let result = match token
            .run(with_timeout(timeout, adapter.invoke(input, timeout)))
            .await
        {
            Ok(result) => result.map_err(|e| AdflowError::from_adapter(stage, e)),
            Err(cancelled) => Err(cancelled),
        };

        if let Some(guards) = guards {
            match &result {
                Ok(_) => guards.breaker.record_success(),
                Err(e) if matches!(e.kind(), ErrorKind::AdapterTimeout | ErrorKind::TransientService) => {
                    guards.breaker.record_failure();
                }
                Err(_) => guards.breaker.record_neutral(),
            }
        }
        result
    }

    async fn finalize(&self, handle: &RunHandle) {
        let run = handle.run.read().clone();
        let run_id = run.run_id;
        let event_type = match run.status {
            RunStatus::Completed => EventType::RunCompleted,
            RunStatus::Failed => EventType::RunFailed,
            RunStatus::Cancelled => EventType::RunCancelled,
            RunStatus::Pending | RunStatus::Running => {
                warn!(%run_id, status = %run.status, "Run ended without a terminal status");
                handle.done.send_replace(true);
                return;
            }
        };

        let published = AssertUnwindSafe(self.publish(&run, event_type))
            .catch_unwind()
            .await;
        if let Err(panic) = published {
            error!(%run_id, panic = %panic_message(panic.as_ref()), "Run side effects panicked");
        }
        self.retain(run_id);
        handle.done.send_replace(true);
    }

    /// Logs the outcome, emits the terminal event, persists the run and
    /// sends the notification.
    async fn publish(&self, run: &PipelineRun, event_type: EventType) {
        let run_id = run.run_id;
        let manifest = run.manifest();
        match run.status {
            RunStatus::Completed => info!(
                %run_id,
                total_latency_ms = manifest.total_latency_ms,
                cached = manifest.cached_count,
                "Run completed"
            ),
            _ => {
                let error = run.error.as_ref().map(ToString::to_string).unwrap_or_default();
                warn!(%run_id, status = %run.status, error = %error, "Run did not complete");
            }
        }
        self.events
            .emit(PipelineEvent::run(event_type, run_id).with_data(json!({
                "status": run.status,
                "total_latency_ms": manifest.total_latency_ms,
                "cached_count": manifest.cached_count,
                "error": run.error.as_ref().map(AdflowError::to_dict),
            })))
            .await;

        if let Err(e) = self.metadata.persist(&RunRecord::from_run(run)).await {
            warn!(%run_id, error = %e, "Failed to persist run metadata");
        }
        if matches!(run.status, RunStatus::Completed | RunStatus::Failed) {
            if let Err(e) = self.notifier.notify(&RunNotice::from_run(run)).await {
                warn!(%run_id, error = %e, "Failed to send run notification");
            }
        }
    }

    fn retain(&self, run_id: Uuid) {
        let limit = self.config.orchestrator.max_retained_runs;
        let mut finished = self.finished.lock();
        finished.push_back(run_id);
        while finished.len() > limit {
            if let Some(oldest) = finished.pop_front() {
                self.runs.remove(&oldest);
                debug!(run_id = %oldest, "Released oldest finished run");
            }
        }
    }
}
