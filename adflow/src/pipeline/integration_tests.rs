//! End-to-end runs through the orchestrator.

use super::*;
use crate::adapters::{CopyPlan, StageAdapter, StageInput};
use crate::config::{AdapterConfig, AdflowConfig, ChannelProfile};
use crate::core::{
    Artifact, Channel, CreativeRequest, LayoutSpec, PipelineRun, Region, RelativeBounds, RunStatus,
    StageId, StageStatus,
};
use crate::errors::{AdapterError, AdflowError, ErrorKind, ValidationError};
use crate::events::{CollectingEventSink, EventType};
use crate::layout::LayoutResolver;
use crate::resilience::{BreakerState, RateLimitConfig};
use async_trait::async_trait;
use crate::testing::{
    assert_all_stages_recorded, assert_run_completed, assert_run_failed, assert_stage_status,
    fixtures, CountingNotifier, ScriptedAdapter,
};
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const ALL_BUT_UPSCALE: [StageId; 5] = [
    StageId::Copywriting,
    StageId::BackgroundRemoval,
    StageId::BackgroundGeneration,
    StageId::LightingComposite,
    StageId::Compose,
];

struct Harness {
    orchestrator: PipelineOrchestrator,
    copy: Arc<ScriptedAdapter>,
    cutout: Arc<ScriptedAdapter>,
}

fn scripted_copy(plan: &CopyPlan) -> Arc<ScriptedAdapter> {
    Arc::new(ScriptedAdapter::new(
        StageId::Copywriting,
        fixtures::plan_artifact(plan).unwrap(),
    ))
}

fn scripted_cutout() -> Arc<ScriptedAdapter> {
    Arc::new(ScriptedAdapter::new(
        StageId::BackgroundRemoval,
        Artifact::from_rgba(&fixtures::cutout_image(800, 800)).unwrap(),
    ))
}

fn builder(copy: &Arc<ScriptedAdapter>, cutout: &Arc<ScriptedAdapter>) -> OrchestratorBuilder {
    PipelineOrchestrator::builder()
        .config(fixtures::fast_config())
        .images(Arc::new(fixtures::image_source().unwrap()))
        .adapter(copy.clone())
        .adapter(cutout.clone())
}

fn harness_with(copy: Arc<ScriptedAdapter>, cutout: Arc<ScriptedAdapter>) -> Harness {
    let orchestrator = builder(&copy, &cutout).build().unwrap();
    Harness {
        orchestrator,
        copy,
        cutout,
    }
}

fn harness() -> Harness {
    harness_with(scripted_copy(&fixtures::e2e_plan()), scripted_cutout())
}

async fn run_once(orchestrator: &PipelineOrchestrator, channel: Channel) -> PipelineRun {
    let id = orchestrator
        .submit(fixtures::context(), fixtures::request(channel))
        .await
        .unwrap();
    orchestrator.wait(id).await.unwrap()
}

#[tokio::test]
async fn test_instagram_end_to_end() {
    let events = Arc::new(CollectingEventSink::new());
    let copy = scripted_copy(&fixtures::e2e_plan());
    let cutout = scripted_cutout();
    let orchestrator = builder(&copy, &cutout)
        .events(events.clone())
        .build()
        .unwrap();

    let run = run_once(&orchestrator, Channel::Instagram).await;
    assert_run_completed(&run);

    let mut expected = ALL_BUT_UPSCALE.to_vec();
    expected.push(StageId::Upscale);
    assert_all_stages_recorded(&run, &expected);
    for stage in ALL_BUT_UPSCALE {
        assert_stage_status(&run, stage, StageStatus::Success);
    }
    assert_stage_status(&run, StageId::Upscale, StageStatus::Skipped);

    let (creative, manifest) = orchestrator.output(run.run_id).unwrap();
    assert_eq!((creative.width(), creative.height()), (1080, 1080));
    assert_eq!(manifest.success_count, 5);
    assert_eq!(manifest.skipped_count, 1);
    assert_eq!(manifest.cached_count, 0);
    assert!(!manifest.any_cached);
    let sum: f64 = manifest.entries.iter().map(|e| e.latency_ms).sum();
    assert!((manifest.total_latency_ms - sum).abs() < 1e-9);
    assert_eq!(
        manifest.final_artifact.as_ref().map(|a| a.content_hash.clone()),
        Some(creative.content_hash().to_string())
    );

    // The upscale stage carries the composite through unchanged.
    let composite = run.artifact_for(StageId::Compose).unwrap();
    assert_eq!(composite.content_hash(), creative.content_hash());

    let profile = ChannelProfile::for_channel(Channel::Instagram);
    let resolved = LayoutResolver::new(profile.font_scale)
        .resolve(&fixtures::e2e_plan().layout, 1080, 1080)
        .unwrap();
    let rect = resolved.regions[0].rect;
    assert_eq!((rect.left, rect.top, rect.right, rect.bottom), (108, 864, 972, 1026));

    assert_eq!(copy.call_count(), 1);
    assert_eq!(cutout.call_count(), 1);

    let types = events.event_types();
    assert_eq!(types.first(), Some(&EventType::RunSubmitted));
    assert_eq!(types.last(), Some(&EventType::RunCompleted));
    assert_eq!(events.events_of_type("stage.completed").len(), 5);
    assert_eq!(events.events_of_type("stage.skipped").len(), 1);
}

#[tokio::test]
async fn test_composition_is_deterministic() {
    let first = run_once(&harness().orchestrator, Channel::Instagram).await;
    let second = run_once(&harness().orchestrator, Channel::Instagram).await;
    assert_run_completed(&first);
    assert_run_completed(&second);

    let hash = |run: &PipelineRun| run.final_artifact.as_ref().unwrap().content_hash().to_string();
    assert_eq!(hash(&first), hash(&second));
    assert_eq!(first.manifest().cached_count, 0);
    assert_eq!(second.manifest().cached_count, 0);
}

#[tokio::test]
async fn test_identical_request_is_served_from_cache() {
    let h = harness();
    let first = run_once(&h.orchestrator, Channel::Instagram).await;
    let second = run_once(&h.orchestrator, Channel::Instagram).await;
    assert_run_completed(&second);

    let manifest = second.manifest();
    assert_eq!(manifest.cached_count, 5);
    assert!(manifest.any_cached);
    for stage in ALL_BUT_UPSCALE {
        let result = second.result_for(stage).unwrap();
        assert!(result.cached, "{stage} should be cached");
        assert_eq!(result.status, StageStatus::Success);
    }
    assert_eq!(h.copy.call_count(), 1);
    assert_eq!(h.cutout.call_count(), 1);
    assert_eq!(
        first.final_artifact.as_ref().unwrap().content_hash(),
        second.final_artifact.as_ref().unwrap().content_hash()
    );
}

#[tokio::test]
async fn test_concurrent_identical_runs_invoke_once() {
    let copy = Arc::new(
        ScriptedAdapter::new(
            StageId::Copywriting,
            fixtures::plan_artifact(&fixtures::e2e_plan()).unwrap(),
        )
        .with_delay(Duration::from_millis(50)),
    );
    let h = harness_with(copy, scripted_cutout());

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = h
            .orchestrator
            .submit(fixtures::context(), fixtures::request(Channel::Instagram))
            .await
            .unwrap();
        ids.push(id);
    }
    let runs = join_all(ids.iter().map(|id| h.orchestrator.wait(*id))).await;
    let runs: Vec<PipelineRun> = runs.into_iter().map(Option::unwrap).collect();
    for run in &runs {
        assert_run_completed(run);
    }

    assert_eq!(h.copy.call_count(), 1);
    assert_eq!(h.cutout.call_count(), 1);
    let cached: usize = runs.iter().map(|r| r.manifest().cached_count).sum();
    assert_eq!(cached, 10);
}

#[tokio::test]
async fn test_retry_is_bounded_by_max_attempts() {
    let cutout = Arc::new(ScriptedAdapter::failing(
        StageId::BackgroundRemoval,
        AdapterError::Timeout { timeout_ms: 10 },
    ));
    let h = harness_with(scripted_copy(&fixtures::e2e_plan()), cutout);

    let run = run_once(&h.orchestrator, Channel::Instagram).await;
    assert_run_failed(&run, ErrorKind::FatalPipeline);
    assert_eq!(h.cutout.call_count(), 3);

    let failed = run.result_for(StageId::BackgroundRemoval).unwrap();
    assert_eq!(failed.status, StageStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::AdapterTimeout);
    assert_stage_status(&run, StageId::Copywriting, StageStatus::Success);
    assert!(run.result_for(StageId::BackgroundGeneration).is_none());

    let Some(AdflowError::FatalPipeline(fatal)) = &run.error else {
        panic!("expected a fatal pipeline error, got {:?}", run.error);
    };
    assert_eq!(fatal.stage, StageId::BackgroundRemoval);
    assert_eq!(fatal.attempts, 3);
    assert_eq!(fatal.last_successful_stage, Some(StageId::Copywriting));
    assert!(fatal.last_artifact.is_some());
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let cutout = Arc::new(
        ScriptedAdapter::new(
            StageId::BackgroundRemoval,
            Artifact::from_rgba(&fixtures::cutout_image(800, 800)).unwrap(),
        )
        .then_fail(2, AdapterError::transient("503 from segmenter")),
    );
    let h = harness_with(scripted_copy(&fixtures::e2e_plan()), cutout);

    let run = run_once(&h.orchestrator, Channel::Instagram).await;
    assert_run_completed(&run);
    assert_eq!(run.result_for(StageId::BackgroundRemoval).unwrap().attempts, 3);
    assert_eq!(h.cutout.call_count(), 3);
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let copy = Arc::new(ScriptedAdapter::failing(
        StageId::Copywriting,
        AdapterError::rejected("content policy"),
    ));
    let h = harness_with(copy, scripted_cutout());

    let run = run_once(&h.orchestrator, Channel::Instagram).await;
    assert_run_failed(&run, ErrorKind::AdapterRejected);
    assert_eq!(h.copy.call_count(), 1);
    assert_eq!(h.cutout.call_count(), 0);

    let snapshots = h.orchestrator.breaker_snapshots();
    let snapshot = &snapshots[&StageId::Copywriting];
    assert_eq!(snapshot.state, BreakerState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[tokio::test]
async fn test_breaker_opens_after_five_transient_failures() {
    let copy = Arc::new(ScriptedAdapter::failing(
        StageId::Copywriting,
        AdapterError::transient("upstream 502"),
    ));
    let config = fixtures::fast_config().with_retry(
        fixtures::fast_config().retry.with_max_attempts(5),
    );
    let cutout = scripted_cutout();
    let orchestrator = builder(&copy, &cutout).config(config).build().unwrap();

    let first = run_once(&orchestrator, Channel::Instagram).await;
    assert_run_failed(&first, ErrorKind::FatalPipeline);
    assert_eq!(copy.call_count(), 5);
    let snapshots = orchestrator.breaker_snapshots();
    let snapshot = &snapshots[&StageId::Copywriting];
    assert_eq!(snapshot.state, BreakerState::Open);
    assert_eq!(snapshot.consecutive_failures, 5);

    // While open, attempts fail fast without reaching the adapter.
    let second = run_once(&orchestrator, Channel::Instagram).await;
    assert_run_failed(&second, ErrorKind::FatalPipeline);
    assert_eq!(copy.call_count(), 5);
    let failed = second.result_for(StageId::Copywriting).unwrap();
    assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::TransientService);
    assert!(failed.error.as_ref().unwrap().message.contains("circuit breaker is open"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_doubles_cooldown() {
    let copy = Arc::new(ScriptedAdapter::failing(
        StageId::Copywriting,
        AdapterError::transient("upstream 502"),
    ));
    let config = fixtures::fast_config().with_retry(
        fixtures::fast_config().retry.with_max_attempts(5),
    );
    let cooldown_ms = config.breaker.cooldown_ms;
    let cutout = scripted_cutout();
    let orchestrator = builder(&copy, &cutout).config(config).build().unwrap();

    run_once(&orchestrator, Channel::Instagram).await;
    assert_eq!(copy.call_count(), 5);

    tokio::time::advance(Duration::from_millis(cooldown_ms + 1)).await;
    assert_eq!(
        orchestrator.breaker_snapshots()[&StageId::Copywriting].state,
        BreakerState::HalfOpen
    );

    run_once(&orchestrator, Channel::Instagram).await;
    // Only the probe reaches the adapter.
    assert_eq!(copy.call_count(), 6);
    let snapshots = orchestrator.breaker_snapshots();
    let snapshot = &snapshots[&StageId::Copywriting];
    assert_eq!(snapshot.state, BreakerState::Open);
    assert_eq!(snapshot.cooldown_ms, cooldown_ms * 2);
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_call() {
    let cutout = Arc::new(
        ScriptedAdapter::new(
            StageId::BackgroundRemoval,
            Artifact::from_rgba(&fixtures::cutout_image(800, 800)).unwrap(),
        )
        .with_delay(Duration::from_secs(5)),
    );
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let notifier = Arc::new(CountingNotifier::new());
    let copy = scripted_copy(&fixtures::e2e_plan());
    let orchestrator = builder(&copy, &cutout)
        .metadata(metadata.clone())
        .notifier(notifier.clone())
        .build()
        .unwrap();

    let id = orchestrator
        .submit(fixtures::context(), fixtures::request(Channel::Instagram))
        .await
        .unwrap();
    for _ in 0..400 {
        if cutout.call_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cutout.call_count(), 1);
    assert_eq!(
        orchestrator.status(id).unwrap().current_stage,
        Some(StageId::BackgroundRemoval)
    );

    let started = std::time::Instant::now();
    assert_eq!(orchestrator.cancel(id), CancelAck::Cancelled);
    assert_eq!(orchestrator.status(id).unwrap().status, RunStatus::Cancelled);

    let run = orchestrator.wait(id).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_all_stages_recorded(&run, &[StageId::Copywriting]);
    assert_eq!(orchestrator.cancel(id), CancelAck::AlreadyTerminal);
    assert_eq!(
        orchestrator.output(id).unwrap_err().kind(),
        ErrorKind::Cancelled
    );

    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata.records()[0].status, RunStatus::Cancelled);
    assert!(notifier.notices().is_empty());
}

#[tokio::test]
async fn test_layout_out_of_bounds_fails_compose() {
    let mut plan = fixtures::e2e_plan();
    plan.layout = LayoutSpec::new()
        .with_region(Region::text(RelativeBounds::new(0.9, 0.9, 0.3, 0.3), "50% OFF").with_z(2));
    let h = harness_with(scripted_copy(&plan), scripted_cutout());

    let run = run_once(&h.orchestrator, Channel::Instagram).await;
    assert_run_failed(&run, ErrorKind::Composition);
    for stage in &ALL_BUT_UPSCALE[..4] {
        assert_stage_status(&run, *stage, StageStatus::Success);
    }
    let compose = run.result_for(StageId::Compose).unwrap();
    assert_eq!(compose.status, StageStatus::Failed);
    assert_eq!(compose.attempts, 1);
    assert!(run.result_for(StageId::Upscale).is_none());
}

#[tokio::test]
async fn test_collaborator_failures_do_not_change_outcome() {
    let mut metadata = MockMetadataStore::new();
    metadata
        .expect_persist()
        .times(1)
        .withf(|record| record.status == RunStatus::Failed && record.copy.is_none())
        .returning(|_| Err(AdflowError::Internal("history database offline".into())));
    let notifier = Arc::new(CountingNotifier::failing());

    let copy = Arc::new(ScriptedAdapter::failing(
        StageId::Copywriting,
        AdapterError::rejected("content policy"),
    ));
    let cutout = scripted_cutout();
    let orchestrator = builder(&copy, &cutout)
        .metadata(Arc::new(metadata))
        .notifier(notifier.clone())
        .build()
        .unwrap();

    let run = run_once(&orchestrator, Channel::Instagram).await;
    assert_run_failed(&run, ErrorKind::AdapterRejected);

    let notices = notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].status, RunStatus::Failed);
    assert_eq!(notices[0].failed_stage, Some(StageId::Copywriting));
}

#[tokio::test]
async fn test_completed_run_is_persisted_and_notified() {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let mut notifier = MockNotificationService::new();
    notifier
        .expect_notify()
        .times(1)
        .withf(|notice| notice.status == RunStatus::Completed && notice.message.is_none())
        .returning(|_| Ok(()));

    let copy = scripted_copy(&fixtures::e2e_plan());
    let cutout = scripted_cutout();
    let orchestrator = builder(&copy, &cutout)
        .metadata(metadata.clone())
        .notifier(Arc::new(notifier))
        .build()
        .unwrap();

    let run = run_once(&orchestrator, Channel::Instagram).await;
    assert_run_completed(&run);

    let history = metadata.for_user(&fixtures::context().user_email);
    assert_eq!(history.len(), 1);
    let record = &history[0];
    assert_eq!(record.run_id, run.run_id);
    assert_eq!(record.copy.as_ref().unwrap().headline, fixtures::E2E_HEADLINE);
    assert_eq!(record.image_size, Some((1080, 1080)));
    assert_eq!(record.manifest.success_count, 5);
}

#[tokio::test]
async fn test_image_source_failure_fails_run() {
    let mut images = MockImageSource::new();
    images
        .expect_load()
        .times(1)
        .returning(|_| Err(AdflowError::Internal("bucket unreachable".into())));
    let orchestrator = PipelineOrchestrator::builder()
        .images(Arc::new(images))
        .build()
        .unwrap();

    let run = run_once(&orchestrator, Channel::Banner).await;
    assert_run_failed(&run, ErrorKind::Internal);
    assert!(run.results().is_empty());
}

#[tokio::test]
async fn test_upscale_runs_below_target() {
    let mut profile = ChannelProfile::for_channel(Channel::Instagram);
    profile.target_width = 1200;
    profile.target_height = 1200;
    let copy = scripted_copy(&fixtures::e2e_plan());
    let cutout = scripted_cutout();
    let orchestrator = builder(&copy, &cutout)
        .config(fixtures::fast_config().with_channel(Channel::Instagram, profile))
        .build()
        .unwrap();

    let run = run_once(&orchestrator, Channel::Instagram).await;
    assert_run_completed(&run);
    assert_stage_status(&run, StageId::Upscale, StageStatus::Success);
    let creative = run.final_artifact.unwrap();
    assert_eq!((creative.width(), creative.height()), (1200, 1200));
}

#[tokio::test]
async fn test_all_local_banner_run() {
    let orchestrator = PipelineOrchestrator::builder()
        .config(AdflowConfig::default())
        .images(Arc::new(fixtures::image_source().unwrap()))
        .build()
        .unwrap();

    let run = run_once(&orchestrator, Channel::Banner).await;
    assert_run_completed(&run);

    let plan: CopyPlan = run
        .artifact_for(StageId::Copywriting)
        .unwrap()
        .decode_json()
        .unwrap();
    assert!(plan.background_prompt.contains("no watermark"));
    assert!(!plan.layout.regions.is_empty());

    let creative = run.final_artifact.as_ref().unwrap();
    assert_eq!((creative.width(), creative.height()), (1200, 628));
    assert_stage_status(&run, StageId::Upscale, StageStatus::Skipped);
}

#[tokio::test]
async fn test_runs_are_isolated() {
    let h = harness();
    let a = run_once(&h.orchestrator, Channel::Instagram).await;
    let b = run_once(&h.orchestrator, Channel::Banner).await;
    assert_ne!(a.run_id, b.run_id);
    assert_run_completed(&a);
    assert_run_completed(&b);
    assert_eq!(h.orchestrator.run_count(), 2);

    // Only the channel-independent cutout is shared.
    assert_eq!(h.copy.call_count(), 2);
    assert_eq!(h.cutout.call_count(), 1);
    assert!(b.result_for(StageId::BackgroundRemoval).unwrap().cached);
    assert!(h.orchestrator.status(Uuid::new_v4()).is_none());
}

#[test]
fn test_scripted_adapter_reports_stage() {
    let adapter = scripted_cutout();
    assert_eq!(adapter.stage(), StageId::BackgroundRemoval);
}

/// Serves `n` different product photos and one request per photo.
fn distinct_products(n: u32) -> (InMemoryImageSource, Vec<CreativeRequest>) {
    let mut images = InMemoryImageSource::new();
    let mut requests = Vec::new();
    for i in 0..n {
        let reference = format!("mem://product-{i}");
        let photo = Artifact::from_rgba(&fixtures::product_image(200 + i * 8, 200)).unwrap();
        images = images.with_image(reference.clone(), photo);
        requests.push(
            CreativeRequest::builder(reference, Channel::Instagram)
                .with_brief("hand-glazed ceramic mug")
                .with_product_name("Mug")
                .build(),
        );
    }
    (images, requests)
}

async fn submit_all(
    orchestrator: &PipelineOrchestrator,
    requests: Vec<CreativeRequest>,
) -> Vec<PipelineRun> {
    let mut ids = Vec::new();
    for request in requests {
        ids.push(orchestrator.submit(fixtures::context(), request).await.unwrap());
    }
    join_all(ids.into_iter().map(|id| orchestrator.wait(id)))
        .await
        .into_iter()
        .map(Option::unwrap)
        .collect()
}

fn rejecting_cutout(delay: Duration) -> Arc<ScriptedAdapter> {
    Arc::new(
        ScriptedAdapter::failing(
            StageId::BackgroundRemoval,
            AdapterError::rejected("no subject found"),
        )
        .with_delay(delay),
    )
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_is_shared_across_runs() {
    let (images, requests) = distinct_products(3);
    let copy = scripted_copy(&fixtures::e2e_plan());
    let cutout = rejecting_cutout(Duration::ZERO);
    let config = fixtures::fast_config().with_adapter(
        StageId::BackgroundRemoval,
        AdapterConfig::default().with_rate_limit(RateLimitConfig::new(1, 10.0)),
    );
    let orchestrator = builder(&copy, &cutout)
        .config(config)
        .images(Arc::new(images))
        .build()
        .unwrap();

    let runs = submit_all(&orchestrator, requests).await;
    for run in &runs {
        assert_run_failed(run, ErrorKind::AdapterRejected);
    }

    // One token per 100ms, no matter which run asks.
    let instants = cutout.call_instants();
    assert_eq!(instants.len(), 3);
    for pair in instants.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(99), "{:?}", pair[1] - pair[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_bounds_concurrent_runs() {
    let (images, requests) = distinct_products(3);
    let copy = scripted_copy(&fixtures::e2e_plan());
    let cutout = rejecting_cutout(Duration::from_millis(50));
    let orchestrator = builder(&copy, &cutout)
        .config(fixtures::fast_config().with_max_concurrent_runs(1))
        .images(Arc::new(images))
        .build()
        .unwrap();

    let runs = submit_all(&orchestrator, requests).await;
    assert_eq!(runs.len(), 3);
    assert_eq!(cutout.call_count(), 3);
    assert_eq!(cutout.peak_concurrency(), 1);
    let instants = cutout.call_instants();
    for pair in instants.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(50));
    }
}

#[tokio::test(start_paused = true)]
async fn test_runs_overlap_up_to_worker_limit() {
    let (images, requests) = distinct_products(3);
    let copy = scripted_copy(&fixtures::e2e_plan());
    let cutout = rejecting_cutout(Duration::from_millis(50));
    let orchestrator = builder(&copy, &cutout)
        .config(fixtures::fast_config().with_max_concurrent_runs(3))
        .images(Arc::new(images))
        .build()
        .unwrap();

    submit_all(&orchestrator, requests).await;
    assert_eq!(cutout.peak_concurrency(), 3);
}

#[derive(Debug)]
struct PanickingCutout;

#[async_trait]
impl StageAdapter for PanickingCutout {
    fn stage(&self) -> StageId {
        StageId::BackgroundRemoval
    }

    fn validate(&self, _input: &StageInput) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn invoke(&self, _input: &StageInput, _timeout: Duration) -> Result<Artifact, AdapterError> {
        panic!("segmentation sdk bug");
    }
}

#[tokio::test]
async fn test_panicking_adapter_fails_run() {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let notifier = Arc::new(CountingNotifier::new());
    let copy = scripted_copy(&fixtures::e2e_plan());
    let orchestrator = PipelineOrchestrator::builder()
        .config(fixtures::fast_config())
        .images(Arc::new(fixtures::image_source().unwrap()))
        .adapter(copy)
        .adapter(Arc::new(PanickingCutout))
        .metadata(metadata.clone())
        .notifier(notifier.clone())
        .build()
        .unwrap();

    let id = orchestrator
        .submit(fixtures::context(), fixtures::request(Channel::Instagram))
        .await
        .unwrap();
    let run = tokio::time::timeout(Duration::from_secs(3), orchestrator.wait(id))
        .await
        .expect("run should finish")
        .unwrap();

    assert_run_failed(&run, ErrorKind::Internal);
    assert!(run.error.as_ref().unwrap().to_string().contains("segmentation sdk bug"));
    assert_eq!(run.current_stage, None);
    assert_stage_status(&run, StageId::Copywriting, StageStatus::Success);
    assert_stage_status(&run, StageId::BackgroundRemoval, StageStatus::Failed);
    assert_eq!(metadata.len(), 1);
    assert_eq!(notifier.notices().len(), 1);
    assert_eq!(notifier.notices()[0].failed_stage, Some(StageId::BackgroundRemoval));
}

#[derive(Debug)]
struct PanickingNotifier;

#[async_trait]
impl NotificationService for PanickingNotifier {
    async fn notify(&self, _notice: &RunNotice) -> Result<(), AdflowError> {
        panic!("mail template missing");
    }
}

#[tokio::test]
async fn test_panicking_notifier_does_not_block_wait() {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let copy = scripted_copy(&fixtures::e2e_plan());
    let cutout = scripted_cutout();
    let orchestrator = builder(&copy, &cutout)
        .metadata(metadata.clone())
        .notifier(Arc::new(PanickingNotifier))
        .build()
        .unwrap();

    let id = orchestrator
        .submit(fixtures::context(), fixtures::request(Channel::Instagram))
        .await
        .unwrap();
    let run = tokio::time::timeout(Duration::from_secs(5), orchestrator.wait(id))
        .await
        .expect("run should finish")
        .unwrap();
    assert_run_completed(&run);
    assert_eq!(metadata.len(), 1);
}

#[tokio::test]
async fn test_undecodable_copy_plan_records_failed_stage() {
    let copy = Arc::new(ScriptedAdapter::new(
        StageId::Copywriting,
        Artifact::from_json(&serde_json::json!({ "headline": 7 })).unwrap(),
    ));
    let h = harness_with(copy, scripted_cutout());

    let run = run_once(&h.orchestrator, Channel::Instagram).await;
    assert_run_failed(&run, ErrorKind::Serialization);
    assert_stage_status(&run, StageId::BackgroundRemoval, StageStatus::Success);
    assert_stage_status(&run, StageId::BackgroundGeneration, StageStatus::Failed);
    let failed = run.result_for(StageId::BackgroundGeneration).unwrap();
    assert_eq!(failed.attempts, 0);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn test_finished_runs_beyond_limit_are_released() {
    let copy = scripted_copy(&fixtures::e2e_plan());
    let cutout = scripted_cutout();
    let orchestrator = builder(&copy, &cutout)
        .config(fixtures::fast_config().with_max_retained_runs(2))
        .build()
        .unwrap();

    let first = run_once(&orchestrator, Channel::Instagram).await;
    let second = run_once(&orchestrator, Channel::Instagram).await;
    let third = run_once(&orchestrator, Channel::Instagram).await;

    assert_eq!(orchestrator.run_count(), 2);
    assert!(orchestrator.status(first.run_id).is_none());
    assert!(orchestrator.status(second.run_id).is_some());
    assert!(orchestrator.output(third.run_id).is_ok());
}

#[tokio::test]
async fn test_forget_only_releases_finished_runs() {
    let cutout = Arc::new(
        ScriptedAdapter::new(
            StageId::BackgroundRemoval,
            Artifact::from_rgba(&fixtures::cutout_image(800, 800)).unwrap(),
        )
        .with_delay(Duration::from_secs(5)),
    );
    let copy = scripted_copy(&fixtures::e2e_plan());
    let orchestrator = builder(&copy, &cutout).build().unwrap();

    let id = orchestrator
        .submit(fixtures::context(), fixtures::request(Channel::Instagram))
        .await
        .unwrap();
    for _ in 0..400 {
        if cutout.call_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!orchestrator.forget(id));
    assert_eq!(orchestrator.run_count(), 1);

    orchestrator.cancel(id);
    orchestrator.wait(id).await.unwrap();
    assert!(orchestrator.forget(id));
    assert!(orchestrator.status(id).is_none());
    assert_eq!(orchestrator.run_count(), 0);
    assert!(!orchestrator.forget(id));
    assert!(!orchestrator.forget(Uuid::new_v4()));
}
