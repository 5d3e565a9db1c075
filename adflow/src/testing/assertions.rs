//! Assertions over runs and manifests.

use crate::core::{PipelineRun, RunStatus, StageId, StageStatus};
use crate::errors::ErrorKind;

/// Asserts that the run completed with a final artifact.
pub fn assert_run_completed(run: &PipelineRun) {
    assert_eq!(
        run.status,
        RunStatus::Completed,
        "Expected completed run, got {} (error: {:?})",
        run.status,
        run.error
    );
    assert!(run.final_artifact.is_some(), "Completed run has no final artifact");
}

/// Asserts that the run failed with an error of `kind`.
pub fn assert_run_failed(run: &PipelineRun, kind: ErrorKind) {
    assert_eq!(run.status, RunStatus::Failed, "Expected failed run, got {}", run.status);
    let actual = run.error.as_ref().map(crate::errors::AdflowError::kind);
    assert_eq!(actual, Some(kind), "Expected error kind {kind:?}, got {actual:?}");
}

/// Asserts the recorded status of one stage.
pub fn assert_stage_status(run: &PipelineRun, stage: StageId, expected: StageStatus) {
    let actual = run.result_for(stage).map(|r| r.status);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{stage}' to be {expected}, got {actual:?}"
    );
}

/// Asserts that the run recorded exactly `stages`, in order.
pub fn assert_all_stages_recorded(run: &PipelineRun, stages: &[StageId]) {
    let recorded: Vec<StageId> = run.results().iter().map(|r| r.stage).collect();
    assert_eq!(recorded, stages, "Unexpected stage sequence");
}
