//! Pipeline orchestration.
//!
//! The orchestrator drives each run through the stage graph. For every stage
//! it resolves the input from the request and earlier outputs, consults the
//! artifact store, and otherwise invokes the stage's adapter under its retry
//! policy, circuit breaker and rate limit. The compose stage runs in-process.

mod collaborators;
mod compose;
mod graph;
mod inputs;
mod orchestrator;

#[cfg(test)]
mod integration_tests;

pub use collaborators::{
    AuthGate, CopyRecord, EmailAuthGate, FsImageSource, ImageSource, InMemoryImageSource,
    InMemoryMetadataStore, MetadataStore, NoOpNotificationService, NotificationService, RunNotice,
    RunRecord,
};
#[cfg(test)]
pub use collaborators::{MockImageSource, MockMetadataStore, MockNotificationService};
pub use compose::run_compose;
pub use graph::{StageGraph, StageGraphBuilder};
pub use inputs::{data_dependencies, InputResolver};
pub use orchestrator::{CancelAck, OrchestratorBuilder, PipelineOrchestrator};
