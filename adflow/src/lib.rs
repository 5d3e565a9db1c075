//! # Adflow
//!
//! A stage pipeline that turns a short creative brief and a product photo
//! into a finished advertising image.
//!
//! Adflow provides:
//!
//! - **Stage orchestration**: copywriting, background removal, background
//!   generation, lighting and upscaling behind one adapter contract
//! - **Resilience**: per-adapter retry policies, circuit breakers and rate limits
//! - **Caching**: content-addressed stage outputs shared across runs
//! - **Deterministic compositing**: declarative layouts rendered to
//!   byte-identical bitmaps
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use adflow::prelude::*;
//!
//! let orchestrator = PipelineOrchestrator::builder()
//!     .images(Arc::new(images))
//!     .build()?;
//!
//! let request = CreativeRequest::builder("mem://mug", Channel::Instagram)
//!     .with_brief("hand-glazed ceramic mug")
//!     .build();
//! let run_id = orchestrator.submit(RunContext::new("owner@shop.test"), request).await?;
//! orchestrator.wait(run_id).await;
//! let (creative, manifest) = orchestrator.output(run_id)?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adapters;
pub mod cancellation;
pub mod compositor;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod layout;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapters::{AdapterRegistry, CopyPlan, StageAdapter, StageInput};
    pub use crate::cancellation::CancellationToken;
    pub use crate::compositor::{compose, CompositeCanvas};
    pub use crate::config::{AdflowConfig, ChannelProfile, FontScale};
    pub use crate::core::{
        Artifact, Channel, ContentType, CreativeRequest, LayoutSpec, PipelineRun, Region,
        RelativeBounds, RunContext, RunManifest, RunStatus, StageId, StageResult, StageStatus,
        Tone,
    };
    pub use crate::errors::{AdapterError, AdflowError, CompositionError, ErrorKind, ValidationError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::layout::{LayoutResolver, ResolvedLayout};
    pub use crate::pipeline::{
        CancelAck, FsImageSource, InMemoryImageSource, PipelineOrchestrator, StageGraph,
    };
    pub use crate::resilience::{BreakerConfig, RetryPolicy};
    pub use crate::store::{ArtifactStore, InMemoryArtifactStore};
}
