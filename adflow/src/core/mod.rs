//! Core domain model types for adflow.
//!
//! This module contains the fundamental types shared by the orchestrator,
//! the adapters and the compositor:
//! - Stage identifiers and status enums
//! - Immutable artifacts and their summaries
//! - Creative requests and layout specifications
//! - Caller context, pipeline runs, stage results and manifests

mod artifact;
mod context;
mod layout;
mod request;
mod run;
mod stage;
mod status;

pub use artifact::{Artifact, ArtifactSummary, ContentType};
pub use context::RunContext;
pub use layout::{
    Color, FontSize, FontToken, LayoutSpec, Region, RegionKind, RegionStyle, RelativeBounds,
    TextAlign,
};
pub use request::{Channel, CreativeRequest, CreativeRequestBuilder, ProductImageRef, Tone};
pub use run::{ManifestEntry, PipelineRun, RunManifest, StageError, StageResult};
pub use stage::StageId;
pub use status::{RunStatus, StageStatus};
