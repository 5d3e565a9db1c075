//! Testing utilities for adflow pipelines.
//!
//! This module provides:
//! - Scripted stage adapters with call counting and delays
//! - Fixtures for product images, requests, copy plans and configs
//! - Assertions over runs and manifests

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{
    assert_all_stages_recorded, assert_run_completed, assert_run_failed, assert_stage_status,
};
pub use mocks::{CountingNotifier, ScriptedAdapter};
