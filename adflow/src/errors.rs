//! Error types for the adflow pipeline.
//!
//! The taxonomy separates failures that happen before any external call
//! (validation), failures reported by external services (timeouts,
//! rejections, transient outages), and failures of the deterministic core
//! (composition). Retryability is a property of the kind, not of the call
//! site.

use crate::core::{ArtifactSummary, StageId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Coarse classification of every error the pipeline can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request or layout, detected before any external call.
    Validation,
    /// An external call exceeded its time bound.
    AdapterTimeout,
    /// An external service declined the request (e.g. a safety filter).
    AdapterRejected,
    /// Network or 5xx-class failure, or an open circuit breaker.
    TransientService,
    /// Retries exhausted; terminal for the run.
    FatalPipeline,
    /// Layout resolution or compositing failed.
    Composition,
    /// The run was cancelled by its caller.
    Cancelled,
    /// The caller is not allowed to submit runs.
    Unauthorized,
    /// Invalid configuration.
    Configuration,
    /// Payload encoding or decoding failed.
    Serialization,
    /// Unexpected orchestrator failure.
    Internal,
}

impl ErrorKind {
    /// Returns true if an error of this kind may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AdapterTimeout | Self::TransientService)
    }

    /// Returns true if an error of this kind reflects the health of the
    /// external service and should count against its circuit breaker.
    #[must_use]
    pub fn counts_against_breaker(&self) -> bool {
        self.is_retryable()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::AdapterTimeout => "adapter_timeout",
            Self::AdapterRejected => "adapter_rejected",
            Self::TransientService => "transient_service",
            Self::FatalPipeline => "fatal_pipeline",
            Self::Composition => "composition",
            Self::Cancelled => "cancelled",
            Self::Unauthorized => "unauthorized",
            Self::Configuration => "configuration",
            Self::Serialization => "serialization",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// The main error type for adflow operations.
#[derive(Debug, Clone, Error)]
pub enum AdflowError {
    /// The request, a stage input or a layout failed validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// An adapter call exceeded its time bound.
    #[error("Adapter '{stage}' timed out after {timeout_ms}ms")]
    AdapterTimeout {
        /// The stage whose adapter timed out.
        stage: StageId,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    /// An external service declined the request.
    #[error("Adapter '{stage}' rejected the request: {reason}")]
    AdapterRejected {
        /// The rejecting stage.
        stage: StageId,
        /// The reason reported by the service.
        reason: String,
    },

    /// A transient service failure, or a call refused by an open breaker.
    #[error("Transient service error in '{stage}': {message}")]
    TransientService {
        /// The failing stage.
        stage: StageId,
        /// Failure detail.
        message: String,
    },

    /// Retries were exhausted for a stage.
    #[error("{0}")]
    FatalPipeline(#[from] FatalPipelineError),

    /// Layout resolution or compositing failed.
    #[error("{0}")]
    Composition(#[from] CompositionError),

    /// The run was cancelled.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// The auth gate refused the caller.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization or image codec error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdflowError {
    /// Returns the error's kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::AdapterTimeout { .. } => ErrorKind::AdapterTimeout,
            Self::AdapterRejected { .. } => ErrorKind::AdapterRejected,
            Self::TransientService { .. } => ErrorKind::TransientService,
            Self::FatalPipeline(_) => ErrorKind::FatalPipeline,
            Self::Composition(_) => ErrorKind::Composition,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the error may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Attributes an adapter error to the stage that raised it.
    #[must_use]
    pub fn from_adapter(stage: StageId, err: AdapterError) -> Self {
        match err {
            AdapterError::Validation(e) => Self::Validation(e.with_stage(stage)),
            AdapterError::Timeout { timeout_ms } => Self::AdapterTimeout { stage, timeout_ms },
            AdapterError::Rejected { reason } => Self::AdapterRejected { stage, reason },
            AdapterError::Transient { message } => Self::TransientService { stage, message },
        }
    }

    /// Creates a transient error for a call refused by an open breaker.
    #[must_use]
    pub fn breaker_open(stage: StageId) -> Self {
        Self::TransientService {
            stage,
            message: "circuit breaker is open".to_string(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));
        if let Self::FatalPipeline(fatal) = self {
            map.insert("stage".to_string(), serde_json::json!(fatal.stage.to_string()));
            map.insert(
                "last_successful_stage".to_string(),
                fatal
                    .last_successful_stage
                    .map_or(serde_json::Value::Null, |s| serde_json::json!(s.to_string())),
            );
        }
        map
    }
}

impl Serialize for AdflowError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: std::collections::BTreeMap<_, _> = self.to_dict().into_iter().collect();
        map.serialize(serializer)
    }
}

impl From<serde_json::Error> for AdflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for AdflowError {
    fn from(err: image::ImageError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AdflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("IO error: {err}"))
    }
}

/// The uniform failure shape every stage adapter returns.
///
/// Adapters never let a provider error escape uninterpreted; they map it
/// onto one of these variants and the orchestrator attributes it to a stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The stage input does not satisfy the adapter's schema.
    #[error("{0}")]
    Validation(ValidationError),

    /// The external call exceeded its bound.
    #[error("timed out after {timeout_ms}ms")]
    Timeout {
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    /// The service declined the request.
    #[error("rejected: {reason}")]
    Rejected {
        /// Reason reported by the service.
        reason: String,
    },

    /// Network, 5xx-class or malformed-response failure.
    #[error("transient service error: {message}")]
    Transient {
        /// Failure detail.
        message: String,
    },
}

impl AdapterError {
    /// Creates a rejection.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected { reason: reason.into() }
    }

    /// Creates a transient failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into() }
    }

    /// Creates a validation failure.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(message))
    }

    /// Returns the error's kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Timeout { .. } => ErrorKind::AdapterTimeout,
            Self::Rejected { .. } => ErrorKind::AdapterRejected,
            Self::Transient { .. } => ErrorKind::TransientService,
        }
    }
}

impl From<ValidationError> for AdapterError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

/// Error raised when a request, stage input or layout is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Validation failed{}: {message}", .field.as_ref().map(|f| format!(" for '{f}'")).unwrap_or_default())]
pub struct ValidationError {
    /// The error message.
    pub message: String,
    /// The offending field, if known.
    pub field: Option<String>,
    /// The stage whose input was rejected, if any.
    pub stage: Option<StageId>,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
            stage: None,
        }
    }

    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(message).with_field(field)
    }

    /// Sets the offending field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Sets the stage whose input was rejected.
    #[must_use]
    pub fn with_stage(mut self, stage: StageId) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// Terminal error raised when a stage exhausts its retry budget.
///
/// Carries the last stage that completed successfully so callers can
/// inspect or resume from it.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' failed after {attempts} attempt(s): {cause}")]
pub struct FatalPipelineError {
    /// The stage that exhausted its retries.
    pub stage: StageId,
    /// Number of attempts made.
    pub attempts: u32,
    /// The last underlying error.
    pub cause: String,
    /// Kind of the last underlying error.
    pub cause_kind: ErrorKind,
    /// The last stage that completed successfully, if any.
    pub last_successful_stage: Option<StageId>,
    /// Summary of the last successful stage's artifact.
    pub last_artifact: Option<ArtifactSummary>,
}

impl FatalPipelineError {
    /// Creates a new fatal pipeline error.
    #[must_use]
    pub fn new(stage: StageId, attempts: u32, cause: &AdflowError) -> Self {
        Self {
            stage,
            attempts,
            cause: cause.to_string(),
            cause_kind: cause.kind(),
            last_successful_stage: None,
            last_artifact: None,
        }
    }

    /// Records the last successful stage and its artifact.
    #[must_use]
    pub fn with_last_success(
        mut self,
        stage: Option<StageId>,
        artifact: Option<ArtifactSummary>,
    ) -> Self {
        self.last_successful_stage = stage;
        self.last_artifact = artifact;
        self
    }
}

/// Error raised by the layout resolver or the compositor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Composition error: {message}")]
pub struct CompositionError {
    /// The error message.
    pub message: String,
    /// Index of the offending region in the layout, if any.
    pub region: Option<usize>,
}

impl CompositionError {
    /// Creates a new composition error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            region: None,
        }
    }

    /// Creates a composition error for a specific region.
    #[must_use]
    pub fn for_region(region: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            region: Some(region),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::AdapterTimeout.is_retryable());
        assert!(ErrorKind::TransientService.is_retryable());
        assert!(!ErrorKind::AdapterRejected.is_retryable());
        assert!(!ErrorKind::Composition.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::FatalPipeline.is_retryable());
    }

    #[test]
    fn test_from_adapter_attributes_stage() {
        let err = AdflowError::from_adapter(
            StageId::BackgroundGeneration,
            AdapterError::Timeout { timeout_ms: 500 },
        );
        assert_eq!(err.kind(), ErrorKind::AdapterTimeout);
        assert!(err.to_string().contains("background_generation"));

        let err = AdflowError::from_adapter(
            StageId::Copywriting,
            AdapterError::invalid("brief is empty"),
        );
        match err {
            AdflowError::Validation(v) => assert_eq!(v.stage, Some(StageId::Copywriting)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_breaker_open_is_transient() {
        let err = AdflowError::breaker_open(StageId::Upscale);
        assert_eq!(err.kind(), ErrorKind::TransientService);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::field("brief", "must not be empty");
        assert_eq!(err.to_string(), "Validation failed for 'brief': must not be empty");

        let err = ValidationError::new("bad input");
        assert_eq!(err.to_string(), "Validation failed: bad input");
    }

    #[test]
    fn test_fatal_error_to_dict() {
        let cause = AdflowError::TransientService {
            stage: StageId::LightingComposite,
            message: "503".to_string(),
        };
        let fatal = FatalPipelineError::new(StageId::LightingComposite, 3, &cause)
            .with_last_success(Some(StageId::BackgroundGeneration), None);
        let err = AdflowError::from(fatal);

        let dict = err.to_dict();
        assert_eq!(dict.get("kind").unwrap(), "fatal_pipeline");
        assert_eq!(dict.get("last_successful_stage").unwrap(), "background_generation");
        assert_eq!(dict.get("retryable").unwrap(), false);
    }
}
