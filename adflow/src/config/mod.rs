//! Configuration for the orchestrator, its adapters and channels.
//!
//! Every field has a serde default, so a partial JSON document (or an empty
//! object) yields a working configuration. [`AdflowConfig::validate`] runs on
//! every load.

mod channel;

pub use channel::{ChannelProfile, FontScale};

use crate::core::{Channel, StageId};
use crate::errors::AdflowError;
use crate::resilience::{BreakerConfig, RateLimitConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_max_retained_runs() -> usize {
    1024
}

/// Orchestrator-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Runs executing at once; further submissions wait for a worker.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Finished runs kept for `status`/`wait`/`output`; the oldest are
    /// released first.
    #[serde(default = "default_max_retained_runs")]
    pub max_retained_runs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            max_retained_runs: default_max_retained_runs(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Per-adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Time bound of one adapter call.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Token bucket shared by all runs; unlimited when absent.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            rate_limit: None,
        }
    }
}

impl AdapterConfig {
    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// The timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Layout resolution settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Whether regions with equal z may overlap when a layout does not say.
    #[serde(default)]
    pub allow_overlap: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `adflow=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Include ANSI colours in text output.
    #[serde(default)]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            ansi: false,
        }
    }
}

fn default_channels() -> BTreeMap<Channel, ChannelProfile> {
    Channel::ALL
        .into_iter()
        .map(|c| (c, ChannelProfile::for_channel(c)))
        .collect()
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdflowConfig {
    /// Orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Retry policy applied to every adapter call.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Circuit breaker settings applied per adapter.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Per-stage adapter settings; stages not listed use the defaults.
    #[serde(default)]
    pub adapters: BTreeMap<StageId, AdapterConfig>,
    /// Layout settings.
    #[serde(default)]
    pub layout: LayoutConfig,
    /// Channel profiles; channels not listed use the built-in profile.
    #[serde(default = "default_channels")]
    pub channels: BTreeMap<Channel, ChannelProfile>,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AdflowConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            adapters: BTreeMap::new(),
            layout: LayoutConfig::default(),
            channels: default_channels(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AdflowConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, AdflowError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AdflowError::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AdflowError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AdflowError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_max_concurrent_runs(mut self, n: usize) -> Self {
        self.orchestrator.max_concurrent_runs = n;
        self
    }

    /// Sets how many finished runs stay queryable.
    #[must_use]
    pub fn with_max_retained_runs(mut self, n: usize) -> Self {
        self.orchestrator.max_retained_runs = n;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the breaker settings.
    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Overrides one stage's adapter settings.
    #[must_use]
    pub fn with_adapter(mut self, stage: StageId, adapter: AdapterConfig) -> Self {
        self.adapters.insert(stage, adapter);
        self
    }

    /// Sets the default overlap policy.
    #[must_use]
    pub fn with_allow_overlap(mut self, allow: bool) -> Self {
        self.layout.allow_overlap = allow;
        self
    }

    /// Overrides a channel profile.
    #[must_use]
    pub fn with_channel(mut self, channel: Channel, profile: ChannelProfile) -> Self {
        self.channels.insert(channel, profile);
        self
    }

    /// Returns the adapter settings of a stage.
    #[must_use]
    pub fn adapter(&self, stage: StageId) -> AdapterConfig {
        self.adapters.get(&stage).cloned().unwrap_or_default()
    }

    /// Returns the profile of a channel.
    #[must_use]
    pub fn channel(&self, channel: Channel) -> ChannelProfile {
        self.channels
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| ChannelProfile::for_channel(channel))
    }

    /// Checks the configuration for values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), AdflowError> {
        let invalid = |msg: String| Err(AdflowError::Configuration(msg));

        if self.orchestrator.max_concurrent_runs == 0 {
            return invalid("orchestrator.max_concurrent_runs must be at least 1".into());
        }
        if self.orchestrator.max_retained_runs == 0 {
            return invalid("orchestrator.max_retained_runs must be at least 1".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms".into());
        }
        if self.breaker.failure_threshold == 0 {
            return invalid("breaker.failure_threshold must be at least 1".into());
        }
        if self.breaker.cooldown_ms > self.breaker.max_cooldown_ms {
            return invalid("breaker.cooldown_ms must not exceed breaker.max_cooldown_ms".into());
        }
        for (stage, adapter) in &self.adapters {
            if adapter.timeout_ms == 0 {
                return invalid(format!("adapters.{stage}.timeout_ms must be positive"));
            }
            if let Some(limit) = &adapter.rate_limit {
                if limit.capacity == 0 {
                    return invalid(format!("adapters.{stage}.rate_limit.capacity must be positive"));
                }
                if !limit.refill_per_sec.is_finite() || limit.refill_per_sec <= 0.0 {
                    return invalid(format!(
                        "adapters.{stage}.rate_limit.refill_per_sec must be positive"
                    ));
                }
            }
        }
        for (channel, profile) in &self.channels {
            profile
                .validate()
                .map_err(|e| AdflowError::Configuration(format!("channels.{channel}: {e}")))?;
        }
        Ok(())
    }
}
