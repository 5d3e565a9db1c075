//! Per-adapter circuit breaker.
//!
//! Consecutive service-health failures open the breaker for a cooldown.
//! After the cooldown a single probe call is let through; its outcome
//! either closes the breaker or reopens it with a doubled cooldown.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls fail immediately until the cooldown elapses.
    Open,
    /// One probe call is allowed.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_max_cooldown_ms() -> u64 {
    300_000
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Initial cooldown in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Cooldown ceiling in milliseconds.
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

impl BreakerConfig {
    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the initial cooldown.
    #[must_use]
    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    /// Sets the cooldown ceiling.
    #[must_use]
    pub fn with_max_cooldown_ms(mut self, max_cooldown_ms: u64) -> Self {
        self.max_cooldown_ms = max_cooldown_ms;
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Snapshot of a breaker for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: BreakerState,
    /// Consecutive counted failures.
    pub consecutive_failures: u32,
    /// Current cooldown in milliseconds.
    pub cooldown_ms: u64,
}

/// A circuit breaker shared by every run using one adapter.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let cooldown = Duration::from_millis(config.cooldown_ms);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                cooldown,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// The adapter this breaker guards.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state, promoting Open to HalfOpen once the
    /// cooldown has elapsed.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        Self::refresh(&mut inner);
        inner.state
    }

    /// Returns a snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        Self::refresh(&mut inner);
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            cooldown_ms: u64::try_from(inner.cooldown.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Asks for permission to call the adapter.
    ///
    /// Returns false while Open, and in HalfOpen once the probe is taken.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        Self::refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    tracing::info!(adapter = %self.name, "Circuit breaker admitting probe call");
                    true
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let was = inner.state;
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.cooldown = Duration::from_millis(self.config.cooldown_ms);
        inner.opened_at = None;
        inner.probe_in_flight = false;
        if was != BreakerState::Closed {
            tracing::info!(adapter = %self.name, "Circuit breaker closed");
        }
    }

    /// Records a service-health failure (timeout or transient error).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            BreakerState::HalfOpen => {
                let doubled = inner.cooldown.saturating_mul(2);
                inner.cooldown = doubled.min(Duration::from_millis(self.config.max_cooldown_ms));
                self.open(&mut inner);
            }
            BreakerState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                self.open(&mut inner);
            }
            BreakerState::Closed | BreakerState::Open => {}
        }
    }

    /// Records an outcome that says nothing about service health, such as a
    /// rejection or an aborted call. Frees the probe slot if one was taken.
    pub fn record_neutral(&self) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        tracing::warn!(
            adapter = %self.name,
            consecutive_failures = inner.consecutive_failures,
            cooldown_ms = u64::try_from(inner.cooldown.as_millis()).unwrap_or(u64::MAX),
            "Circuit breaker opened"
        );
    }

    fn refresh(inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= inner.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = false;
                }
            }
        }
    }
}
