//! Failure handling shared across runs: retry policy, circuit breakers and
//! rate limiters.
//!
//! Breakers and buckets are owned per adapter and shared by every run that
//! calls that adapter.

mod breaker;
mod rate_limit;
mod retry;

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use rate_limit::{RateLimitConfig, TokenBucket};
pub use retry::{BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy, RetryState};

use crate::core::StageId;
use std::collections::HashMap;
use std::sync::Arc;

/// Resilience state guarding one adapter.
#[derive(Debug)]
pub struct AdapterGuards {
    /// The adapter's circuit breaker.
    pub breaker: CircuitBreaker,
    /// The adapter's rate limiter, if limited.
    pub limiter: Option<TokenBucket>,
}

impl AdapterGuards {
    /// Creates guards for a stage.
    #[must_use]
    pub fn new(stage: StageId, breaker: &BreakerConfig, rate_limit: Option<&RateLimitConfig>) -> Self {
        Self {
            breaker: CircuitBreaker::new(stage.as_str(), breaker.clone()),
            limiter: rate_limit.map(TokenBucket::new),
        }
    }
}

/// Per-stage guards shared by all runs of one orchestrator.
#[derive(Debug, Default)]
pub struct GuardRegistry {
    guards: HashMap<StageId, Arc<AdapterGuards>>,
}

impl GuardRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers guards for a stage, replacing any existing ones.
    pub fn insert(&mut self, stage: StageId, guards: AdapterGuards) {
        self.guards.insert(stage, Arc::new(guards));
    }

    /// Returns the guards of a stage.
    #[must_use]
    pub fn get(&self, stage: StageId) -> Option<Arc<AdapterGuards>> {
        self.guards.get(&stage).cloned()
    }

    /// Returns a snapshot of every breaker.
    #[must_use]
    pub fn breaker_snapshots(&self) -> HashMap<StageId, BreakerSnapshot> {
        self.guards
            .iter()
            .map(|(stage, g)| (*stage, g.breaker.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_shares_guards() {
        let mut registry = GuardRegistry::new();
        registry.insert(
            StageId::Upscale,
            AdapterGuards::new(StageId::Upscale, &BreakerConfig::default(), None),
        );
        let a = registry.get(StageId::Upscale).unwrap();
        let b = registry.get(StageId::Upscale).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.limiter.is_none());
        assert_eq!(a.breaker.name(), "upscale");
        assert!(registry.get(StageId::Compose).is_none());
        assert_eq!(
            registry.breaker_snapshots()[&StageId::Upscale].state,
            BreakerState::Closed
        );
    }
}
