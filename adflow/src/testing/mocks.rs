//! Scripted adapters and collaborators for testing.

use crate::adapters::StageAdapter;
use crate::adapters::StageInput;
use crate::core::{Artifact, StageId};
use crate::errors::{AdapterError, AdflowError, ValidationError};
use crate::pipeline::{NotificationService, RunNotice};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

type Outcome = Result<Artifact, AdapterError>;

/// An adapter that replays queued outcomes and counts its calls.
///
/// Queued outcomes are consumed in order; once the queue is empty every
/// call returns the fallback outcome.
#[derive(Debug)]
pub struct ScriptedAdapter {
    stage: StageId,
    queue: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Outcome>,
    delay: Mutex<Option<Duration>>,
    call_count: Mutex<usize>,
    inputs: Mutex<Vec<String>>,
    called_at: Mutex<Vec<Instant>>,
    in_flight: Mutex<(usize, usize)>,
}

impl ScriptedAdapter {
    /// Creates an adapter that always returns `artifact`.
    #[must_use]
    pub fn new(stage: StageId, artifact: Artifact) -> Self {
        Self::with_fallback(stage, Ok(artifact))
    }

    /// Creates an adapter that always fails with `error`.
    #[must_use]
    pub fn failing(stage: StageId, error: AdapterError) -> Self {
        Self::with_fallback(stage, Err(error))
    }

    fn with_fallback(stage: StageId, fallback: Outcome) -> Self {
        Self {
            stage,
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            delay: Mutex::new(None),
            call_count: Mutex::new(0),
            inputs: Mutex::new(Vec::new()),
            called_at: Mutex::new(Vec::new()),
            in_flight: Mutex::new((0, 0)),
        }
    }

    /// Queues an outcome ahead of the fallback.
    #[must_use]
    pub fn then(self, outcome: Outcome) -> Self {
        self.queue.lock().push_back(outcome);
        self
    }

    /// Queues `n` copies of a failure.
    #[must_use]
    pub fn then_fail(self, n: usize, error: AdapterError) -> Self {
        {
            let mut queue = self.queue.lock();
            for _ in 0..n {
                queue.push_back(Err(error.clone()));
            }
        }
        self
    }

    /// Makes every call sleep before answering.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Replaces the fallback outcome.
    pub fn set_fallback(&self, outcome: Outcome) {
        *self.fallback.lock() = outcome;
    }

    /// Number of `invoke` calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }

    /// Canonical hashes of the inputs seen, in call order.
    #[must_use]
    pub fn recorded_inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }

    /// When each call started, in call order.
    #[must_use]
    pub fn call_instants(&self) -> Vec<Instant> {
        self.called_at.lock().clone()
    }

    /// Most calls that were in progress at the same time.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.in_flight.lock().1
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        *self.call_count.lock() = 0;
        self.inputs.lock().clear();
        self.called_at.lock().clear();
        *self.in_flight.lock() = (0, 0);
    }

    fn next_outcome(&self) -> Outcome {
        let queued = self.queue.lock().pop_front();
        queued.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

#[async_trait]
impl StageAdapter for ScriptedAdapter {
    fn stage(&self) -> StageId {
        self.stage
    }

    fn validate(&self, input: &StageInput) -> Result<(), ValidationError> {
        if input.stage() == self.stage {
            Ok(())
        } else {
            Err(ValidationError::new(format!(
                "adapter for '{}' received input for '{}'",
                self.stage,
                input.stage()
            )))
        }
    }

    async fn invoke(&self, input: &StageInput, _timeout: Duration) -> Result<Artifact, AdapterError> {
        *self.call_count.lock() += 1;
        self.inputs.lock().push(input.canonical_hash());
        self.called_at.lock().push(Instant::now());
        {
            let mut in_flight = self.in_flight.lock();
            in_flight.0 += 1;
            in_flight.1 = in_flight.1.max(in_flight.0);
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.lock().0 -= 1;
        self.next_outcome()
    }
}

/// A notification service that remembers what it was asked to send.
#[derive(Debug, Default)]
pub struct CountingNotifier {
    notices: Mutex<Vec<RunNotice>>,
    fail: bool,
}

impl CountingNotifier {
    /// Creates a notifier that accepts every notice.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a notifier that records notices but reports failure.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Notices received so far.
    #[must_use]
    pub fn notices(&self) -> Vec<RunNotice> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl NotificationService for CountingNotifier {
    async fn notify(&self, notice: &RunNotice) -> Result<(), AdflowError> {
        self.notices.lock().push(notice.clone());
        if self.fail {
            return Err(AdflowError::Internal("mail relay unavailable".into()));
        }
        Ok(())
    }
}
