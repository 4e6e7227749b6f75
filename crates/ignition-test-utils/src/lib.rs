//! Shared test fixtures for `ignition-core` and `ignition-probes` integration
//! tests: a [`ControllableSignal`] whose delay and terminal result are picked
//! by the test, plus small helpers for asserting on an [`AggregateResult`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ignition_core::{AggregateResult, CancellationToken, Signal, SignalStatus};

/// What a [`ControllableSignal`] does once its configured delay elapses.
#[derive(Clone)]
pub enum ScriptedOutcome {
    Succeed,
    Fail(String),
    /// Never returns on its own; only resolves via cancellation of `ctx`.
    HangUntilCancelled,
}

/// A [`Signal`] whose timing and result are chosen by the test rather than by
/// talking to a real dependency. Counts how many times `wait` was actually
/// invoked so tests can assert on the "at most 1 + max_retries" invariant.
pub struct ControllableSignal {
    name: String,
    stage: u32,
    timeout: Option<Duration>,
    delay: Duration,
    outcome: ScriptedOutcome,
    calls: Arc<AtomicU32>,
}

impl ControllableSignal {
    pub fn new(name: impl Into<String>, delay: Duration, outcome: ScriptedOutcome) -> Self {
        Self {
            name: name.into(),
            stage: 0,
            timeout: None,
            delay,
            outcome,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn succeeding(name: impl Into<String>, delay: Duration) -> Self {
        Self::new(name, delay, ScriptedOutcome::Succeed)
    }

    pub fn failing(name: impl Into<String>, delay: Duration, message: impl Into<String>) -> Self {
        Self::new(name, delay, ScriptedOutcome::Fail(message.into()))
    }

    pub fn with_stage(mut self, stage: u32) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// A counter that increments once per actual `wait` call, shared with the
    /// constructed signal so the test can inspect it after the run.
    pub fn call_counter(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }
}

#[async_trait]
impl Signal for ControllableSignal {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn stage(&self) -> u32 {
        self.stage
    }

    async fn wait(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = ctx.cancelled() => anyhow::bail!("cancelled"),
            _ = tokio::time::sleep(self.delay) => {}
        }
        match &self.outcome {
            ScriptedOutcome::Succeed => Ok(()),
            ScriptedOutcome::Fail(message) => anyhow::bail!("{message}"),
            ScriptedOutcome::HangUntilCancelled => {
                ctx.cancelled().await;
                anyhow::bail!("cancelled")
            }
        }
    }
}

/// Looks up a signal's result by name, panicking with the full snapshot if
/// absent (the snapshot is the most useful context when an assertion fails).
pub fn result_of<'a>(aggregate: &'a AggregateResult, name: &str) -> &'a ignition_core::SignalResult {
    aggregate
        .per_signal_results
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no result for signal {name:?} in {aggregate:?}"))
}

pub fn status_of(aggregate: &AggregateResult, name: &str) -> SignalStatus {
    result_of(aggregate, name).status
}
