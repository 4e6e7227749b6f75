//! The signal contract: a uniquely named, idempotent readiness check whose
//! wait is safe to call from more than one caller.
//!
//! Leaf implementers write the small, object-safe [`Signal`] trait; the
//! richer idempotent/cached/retrying behavior lives one layer up, in
//! [`ManagedSignal`], so probe authors never have to think about caching or
//! backoff.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;
use crate::scope::CancellationReason;

/// Coarse classification of a signal's terminal state, stable across the
/// whole run once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
    Skipped,
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Running => "running",
            SignalStatus::Succeeded => "succeeded",
            SignalStatus::Failed => "failed",
            SignalStatus::TimedOut => "timed_out",
            SignalStatus::Cancelled => "cancelled",
            SignalStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a signal was never actually attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The stage or run was already failing and the execution policy chose
    /// not to start this signal.
    Policy,
    /// A declared dependency of this signal did not succeed.
    DependencyFailed,
}

/// The rich terminal outcome of a single signal execution. `status()`
/// projects this down to the coarser [`SignalStatus`] used for reporting.
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeeded,
    Failed(Arc<anyhow::Error>),
    TimedOut,
    Cancelled(CancellationReason),
    Skipped(SkipReason),
}

impl Outcome {
    pub fn status(&self) -> SignalStatus {
        match self {
            Outcome::Succeeded => SignalStatus::Succeeded,
            Outcome::Failed(_) => SignalStatus::Failed,
            Outcome::TimedOut => SignalStatus::TimedOut,
            Outcome::Cancelled(_) => SignalStatus::Cancelled,
            Outcome::Skipped(_) => SignalStatus::Skipped,
        }
    }
}

/// The leaf implementer contract: name, optional timeout, optional stage,
/// and a single fallible async attempt. Implementers never
/// see retries or caching; [`ManagedSignal`] supplies both.
#[async_trait]
pub trait Signal: Send + Sync {
    fn name(&self) -> &str;

    /// Per-signal deadline wrapping the whole retry sequence. `None` means
    /// no per-signal deadline (only the global timeout, if any, applies).
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// The stage this signal belongs to. Signals in the same stage may run
    /// concurrently, sequentially, or dependency-ordered depending on the
    /// stage's execution mode.
    fn stage(&self) -> u32 {
        0
    }

    /// A single attempt. Returning `Err` triggers the retry policy;
    /// returning `Ok(())` is success. Implementations should observe `ctx`
    /// and return promptly once it is cancelled.
    async fn wait(&self, ctx: CancellationToken) -> anyhow::Result<()>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Signal) {}
};

/// A fully resolved run of a [`ManagedSignal`]: the outcome plus the
/// bookkeeping the coordinator needs to build a [`SignalResult`].
#[derive(Debug, Clone)]
pub struct SignalRun {
    pub outcome: Outcome,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub attempts: u32,
}

/// The public, reportable result of one signal's execution.
#[derive(Debug, Clone)]
pub struct SignalResult {
    pub name: String,
    pub stage: u32,
    pub status: SignalStatus,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
    pub duration: Duration,
    pub error: Option<Arc<anyhow::Error>>,
    pub attempts: u32,
}

impl SignalResult {
    pub fn from_run(name: String, stage: u32, run: SignalRun) -> Self {
        let duration = run
            .finished_at
            .duration_since(run.started_at)
            .unwrap_or_default();
        let error = match &run.outcome {
            Outcome::Failed(e) => Some(e.clone()),
            Outcome::TimedOut => Some(Arc::new(anyhow::anyhow!(
                "signal {name:?} exceeded its deadline"
            ))),
            _ => None,
        };
        Self {
            name,
            stage,
            status: run.outcome.status(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration,
            error,
            attempts: run.attempts,
        }
    }

    pub fn pending(name: String, stage: u32) -> Self {
        let now = SystemTime::now();
        Self {
            name,
            stage,
            status: SignalStatus::Pending,
            started_at: now,
            finished_at: now,
            duration: Duration::ZERO,
            error: None,
            attempts: 0,
        }
    }

    pub fn skipped(name: String, stage: u32, reason: SkipReason) -> Self {
        let now = SystemTime::now();
        Self {
            name,
            stage,
            status: SignalStatus::Skipped,
            started_at: now,
            finished_at: now,
            duration: Duration::ZERO,
            error: None,
            attempts: 0,
        }
        .tap_skip_reason(reason)
    }

    fn tap_skip_reason(self, _reason: SkipReason) -> Self {
        // The reason is not currently surfaced in the report beyond the
        // `Skipped` status; kept as a parameter so callers stay explicit
        // about which of the two skip causes applied.
        self
    }
}

type SharedRun = Shared<BoxFuture<'static, SignalRun>>;

/// Wraps a leaf [`Signal`] with idempotent, cached, retrying behavior,
/// treating every call as referring to the same logical signal. The first
/// caller to invoke
/// [`ManagedSignal::wait`] starts the underlying execution (bound to *that*
/// caller's context); every other caller observes the same result without
/// re-running anything. A later caller whose own context cancels simply
/// detaches from waiting — it does not cancel the underlying execution.
pub struct ManagedSignal {
    signal: Arc<dyn Signal>,
    retry: RetryPolicy,
    attempts: Arc<AtomicU32>,
    run: Mutex<Option<SharedRun>>,
}

impl ManagedSignal {
    pub fn new(signal: Arc<dyn Signal>, retry: RetryPolicy) -> Self {
        Self {
            signal,
            retry,
            attempts: Arc::new(AtomicU32::new(0)),
            run: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.signal.name()
    }

    pub fn stage(&self) -> u32 {
        self.signal.stage()
    }

    pub async fn wait(&self, ctx: CancellationToken) -> SignalRun {
        let shared = {
            let mut guard = self.run.lock().unwrap();
            match &*guard {
                Some(shared) => shared.clone(),
                None => {
                    let signal = self.signal.clone();
                    let retry = self.retry.clone();
                    let attempts = self.attempts.clone();
                    let first_ctx = ctx.clone();
                    let fut: BoxFuture<'static, SignalRun> = async move {
                        let started_at = SystemTime::now();
                        let timeout = signal.timeout();
                        let outcome = retry.run(signal.as_ref(), first_ctx, timeout, &attempts).await;
                        SignalRun {
                            outcome,
                            started_at,
                            finished_at: SystemTime::now(),
                            attempts: attempts.load(Ordering::Acquire),
                        }
                    }
                    .boxed();
                    let shared = fut.shared();
                    *guard = Some(shared.clone());
                    shared
                }
            }
        };

        tokio::select! {
            run = shared => run,
            _ = ctx.cancelled() => SignalRun {
                outcome: Outcome::Cancelled(CancellationReason::ExternalCancellation),
                started_at: SystemTime::now(),
                finished_at: SystemTime::now(),
                attempts: self.attempts.load(Ordering::Acquire),
            },
        }
    }
}
