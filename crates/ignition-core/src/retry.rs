//! Retry policy: exponential backoff with doubling, a cancellable sleep
//! between attempts, and an optional deadline wrapping the whole attempt
//! sequence. No jitter, no cap on the backoff delay, unlike some retry
//! processors in the wild that add a `max_retry_delay`; this intentionally
//! stays simpler (see DESIGN.md).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::signal::{Outcome, Signal};
use crate::scope::CancellationReason;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of additional attempts after the first, so total attempts is
    /// `1 + max_retries`.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every subsequent retry.
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Runs `signal` to a terminal [`Outcome`], retrying on `Err` up to
    /// `max_retries` times, honoring `ctx` cancellation at every await point
    /// and `per_signal_timeout` as a deadline over the whole sequence.
    pub async fn run(
        &self,
        signal: &dyn Signal,
        ctx: CancellationToken,
        per_signal_timeout: Option<Duration>,
        attempts: &AtomicU32,
    ) -> Outcome {
        let body = self.run_without_deadline(signal, ctx, attempts);
        match per_signal_timeout {
            None => body.await,
            Some(deadline) => match tokio::time::timeout(deadline, body).await {
                Ok(outcome) => outcome,
                Err(_) => Outcome::TimedOut,
            },
        }
    }

    async fn run_without_deadline(
        &self,
        signal: &dyn Signal,
        ctx: CancellationToken,
        attempts: &AtomicU32,
    ) -> Outcome {
        let mut attempt: u32 = 0;
        loop {
            if ctx.is_cancelled() {
                return Outcome::Cancelled(CancellationReason::ExternalCancellation);
            }
            attempt += 1;
            attempts.store(attempt, Ordering::Release);

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancelled() => None,
                result = signal.wait(ctx.clone()) => Some(result),
            };

            let result = match outcome {
                None => return Outcome::Cancelled(CancellationReason::ExternalCancellation),
                Some(result) => result,
            };

            let err = match result {
                Ok(()) => return Outcome::Succeeded,
                Err(err) => err,
            };

            if ctx.is_cancelled() {
                return Outcome::Cancelled(CancellationReason::ExternalCancellation);
            }

            let retries_done = attempt - 1;
            if retries_done >= self.max_retries {
                return Outcome::Failed(std::sync::Arc::new(err));
            }

            let delay = self.initial_delay * 2u32.pow(retries_done);
            warn!(signal = signal.name(), attempt, ?delay, error = %err, "signal attempt failed, retrying");

            tokio::select! {
                _ = ctx.cancelled() => return Outcome::Cancelled(CancellationReason::ExternalCancellation),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32 as StdAtomicU32;
    use std::sync::Arc;

    struct FlakySignal {
        calls: Arc<StdAtomicU32>,
        succeed_on_call: u32,
    }

    #[async_trait]
    impl Signal for FlakySignal {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn wait(&self, _ctx: CancellationToken) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on_call {
                Ok(())
            } else {
                anyhow::bail!("attempt {n} failed")
            }
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl Signal for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn wait(&self, _ctx: CancellationToken) -> anyhow::Result<()> {
            anyhow::bail!("nope")
        }
    }

    struct NeverReturns;

    #[async_trait]
    impl Signal for NeverReturns {
        fn name(&self) -> &str {
            "never-returns"
        }
        async fn wait(&self, ctx: CancellationToken) -> anyhow::Result<()> {
            ctx.cancelled().await;
            anyhow::bail!("cancelled mid-flight")
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let attempts = AtomicU32::new(0);
        let signal = FlakySignal {
            calls: Arc::new(StdAtomicU32::new(0)),
            succeed_on_call: 1,
        };
        let outcome = policy.run(&signal, CancellationToken::new(), None, &attempts).await;
        assert!(matches!(outcome, Outcome::Succeeded));
        assert_eq!(attempts.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_then_fails() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let attempts = AtomicU32::new(0);
        let signal = AlwaysFail;
        let outcome = policy.run(&signal, CancellationToken::new(), None, &attempts).await;
        assert!(matches!(outcome, Outcome::Failed(_)));
        // first attempt + 2 retries = 3 total attempts
        assert_eq!(attempts.load(Ordering::Acquire), 3);
    }

    #[tokio::test]
    async fn succeeds_on_last_allowed_retry() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let attempts = AtomicU32::new(0);
        let signal = FlakySignal {
            calls: Arc::new(StdAtomicU32::new(0)),
            succeed_on_call: 3,
        };
        let outcome = policy.run(&signal, CancellationToken::new(), None, &attempts).await;
        assert!(matches!(outcome, Outcome::Succeeded));
        assert_eq!(attempts.load(Ordering::Acquire), 3);
    }

    #[tokio::test]
    async fn zero_max_retries_means_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let attempts = AtomicU32::new(0);
        let signal = AlwaysFail;
        let outcome = policy.run(&signal, CancellationToken::new(), None, &attempts).await;
        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(attempts.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn per_signal_timeout_elapses_into_timed_out() {
        let policy = RetryPolicy::new(5, Duration::from_millis(50));
        let attempts = AtomicU32::new(0);
        let signal = NeverReturns;
        let outcome = policy
            .run(&signal, CancellationToken::new(), Some(Duration::from_millis(10)), &attempts)
            .await;
        assert!(matches!(outcome, Outcome::TimedOut));
    }

    #[tokio::test]
    async fn external_cancellation_short_circuits_before_first_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(50));
        let attempts = AtomicU32::new(0);
        let ctx = CancellationToken::new();
        ctx.cancel();
        let signal = AlwaysFail;
        let outcome = policy.run(&signal, ctx, None, &attempts).await;
        assert!(matches!(outcome, Outcome::Cancelled(CancellationReason::ExternalCancellation)));
        assert_eq!(attempts.load(Ordering::Acquire), 0);
    }
}
