//! Result aggregator: a thread-safe per-signal result map and the
//! `FailFast`/`BestEffort` overall-status computation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::signal::{SignalResult, SignalStatus};

/// Result-aggregation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// The first Failed/TimedOut signal makes the whole run Failed and
    /// stops further signal starts.
    FailFast,
    /// Every signal runs to completion regardless of siblings' outcomes.
    BestEffort,
}

/// The coarse, run-wide status derived from every signal's terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    /// At least one signal has not yet reached a terminal state.
    Pending,
    /// Every signal succeeded.
    Succeeded,
    /// Under `BestEffort`, some signals succeeded and some did not.
    PartialSuccess,
    /// Under `FailFast`, any non-Succeeded terminal signal; under
    /// `BestEffort`, every signal ended non-Succeeded.
    Failed,
    /// The run's root context was externally cancelled before any signal
    /// succeeded.
    Cancelled,
}

/// A point-in-time snapshot of the whole run.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub per_signal_results: Vec<SignalResult>,
    pub total_duration: Duration,
    pub overall_status: OverallStatus,
}

struct AggState {
    order: Vec<(u32, String)>,
    results: HashMap<(u32, String), SignalResult>,
    pending: usize,
}

pub struct ResultAggregator {
    state: Mutex<AggState>,
    policy: Policy,
    started_at: Instant,
    root_cancelled_before_success: AtomicBool,
    configuration_error: AtomicBool,
}

impl ResultAggregator {
    pub fn new(policy: Policy) -> Self {
        Self {
            state: Mutex::new(AggState {
                order: Vec::new(),
                results: HashMap::new(),
                pending: 0,
            }),
            policy,
            started_at: Instant::now(),
            root_cancelled_before_success: AtomicBool::new(false),
            configuration_error: AtomicBool::new(false),
        }
    }

    /// Registers a signal as having started, before its terminal result is
    /// known. Required so `overall_status` reports `Pending` while any
    /// signal is still running, even if nothing has failed yet.
    pub fn mark_pending(&self, stage: u32, name: &str) {
        let mut state = self.state.lock().unwrap();
        let key = (stage, name.to_string());
        if !state.results.contains_key(&key) {
            state.order.push(key.clone());
            state.pending += 1;
        }
        state
            .results
            .insert(key, SignalResult::pending(name.to_string(), stage));
    }

    /// Records a terminal (or otherwise updated) result for a signal.
    /// Recording a terminal status for a signal previously marked pending
    /// decrements the pending counter; this only ever moves forward — once
    /// terminal, a signal's result is never reported as pending again.
    pub fn record(&self, stage: u32, result: SignalResult) {
        let mut state = self.state.lock().unwrap();
        let key = (stage, result.name.clone());
        let was_pending = state
            .results
            .get(&key)
            .map(|r| r.status == SignalStatus::Pending || r.status == SignalStatus::Running)
            .unwrap_or(true);
        if !state.results.contains_key(&key) {
            state.order.push(key.clone());
        }
        if was_pending && result.status != SignalStatus::Pending && result.status != SignalStatus::Running {
            state.pending = state.pending.saturating_sub(1);
        }
        state.results.insert(key, result);
    }

    /// Marks that the run's root context was cancelled from outside before
    /// any signal succeeded; feeds the `Cancelled` overall-status carve-out.
    pub fn note_root_cancelled_before_success(&self) {
        self.root_cancelled_before_success.store(true, Ordering::Release);
    }

    /// Marks that `wait_all` short-circuited on a configuration error:
    /// duplicate name, unknown dependency, or a DAG cycle. No signal ran, so
    /// the result set is empty; without this flag `compute_overall` would
    /// vacuously report `Succeeded` over zero results.
    pub fn note_configuration_error(&self) {
        self.configuration_error.store(true, Ordering::Release);
    }

    pub fn get_snapshot(&self) -> AggregateResult {
        let state = self.state.lock().unwrap();
        let results: Vec<SignalResult> = state
            .order
            .iter()
            .map(|key| state.results[key].clone())
            .collect();
        AggregateResult {
            overall_status: self.compute_overall(&state),
            per_signal_results: results,
            total_duration: self.started_at.elapsed(),
        }
    }

    pub fn overall_status(&self) -> OverallStatus {
        let state = self.state.lock().unwrap();
        self.compute_overall(&state)
    }

    fn compute_overall(&self, state: &AggState) -> OverallStatus {
        if state.pending > 0 {
            return OverallStatus::Pending;
        }
        if self.configuration_error.load(Ordering::Acquire) {
            return OverallStatus::Failed;
        }
        let any_succeeded = state
            .results
            .values()
            .any(|r| r.status == SignalStatus::Succeeded);
        if self.root_cancelled_before_success.load(Ordering::Acquire) && !any_succeeded {
            return OverallStatus::Cancelled;
        }
        let all_succeeded = state
            .results
            .values()
            .all(|r| r.status == SignalStatus::Succeeded);
        if all_succeeded {
            return OverallStatus::Succeeded;
        }
        match self.policy {
            Policy::FailFast => OverallStatus::Failed,
            Policy::BestEffort => {
                if any_succeeded {
                    OverallStatus::PartialSuccess
                } else {
                    OverallStatus::Failed
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn succeeded(name: &str, stage: u32) -> SignalResult {
        let now = SystemTime::now();
        SignalResult {
            name: name.to_string(),
            stage,
            status: SignalStatus::Succeeded,
            started_at: now,
            finished_at: now,
            duration: Duration::ZERO,
            error: None,
            attempts: 1,
        }
    }

    fn failed(name: &str, stage: u32) -> SignalResult {
        let mut r = succeeded(name, stage);
        r.status = SignalStatus::Failed;
        r
    }

    #[test]
    fn pending_while_any_signal_not_terminal() {
        let agg = ResultAggregator::new(Policy::FailFast);
        agg.mark_pending(0, "db");
        assert_eq!(agg.overall_status(), OverallStatus::Pending);
        agg.record(0, succeeded("db", 0));
        assert_eq!(agg.overall_status(), OverallStatus::Succeeded);
    }

    #[test]
    fn failfast_any_failure_is_overall_failed() {
        let agg = ResultAggregator::new(Policy::FailFast);
        agg.mark_pending(0, "a");
        agg.mark_pending(0, "b");
        agg.record(0, succeeded("a", 0));
        agg.record(0, failed("b", 0));
        assert_eq!(agg.overall_status(), OverallStatus::Failed);
    }

    #[test]
    fn besteffort_mixed_is_partial_success() {
        let agg = ResultAggregator::new(Policy::BestEffort);
        agg.mark_pending(0, "a");
        agg.mark_pending(0, "b");
        agg.record(0, succeeded("a", 0));
        agg.record(0, failed("b", 0));
        assert_eq!(agg.overall_status(), OverallStatus::PartialSuccess);
    }

    #[test]
    fn besteffort_all_failed_is_failed_not_partial() {
        let agg = ResultAggregator::new(Policy::BestEffort);
        agg.mark_pending(0, "a");
        agg.record(0, failed("a", 0));
        assert_eq!(agg.overall_status(), OverallStatus::Failed);
    }

    #[test]
    fn root_cancelled_before_any_success_reports_cancelled() {
        let agg = ResultAggregator::new(Policy::BestEffort);
        agg.mark_pending(0, "a");
        agg.note_root_cancelled_before_success();
        let mut r = failed("a", 0);
        r.status = SignalStatus::Cancelled;
        agg.record(0, r);
        assert_eq!(agg.overall_status(), OverallStatus::Cancelled);
    }

    #[test]
    fn configuration_error_reports_failed_over_empty_result_set() {
        let agg = ResultAggregator::new(Policy::FailFast);
        agg.note_configuration_error();
        assert_eq!(agg.overall_status(), OverallStatus::Failed);
    }

    #[test]
    fn root_cancelled_flag_is_ignored_once_something_succeeded() {
        let agg = ResultAggregator::new(Policy::BestEffort);
        agg.mark_pending(0, "a");
        agg.record(0, succeeded("a", 0));
        agg.note_root_cancelled_before_success();
        assert_eq!(agg.overall_status(), OverallStatus::Succeeded);
    }
}
