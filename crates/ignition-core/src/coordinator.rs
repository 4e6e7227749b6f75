//! Coordinator / scheduler: materializes registered signal factories stage
//! by stage, runs each stage under its execution mode, enforces the
//! result-aggregation policy between stages, and exposes the idempotent
//! `wait_all` / `get_result` surface. A `Semaphore` bounds concurrency,
//! `tokio::select!` drives cancellation, and stages run as a plain loop over
//! ready work rather than a generic executor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::aggregator::{AggregateResult, OverallStatus, Policy, ResultAggregator};
use crate::dag::DependencyGraph;
use crate::error::{ConfigError, CoordinatorError, WaitAllError};
use crate::metrics::{MetricsSink, NoopMetricsSink};
use crate::registry::{ExecutionMode, ScopeBinding, SignalRegistry};
use crate::retry::RetryPolicy;
use crate::scope::{CancellationReason, CancellationScope};
use crate::services::Services;
use crate::signal::{ManagedSignal, Outcome, Signal, SignalResult, SignalStatus, SkipReason};

/// Construction-time configuration for a [`Coordinator`].
pub struct IgnitionOptions {
    pub policy: Policy,
    /// Deadline over the whole run, measured from the first `wait_all`
    /// call. `None` means no global deadline.
    pub global_timeout: Option<Duration>,
    /// Whether the global timeout actually cancels in-flight signals
    /// (`true`, the default) or only affects reporting once it elapses
    /// (`false`) — see DESIGN.md for the Open Question this resolves.
    pub cancel_on_global_timeout: bool,
    pub execution_mode_default: ExecutionMode,
    /// Caps how many signals across the whole run may be in flight at once.
    /// `None` means unbounded (subject only to per-stage concurrency).
    pub max_degree_of_parallelism: Option<usize>,
    pub metrics_sink: Arc<dyn MetricsSink>,
    pub default_retry: RetryPolicy,
}

impl Default for IgnitionOptions {
    fn default() -> Self {
        Self {
            policy: Policy::FailFast,
            global_timeout: None,
            cancel_on_global_timeout: true,
            execution_mode_default: ExecutionMode::Parallel,
            max_degree_of_parallelism: None,
            metrics_sink: Arc::new(NoopMetricsSink),
            default_retry: RetryPolicy::none(),
        }
    }
}

struct StageSignal {
    name: String,
    managed: Arc<ManagedSignal>,
    scope: Option<ScopeBinding>,
}

/// The part of the coordinator that needs to be shared into spawned signal
/// tasks. Kept separate from `Coordinator` (which also owns the
/// non-`Sync`-friendly `SignalRegistry` mutex) so tasks can hold a cheap
/// `Arc` clone instead of a borrow of the coordinator itself.
struct SignalExecutor {
    aggregator: Arc<ResultAggregator>,
    metrics_sink: Arc<dyn MetricsSink>,
    policy: Policy,
}

impl SignalExecutor {
    fn finish_signal(&self, stage: u32, sig: &StageSignal, run: crate::signal::SignalRun) -> SignalResult {
        let result = SignalResult::from_run(sig.name.clone(), stage, run);
        let is_bad = matches!(result.status, SignalStatus::Failed | SignalStatus::TimedOut);
        if is_bad {
            if let Some(binding) = &sig.scope {
                if binding.cancel_scope_on_failure {
                    binding
                        .scope
                        .cancel(CancellationReason::SignalFailure, Some(result.name.clone()));
                }
            }
        }
        self.aggregator.record(stage, result.clone());
        self.metrics_sink
            .record_signal_duration(&result.name, result.duration);
        self.metrics_sink
            .record_signal_status(&result.name, result.status);
        match result.status {
            SignalStatus::Succeeded => info!(signal = %result.name, stage, "signal succeeded"),
            SignalStatus::Skipped => warn!(signal = %result.name, stage, "signal skipped"),
            _ => warn!(signal = %result.name, stage, status = %result.status, "signal did not succeed"),
        }
        result
    }

    fn skipped_run(reason: SkipReason) -> crate::signal::SignalRun {
        let now = std::time::SystemTime::now();
        crate::signal::SignalRun {
            outcome: Outcome::Skipped(reason),
            started_at: now,
            finished_at: now,
            attempts: 0,
        }
    }
}

/// Races a set of tokens and cancels `target` the moment any one of them
/// fires. Used to derive a single token standing for "the caller's context
/// AND the root scope AND (optionally) the global deadline", since
/// `tokio_util::sync::CancellationToken` only natively models parent/child
/// relationships, not an arbitrary join of unrelated tokens.
fn spawn_combine(sources: Vec<CancellationToken>, target: CancellationToken) {
    tokio::spawn(async move {
        let waiters = sources.iter().map(|t| Box::pin(t.cancelled()));
        futures::future::select_all(waiters).await;
        target.cancel();
    });
}

fn combine_tokens(sources: Vec<CancellationToken>) -> CancellationToken {
    let combined = CancellationToken::new();
    spawn_combine(sources, combined.clone());
    combined
}

fn deadline_token(duration: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        child.cancel();
    });
    token
}

/// Register signals, call `wait_all` once, then read `get_result` as often
/// as needed.
pub struct Coordinator {
    registry: std::sync::Mutex<SignalRegistry>,
    options: IgnitionOptions,
    root_scope: Arc<CancellationScope>,
    aggregator: Arc<ResultAggregator>,
    executor: Arc<SignalExecutor>,
    services: Services,
    run: OnceCell<Result<AggregateResult, CoordinatorError>>,
}

impl Coordinator {
    pub fn new(options: IgnitionOptions, services: Services) -> Self {
        let aggregator = Arc::new(ResultAggregator::new(options.policy));
        let executor = Arc::new(SignalExecutor {
            aggregator: aggregator.clone(),
            metrics_sink: options.metrics_sink.clone(),
            policy: options.policy,
        });
        Self {
            registry: std::sync::Mutex::new(SignalRegistry::new()),
            options,
            root_scope: CancellationScope::new_root("ignition-root"),
            aggregator,
            executor,
            services,
            run: OnceCell::new(),
        }
    }

    // --- Registration API ---------------------------------------------

    pub fn add_signal(&self, signal: Arc<dyn Signal>) {
        self.registry.lock().unwrap().add_signal(signal);
    }

    pub fn add_factory(&self, factory: Arc<dyn crate::registry::SignalFactory>) {
        self.registry.lock().unwrap().add_factory(factory);
    }

    pub fn add_signal_with_scope(
        &self,
        signal: Arc<dyn Signal>,
        scope: Arc<CancellationScope>,
        cancel_scope_on_failure: bool,
    ) {
        self.registry
            .lock()
            .unwrap()
            .add_signal_with_scope(signal, scope, cancel_scope_on_failure);
    }

    pub fn add_factory_with_scope(
        &self,
        factory: Arc<dyn crate::registry::SignalFactory>,
        scope: Arc<CancellationScope>,
        cancel_scope_on_failure: bool,
    ) {
        self.registry
            .lock()
            .unwrap()
            .add_factory_with_scope(factory, scope, cancel_scope_on_failure);
    }

    pub fn add_stage_mode(&self, stage: u32, mode: ExecutionMode) {
        self.registry.lock().unwrap().add_stage_mode(stage, mode);
    }

    pub fn add_dependency(&self, successor: impl Into<String>, predecessor: impl Into<String>) {
        self.registry.lock().unwrap().add_dependency(successor, predecessor);
    }

    // --- Scope API -------------------------------------------------------

    pub fn root_scope(&self) -> Arc<CancellationScope> {
        self.root_scope.clone()
    }

    pub fn new_scope(&self, name: impl Into<String>) -> Arc<CancellationScope> {
        self.root_scope.child(name)
    }

    // --- Coordinator surface ---------------------------------------------

    pub fn get_result(&self) -> AggregateResult {
        self.aggregator.get_snapshot()
    }

    /// Runs every registered signal to completion, or cancellation/timeout,
    /// exactly once. Repeated calls (even concurrent ones) observe the same
    /// run and the same result — `wait_all` is idempotent.
    #[instrument(skip(self, ctx))]
    pub async fn wait_all(&self, ctx: CancellationToken) -> Result<AggregateResult, CoordinatorError> {
        let result = self
            .run
            .get_or_init(|| self.execute(ctx))
            .await
            .clone();
        result
    }

    async fn execute(&self, ctx: CancellationToken) -> Result<AggregateResult, CoordinatorError> {
        let mut sources = vec![ctx.clone(), self.root_scope.token()];
        if self.options.cancel_on_global_timeout {
            if let Some(d) = self.options.global_timeout {
                sources.push(deadline_token(d));
            }
        }
        let run_ctx = combine_tokens(sources);

        let semaphore = self
            .options
            .max_degree_of_parallelism
            .map(|n| Arc::new(Semaphore::new(n)));

        let stages = {
            let registry = self.registry.lock().unwrap();
            // snapshot factories + dependencies while holding the lock, then
            // release it before any async work.
            let snapshot: Vec<(u32, Vec<Arc<dyn crate::registry::SignalFactory>>, Vec<Option<ScopeBinding>>)> =
                registry
                    .stages()
                    .into_iter()
                    .map(|(stage, factories)| {
                        let fs: Vec<Arc<dyn crate::registry::SignalFactory>> =
                            factories.iter().map(|f| f.factory.clone()).collect();
                        let scopes: Vec<Option<ScopeBinding>> =
                            factories.iter().map(|f| f.scope.clone()).collect();
                        (stage, fs, scopes)
                    })
                    .collect();
            let dependencies = registry.dependencies().to_vec();
            let all_names = registry.all_names();
            (snapshot, dependencies, all_names)
        };
        let (stage_snapshots, dependencies, all_names) = stages;

        for (stage, factories, scope_bindings) in stage_snapshots {
            info!(stage, signal_count = factories.len(), "stage starting");
            let mode = {
                let registry = self.registry.lock().unwrap();
                registry.stage_mode(stage)
            };

            let materialized = match self
                .materialize_stage(stage, &factories, &scope_bindings)
                .await
            {
                Ok(signals) => signals,
                Err(e) => {
                    error!(stage, error = %e, "stage configuration error");
                    self.aggregator.note_configuration_error();
                    return Err(CoordinatorError::Configuration(e));
                }
            };

            let run_result = match mode {
                ExecutionMode::Parallel => {
                    self.run_stage_parallel(stage, materialized, &run_ctx, &semaphore).await
                }
                ExecutionMode::Sequential => self.run_stage_sequential(stage, materialized, &run_ctx).await,
                ExecutionMode::DependencyAware => {
                    self.run_stage_dependency_aware(stage, materialized, &dependencies, &all_names, &run_ctx, &semaphore)
                        .await
                }
            };

            if let Err(e) = run_result {
                error!(stage, error = %e, "stage configuration error");
                self.aggregator.note_configuration_error();
                return Err(CoordinatorError::Configuration(e));
            }

            info!(stage, overall = ?self.aggregator.overall_status(), "stage finished");

            if self.options.policy == Policy::FailFast
                && self.aggregator.overall_status() == OverallStatus::Failed
            {
                break;
            }
        }

        self.options
            .metrics_sink
            .record_total_duration(self.aggregator.get_snapshot().total_duration);

        if ctx.is_cancelled() || self.root_scope.is_cancelled() {
            let snapshot = self.aggregator.get_snapshot();
            if !snapshot
                .per_signal_results
                .iter()
                .any(|r| r.status == SignalStatus::Succeeded)
                && snapshot.overall_status != OverallStatus::Succeeded
            {
                self.aggregator.note_root_cancelled_before_success();
            }
        }

        let snapshot = self.aggregator.get_snapshot();
        match (self.options.policy, snapshot.overall_status) {
            (Policy::FailFast, OverallStatus::Failed) => {
                let bad: Vec<SignalResult> = snapshot
                    .per_signal_results
                    .iter()
                    .filter(|r| r.status != SignalStatus::Succeeded)
                    .cloned()
                    .collect();
                Err(CoordinatorError::Failed(WaitAllError {
                    failed_count: bad.len(),
                    total_count: snapshot.per_signal_results.len(),
                    results: bad,
                }))
            }
            // BestEffort never raises for signal-level failures, even when
            // every signal ends non-Succeeded (spec §7): callers inspect
            // `get_result().overall_status` instead.
            _ => Ok(snapshot),
        }
    }

    async fn materialize_stage(
        &self,
        stage: u32,
        factories: &[Arc<dyn crate::registry::SignalFactory>],
        scope_bindings: &[Option<ScopeBinding>],
    ) -> Result<Vec<StageSignal>, ConfigError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(factories.len());
        for (factory, scope) in factories.iter().zip(scope_bindings.iter()) {
            let name = factory.name().to_string();
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateName { stage, name });
            }
            let signal = factory
                .create(&self.services)
                .await
                .map_err(|e| ConfigError::UnknownDependency {
                    successor: name.clone(),
                    predecessor: format!("factory construction failed: {e}"),
                })?;
            let retry = factory.retry().unwrap_or_else(|| self.options.default_retry.clone());
            let managed = Arc::new(ManagedSignal::new(signal, retry));
            out.push(StageSignal {
                name,
                managed,
                scope: scope.clone(),
            });
        }
        Ok(out)
    }

    fn derive_signal_ctx(&self, run_ctx: &CancellationToken, scope: Option<&ScopeBinding>) -> CancellationToken {
        let base = run_ctx.child_token();
        match scope {
            Some(binding) => combine_tokens(vec![base, binding.scope.token()]),
            None => base,
        }
    }

    async fn run_stage_parallel(
        &self,
        stage: u32,
        signals: Vec<StageSignal>,
        run_ctx: &CancellationToken,
        semaphore: &Option<Arc<Semaphore>>,
    ) -> Result<(), ConfigError> {
        let mut set = tokio::task::JoinSet::new();
        for sig in signals {
            self.aggregator.mark_pending(stage, &sig.name);
            let ctx = self.derive_signal_ctx(run_ctx, sig.scope.as_ref());
            let semaphore = semaphore.clone();
            let skip = self.options.policy == Policy::FailFast && run_ctx.is_cancelled();
            let sig = Arc::new(sig);
            let executor = self.executor.clone();
            set.spawn(async move {
                if skip {
                    return executor.finish_signal(stage, &sig, SignalExecutor::skipped_run(SkipReason::Policy));
                }
                let _permit = match &semaphore {
                    Some(s) => Some(s.clone().acquire_owned().await.unwrap()),
                    None => None,
                };
                let run = sig.managed.wait(ctx).await;
                executor.finish_signal(stage, &sig, run)
            });
        }
        while let Some(joined) = set.join_next().await {
            let result = joined.expect("signal task panicked");
            if self.options.policy == Policy::FailFast && result.status != SignalStatus::Succeeded {
                run_ctx.cancel();
            }
        }
        Ok(())
    }

    async fn run_stage_sequential(
        &self,
        stage: u32,
        signals: Vec<StageSignal>,
        run_ctx: &CancellationToken,
    ) -> Result<(), ConfigError> {
        let mut stop = false;
        for sig in signals {
            self.aggregator.mark_pending(stage, &sig.name);
            if stop {
                self.executor
                    .finish_signal(stage, &sig, SignalExecutor::skipped_run(SkipReason::Policy));
                continue;
            }
            let ctx = self.derive_signal_ctx(run_ctx, sig.scope.as_ref());
            let run = sig.managed.wait(ctx).await;
            let result = self.executor.finish_signal(stage, &sig, run);
            if self.options.policy == Policy::FailFast && result.status != SignalStatus::Succeeded {
                run_ctx.cancel();
                stop = true;
            }
        }
        Ok(())
    }

    async fn run_stage_dependency_aware(
        &self,
        stage: u32,
        signals: Vec<StageSignal>,
        dependencies: &[(String, String)],
        all_names: &HashSet<String>,
        run_ctx: &CancellationToken,
        semaphore: &Option<Arc<Semaphore>>,
    ) -> Result<(), ConfigError> {
        let names: Vec<String> = signals.iter().map(|s| s.name.clone()).collect();
        let graph = DependencyGraph::build(stage, &names, dependencies, all_names)?;
        graph.check_for_cycles(stage)?;

        let by_name: HashMap<String, Arc<StageSignal>> = signals
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();

        let mut in_degree: Vec<usize> = vec![0; graph.len()];
        for i in 0..graph.len() {
            for &succ in graph.successors_of(i) {
                in_degree[succ] += 1;
            }
        }

        let mut failed_nodes = vec![false; graph.len()];
        // Tracks, per node, whether *any* predecessor (not just the one
        // whose resolution happened to bring in_degree to 0 last) failed.
        // A diamond successor with one failing and one succeeding
        // predecessor must still be skipped.
        let mut any_pred_failed = vec![false; graph.len()];
        let mut done = vec![false; graph.len()];
        let mut ready: std::collections::VecDeque<usize> = graph.initially_ready().into();

        let mut set = tokio::task::JoinSet::new();
        let mut in_flight = 0usize;

        loop {
            while let Some(idx) = ready.pop_front() {
                let name = names[idx].clone();
                let sig = by_name[&name].clone();
                self.aggregator.mark_pending(stage, &name);

                let policy_halt = self.options.policy == Policy::FailFast && run_ctx.is_cancelled();
                if policy_halt {
                    self.executor
                        .finish_signal(stage, &sig, SignalExecutor::skipped_run(SkipReason::Policy));
                    done[idx] = true;
                    failed_nodes[idx] = true;
                    continue;
                }

                let ctx = self.derive_signal_ctx(run_ctx, sig.scope.as_ref());
                let semaphore = semaphore.clone();
                let executor = self.executor.clone();
                in_flight += 1;
                set.spawn(async move {
                    let _permit = match &semaphore {
                        Some(s) => Some(s.clone().acquire_owned().await.unwrap()),
                        None => None,
                    };
                    let run = sig.managed.wait(ctx).await;
                    (idx, executor.finish_signal(stage, &sig, run))
                });
            }

            if in_flight == 0 {
                break;
            }

            let (idx, result) = set.join_next().await.expect("in_flight tracked a pending task").expect("signal task panicked");
            in_flight -= 1;
            done[idx] = true;
            let succeeded = result.status == SignalStatus::Succeeded;
            if !succeeded {
                failed_nodes[idx] = true;
                if self.options.policy == Policy::FailFast {
                    run_ctx.cancel();
                }
            }

            for &succ in graph.successors_of(idx) {
                if failed_nodes[idx] {
                    any_pred_failed[succ] = true;
                }
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 && !done[succ] {
                    if any_pred_failed[succ] {
                        // at least one predecessor failed: cascade
                        // Skipped(DependencyFailed) through every transitive
                        // successor rather than attempting it.
                        self.skip_transitively(stage, succ, &by_name, &names, &graph, &mut done, &mut failed_nodes);
                    } else {
                        ready.push_back(succ);
                    }
                }
            }
        }

        Ok(())
    }

    fn skip_transitively(
        &self,
        stage: u32,
        start: usize,
        by_name: &HashMap<String, Arc<StageSignal>>,
        names: &[String],
        graph: &DependencyGraph,
        done: &mut [bool],
        failed_nodes: &mut [bool],
    ) {
        let mut queue = std::collections::VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            if done[idx] {
                continue;
            }
            done[idx] = true;
            failed_nodes[idx] = true;
            let sig = by_name[&names[idx]].clone();
            self.aggregator.mark_pending(stage, &sig.name);
            self.executor
                .finish_signal(stage, &sig, SignalExecutor::skipped_run(SkipReason::DependencyFailed));
            for &succ in graph.successors_of(idx) {
                queue.push_back(succ);
            }
        }
    }
}
