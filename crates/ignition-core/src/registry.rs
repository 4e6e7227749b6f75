//! Signal factory & registry: a small owned collection keyed by name, with
//! explicit registration methods rather than a generic `insert`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::retry::RetryPolicy;
use crate::scope::CancellationScope;
use crate::signal::Signal;

/// Execution model for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Parallel,
    Sequential,
    DependencyAware,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Parallel
    }
}

/// The signal-construction half of the factory abstraction:
/// `name`/`timeout`/`stage` mirror [`Signal`]'s own attributes so the
/// registry and reporting code can describe a signal before it has even
/// been constructed.
#[async_trait]
pub trait SignalFactory: Send + Sync {
    fn name(&self) -> &str;
    fn timeout(&self) -> Option<std::time::Duration> {
        None
    }
    fn stage(&self) -> u32 {
        0
    }
    /// Per-signal retry override. `None` means "use the coordinator's
    /// `default_retry`" — the common case, since most plans share one
    /// retry policy across all signals.
    fn retry(&self) -> Option<RetryPolicy> {
        None
    }
    async fn create(&self, services: &crate::services::Services) -> anyhow::Result<Arc<dyn Signal>>;
}

/// Eager factory: the signal already exists; `create` just clones the
/// `Arc`. This is the common case — most signals need no constructor-time
/// service lookup.
pub struct EagerFactory {
    signal: Arc<dyn Signal>,
    retry: Option<RetryPolicy>,
}

impl EagerFactory {
    pub fn new(signal: Arc<dyn Signal>) -> Self {
        Self { signal, retry: None }
    }

    /// Registers this signal with a retry policy overriding the
    /// coordinator's `default_retry`.
    pub fn with_retry(signal: Arc<dyn Signal>, retry: RetryPolicy) -> Self {
        Self {
            signal,
            retry: Some(retry),
        }
    }
}

#[async_trait]
impl SignalFactory for EagerFactory {
    fn name(&self) -> &str {
        self.signal.name()
    }
    fn timeout(&self) -> Option<std::time::Duration> {
        self.signal.timeout()
    }
    fn stage(&self) -> u32 {
        self.signal.stage()
    }
    fn retry(&self) -> Option<RetryPolicy> {
        self.retry.clone()
    }
    async fn create(&self, _services: &crate::services::Services) -> anyhow::Result<Arc<dyn Signal>> {
        Ok(self.signal.clone())
    }
}

pub type DeferredBuilder =
    Box<dyn for<'a> Fn(&'a crate::services::Services) -> BoxFuture<'a, anyhow::Result<Arc<dyn Signal>>> + Send + Sync>;

/// Deferred factory: the signal is built lazily, when its stage begins,
/// from shared services constructed by earlier stages.
pub struct DeferredFactory {
    name: String,
    stage: u32,
    timeout: Option<std::time::Duration>,
    builder: DeferredBuilder,
}

impl DeferredFactory {
    pub fn new(
        name: impl Into<String>,
        stage: u32,
        timeout: Option<std::time::Duration>,
        builder: DeferredBuilder,
    ) -> Self {
        Self {
            name: name.into(),
            stage,
            timeout,
            builder,
        }
    }
}

#[async_trait]
impl SignalFactory for DeferredFactory {
    fn name(&self) -> &str {
        &self.name
    }
    fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout
    }
    fn stage(&self) -> u32 {
        self.stage
    }
    async fn create(&self, services: &crate::services::Services) -> anyhow::Result<Arc<dyn Signal>> {
        (self.builder)(services).await
    }
}

/// A scope binding for one registered factory: which scope its signal runs
/// under, and whether a terminal Failed/TimedOut result should cancel that
/// scope.
#[derive(Clone)]
pub struct ScopeBinding {
    pub scope: Arc<CancellationScope>,
    pub cancel_scope_on_failure: bool,
}

pub struct RegisteredFactory {
    pub factory: Arc<dyn SignalFactory>,
    pub scope: Option<ScopeBinding>,
}

/// Owned collection of registered factories plus per-stage execution modes
/// and dependency edges. `SignalRegistry` never runs anything itself — it is
/// pure bookkeeping consumed by [`crate::coordinator::Coordinator`].
#[derive(Default)]
pub struct SignalRegistry {
    factories: Vec<RegisteredFactory>,
    stage_modes: HashMap<u32, ExecutionMode>,
    dependencies: Vec<(String, String)>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_signal(&mut self, signal: Arc<dyn Signal>) -> &mut Self {
        self.add_factory(Arc::new(EagerFactory::new(signal)))
    }

    pub fn add_factory(&mut self, factory: Arc<dyn SignalFactory>) -> &mut Self {
        self.factories.push(RegisteredFactory {
            factory,
            scope: None,
        });
        self
    }

    pub fn add_signal_with_scope(
        &mut self,
        signal: Arc<dyn Signal>,
        scope: Arc<CancellationScope>,
        cancel_scope_on_failure: bool,
    ) -> &mut Self {
        self.add_factory_with_scope(Arc::new(EagerFactory::new(signal)), scope, cancel_scope_on_failure)
    }

    pub fn add_factory_with_scope(
        &mut self,
        factory: Arc<dyn SignalFactory>,
        scope: Arc<CancellationScope>,
        cancel_scope_on_failure: bool,
    ) -> &mut Self {
        self.factories.push(RegisteredFactory {
            factory,
            scope: Some(ScopeBinding {
                scope,
                cancel_scope_on_failure,
            }),
        });
        self
    }

    /// Sets the execution mode for `stage`. Calling this twice for the same
    /// stage is not an error — the last call wins.
    pub fn add_stage_mode(&mut self, stage: u32, mode: ExecutionMode) -> &mut Self {
        self.stage_modes.insert(stage, mode);
        self
    }

    pub fn add_dependency(&mut self, successor: impl Into<String>, predecessor: impl Into<String>) -> &mut Self {
        self.dependencies.push((successor.into(), predecessor.into()));
        self
    }

    pub fn stage_mode(&self, stage: u32) -> ExecutionMode {
        self.stage_modes.get(&stage).copied().unwrap_or_default()
    }

    pub fn dependencies(&self) -> &[(String, String)] {
        &self.dependencies
    }

    /// Stages in ascending order, each with its registered factories in
    /// registration order. Stages with no explicit mode default to
    /// `Parallel`. Stage numbers are sparse — there is no requirement that
    /// they be contiguous.
    pub fn stages(&self) -> Vec<(u32, Vec<&RegisteredFactory>)> {
        let mut by_stage: std::collections::BTreeMap<u32, Vec<&RegisteredFactory>> = std::collections::BTreeMap::new();
        for f in &self.factories {
            by_stage.entry(f.factory.stage()).or_default().push(f);
        }
        by_stage.into_iter().collect()
    }

    pub fn all_names(&self) -> std::collections::HashSet<String> {
        self.factories
            .iter()
            .map(|f| f.factory.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Noop(&'static str, u32);

    #[async_trait]
    impl Signal for Noop {
        fn name(&self) -> &str {
            self.0
        }
        fn stage(&self) -> u32 {
            self.1
        }
        async fn wait(&self, _ctx: CancellationToken) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stages_group_and_sort_by_stage_number() {
        let mut registry = SignalRegistry::new();
        registry.add_signal(Arc::new(Noop("b", 1)));
        registry.add_signal(Arc::new(Noop("a", 0)));
        registry.add_signal(Arc::new(Noop("c", 1)));

        let stages = registry.stages();
        let stage_numbers: Vec<u32> = stages.iter().map(|(n, _)| *n).collect();
        assert_eq!(stage_numbers, vec![0, 1]);
        assert_eq!(stages[1].1.len(), 2);
    }

    #[test]
    fn last_stage_mode_registration_wins() {
        let mut registry = SignalRegistry::new();
        registry.add_stage_mode(0, ExecutionMode::Sequential);
        registry.add_stage_mode(0, ExecutionMode::DependencyAware);
        assert_eq!(registry.stage_mode(0), ExecutionMode::DependencyAware);
    }

    #[test]
    fn unregistered_stage_defaults_to_parallel() {
        let registry = SignalRegistry::new();
        assert_eq!(registry.stage_mode(7), ExecutionMode::Parallel);
    }
}
