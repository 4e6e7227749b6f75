//! `ignition-core`: a startup readiness coordinator.
//!
//! Embedding applications register readiness [`signal::Signal`]s (or deferred
//! [`registry::SignalFactory`]s) with a [`coordinator::Coordinator`], group
//! them into stages, and call [`coordinator::Coordinator::wait_all`] once to
//! block until every signal reaches a terminal state under the configured
//! [`aggregator::Policy`]. The aggregate result is observable at any time via
//! [`coordinator::Coordinator::get_result`], even while the run is still in
//! progress.
//!
//! This crate has no collaborator dependencies: it knows nothing about any
//! concrete dependency (a database, a queue, an HTTP endpoint). Leaf probes
//! live in `ignition-probes`; a sample CLI and health-check adapter live in
//! `ignition-cli`.

pub mod aggregator;
pub mod coordinator;
pub mod dag;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod scope;
pub mod services;
pub mod signal;

pub use aggregator::{AggregateResult, OverallStatus, Policy};
pub use coordinator::{Coordinator, IgnitionOptions};
pub use error::{ConfigError, CoordinatorError, WaitAllError};
pub use metrics::{MetricsSink, NoopMetricsSink};
pub use registry::{DeferredFactory, EagerFactory, ExecutionMode, SignalFactory, SignalRegistry};
pub use retry::RetryPolicy;
pub use scope::{CancellationReason, CancellationScope, ScopeStatus};
pub use services::Services;
pub use signal::{Outcome, Signal, SignalResult, SignalStatus, SkipReason};

pub use tokio_util::sync::CancellationToken;
