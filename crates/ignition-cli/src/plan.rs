//! `ignition.toml` plan format: `serde` + `toml` deserialization followed by
//! a separate validation pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ignition_core::registry::EagerFactory;
use ignition_core::{Coordinator, ExecutionMode, IgnitionOptions, Policy, RetryPolicy, Signal};
use ignition_probes::{HttpGetSignal, PostgresPingSignal, TcpConnectSignal};
use serde::Deserialize;
use thiserror::Error;

/// Top-level structure of an `ignition.toml` file.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanToml {
    #[serde(default)]
    pub run: RunToml,
    #[serde(default)]
    pub signals: Vec<SignalToml>,
}

/// Run-level options in `[run]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunToml {
    /// `"fail_fast"` or `"best_effort"`.
    pub policy: String,
    /// Global deadline in milliseconds; absent means no global deadline.
    pub global_timeout_ms: Option<u64>,
    /// Default execution mode for stages with no explicit override.
    pub execution_mode: String,
}

impl Default for RunToml {
    fn default() -> Self {
        Self {
            policy: "fail_fast".to_string(),
            global_timeout_ms: None,
            execution_mode: "parallel".to_string(),
        }
    }
}

/// A single `[[signals]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalToml {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub stage: u32,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub initial_delay_ms: u64,
    /// `true` if a failure of this signal should cancel `scope`.
    #[serde(default)]
    pub trigger: bool,
    /// Name of the cancellation scope this signal (and its triggered peers)
    /// belong to. Signals sharing a `scope` value are placed in the same
    /// child scope of the coordinator's root.
    pub scope: Option<String>,

    // kind = "tcp"
    pub host: Option<String>,
    pub port: Option<u16>,

    // kind = "http"
    pub url: Option<String>,

    // kind = "postgres"
    pub connection_string: Option<String>,
}

#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("duplicate signal name: {0:?}")]
    DuplicateName(String),

    #[error("signal {signal:?} depends on unknown signal {dependency:?}")]
    UnknownDependency { signal: String, dependency: String },

    #[error("signal {0:?} has kind {1:?} (expected tcp, http, or postgres)")]
    InvalidKind(String, String),

    #[error("signal {0:?} has kind \"tcp\" but is missing host/port")]
    MissingTcpFields(String),

    #[error("signal {0:?} has kind \"http\" but is missing url")]
    MissingHttpFields(String),

    #[error("signal {0:?} has kind \"postgres\" but is missing connection_string")]
    MissingPostgresFields(String),

    #[error("invalid policy {0:?} (expected fail_fast or best_effort)")]
    InvalidPolicy(String),

    #[error("invalid execution_mode {0:?} (expected parallel, sequential, or dependency_aware)")]
    InvalidExecutionMode(String),

    #[error(transparent)]
    CycleDetected(#[from] ignition_core::ConfigError),
}

/// Parses and validates an `ignition.toml` document.
pub fn parse_plan_toml(content: &str) -> Result<PlanToml, PlanParseError> {
    let plan: PlanToml = toml::from_str(content)?;
    validate(&plan)?;
    Ok(plan)
}

fn validate(plan: &PlanToml) -> Result<(), PlanParseError> {
    parse_policy(&plan.run.policy)?;
    parse_execution_mode(&plan.run.execution_mode)?;

    let mut seen = HashSet::new();
    for signal in &plan.signals {
        if !seen.insert(signal.name.clone()) {
            return Err(PlanParseError::DuplicateName(signal.name.clone()));
        }
        match signal.kind.as_str() {
            "tcp" => {
                if signal.host.is_none() || signal.port.is_none() {
                    return Err(PlanParseError::MissingTcpFields(signal.name.clone()));
                }
            }
            "http" => {
                if signal.url.is_none() {
                    return Err(PlanParseError::MissingHttpFields(signal.name.clone()));
                }
            }
            "postgres" => {
                if signal.connection_string.is_none() {
                    return Err(PlanParseError::MissingPostgresFields(signal.name.clone()));
                }
            }
            other => {
                return Err(PlanParseError::InvalidKind(
                    signal.name.clone(),
                    other.to_string(),
                ));
            }
        }
    }

    for signal in &plan.signals {
        for dep in &signal.depends_on {
            if !seen.contains(dep) {
                return Err(PlanParseError::UnknownDependency {
                    signal: signal.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Whole-plan acyclicity, reusing ignition-core's own cycle checker
    // rather than re-implementing Kahn's algorithm here.
    let names: Vec<String> = plan.signals.iter().map(|s| s.name.clone()).collect();
    let edges: Vec<(String, String)> = plan
        .signals
        .iter()
        .flat_map(|s| s.depends_on.iter().map(move |dep| (s.name.clone(), dep.clone())))
        .collect();
    let known: HashSet<String> = seen;
    let graph = ignition_core::dag::DependencyGraph::build(0, &names, &edges, &known)?;
    graph.check_for_cycles(0)?;

    Ok(())
}

fn parse_policy(s: &str) -> Result<Policy, PlanParseError> {
    match s {
        "fail_fast" => Ok(Policy::FailFast),
        "best_effort" => Ok(Policy::BestEffort),
        other => Err(PlanParseError::InvalidPolicy(other.to_string())),
    }
}

fn parse_execution_mode(s: &str) -> Result<ExecutionMode, PlanParseError> {
    match s {
        "parallel" => Ok(ExecutionMode::Parallel),
        "sequential" => Ok(ExecutionMode::Sequential),
        "dependency_aware" => Ok(ExecutionMode::DependencyAware),
        other => Err(PlanParseError::InvalidExecutionMode(other.to_string())),
    }
}

fn build_signal(entry: &SignalToml) -> Arc<dyn Signal> {
    let timeout = entry.timeout_ms.map(Duration::from_millis);
    match entry.kind.as_str() {
        "tcp" => {
            let mut s = TcpConnectSignal::new(
                entry.name.clone(),
                entry.host.clone().expect("validated"),
                entry.port.expect("validated"),
            )
            .with_stage(entry.stage);
            if let Some(t) = timeout {
                s = s.with_timeout(t);
            }
            Arc::new(s)
        }
        "http" => {
            let mut s = HttpGetSignal::new(entry.name.clone(), entry.url.clone().expect("validated"))
                .with_stage(entry.stage);
            if let Some(t) = timeout {
                s = s.with_timeout(t);
            }
            Arc::new(s)
        }
        "postgres" => {
            let mut s = PostgresPingSignal::new(
                entry.name.clone(),
                entry.connection_string.clone().expect("validated"),
            )
            .with_stage(entry.stage);
            if let Some(t) = timeout {
                s = s.with_timeout(t);
            }
            Arc::new(s)
        }
        other => unreachable!("validate() rejects kind {other:?} before this point"),
    }
}

/// Builds a fully-registered [`Coordinator`] from a validated plan: one
/// eager signal per `[[signals]]` entry, `depends_on` edges, per-stage
/// execution mode, and trigger/scope bindings.
pub fn build_coordinator(plan: &PlanToml) -> anyhow::Result<Coordinator> {
    let policy = parse_policy(&plan.run.policy)?;
    let execution_mode_default = parse_execution_mode(&plan.run.execution_mode)?;

    let options = IgnitionOptions {
        policy,
        global_timeout: plan.run.global_timeout_ms.map(Duration::from_millis),
        execution_mode_default,
        default_retry: RetryPolicy::none(),
        ..Default::default()
    };
    let coordinator = Coordinator::new(options, ignition_core::Services::new());

    let mut scopes = std::collections::HashMap::new();
    for entry in &plan.signals {
        if let Some(name) = &entry.scope {
            scopes
                .entry(name.clone())
                .or_insert_with(|| coordinator.new_scope(name.clone()));
        }
    }

    for entry in &plan.signals {
        let signal = build_signal(entry);
        let factory: Arc<dyn ignition_core::SignalFactory> = if entry.max_retries > 0 {
            let retry = RetryPolicy::new(entry.max_retries, Duration::from_millis(entry.initial_delay_ms));
            Arc::new(EagerFactory::with_retry(signal, retry))
        } else {
            Arc::new(EagerFactory::new(signal))
        };
        match &entry.scope {
            Some(scope_name) => {
                let scope = scopes[scope_name].clone();
                coordinator.add_factory_with_scope(factory, scope, entry.trigger);
            }
            None => coordinator.add_factory(factory),
        }
        for dep in &entry.depends_on {
            coordinator.add_dependency(entry.name.clone(), dep.clone());
        }
    }

    for stage in plan.signals.iter().map(|s| s.stage).collect::<HashSet<_>>() {
        let any_dependency_aware = plan
            .signals
            .iter()
            .any(|s| s.stage == stage && !s.depends_on.is_empty());
        if any_dependency_aware {
            coordinator.add_stage_mode(stage, ExecutionMode::DependencyAware);
        } else {
            coordinator.add_stage_mode(stage, execution_mode_default);
        }
    }

    Ok(coordinator)
}
