//! Error types surfaced at the coordinator boundary (spec §7).

use crate::signal::SignalResult;

/// Configuration-time errors: these are detected before any signal in the
/// affected stage runs and always cause `wait_all` to return `Err` with
/// overall status `Failed`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate signal name {name:?} in stage {stage}")]
    DuplicateName { stage: u32, name: String },

    #[error("dependency {predecessor:?} of signal {successor:?} is not a known signal")]
    UnknownDependency {
        successor: String,
        predecessor: String,
    },

    #[error("dependency cycle detected in stage {stage} involving signals: {members}")]
    CycleDetected { stage: u32, members: String },
}

/// The composite error `wait_all` raises under `FailFast` once overall
/// status becomes `Failed` (spec §7, "Propagation"). Carries every
/// non-Succeeded result so callers don't have to re-fetch `get_result`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{failed_count} of {total_count} signals did not succeed")]
pub struct WaitAllError {
    pub failed_count: usize,
    pub total_count: usize,
    pub results: Vec<SignalResult>,
}

/// Top-level error returned by [`crate::coordinator::Coordinator::wait_all`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Failed(#[from] WaitAllError),
}
