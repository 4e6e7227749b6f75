//! Metrics sink hook: an optional, injectable observer so a host
//! application can export per-signal timing and status without
//! `ignition-core` depending on any specific metrics backend, leaving
//! tracing as the only instrumentation baked into the crate itself.

use std::time::Duration;

use crate::signal::SignalStatus;

pub trait MetricsSink: Send + Sync {
    fn record_signal_duration(&self, _name: &str, _duration: Duration) {}
    fn record_signal_status(&self, _name: &str, _status: SignalStatus) {}
    fn record_total_duration(&self, _duration: Duration) {}
}

/// A sink that discards everything; the default when `IgnitionOptions`
/// carries no sink.
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_accepts_all_calls() {
        let sink = NoopMetricsSink;
        sink.record_signal_duration("x", Duration::from_secs(1));
        sink.record_signal_status("x", SignalStatus::Succeeded);
        sink.record_total_duration(Duration::from_secs(2));
    }
}
