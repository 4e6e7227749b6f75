//! Human-readable and `--json` reporting, and the exit-code mapping for
//! host adapters.

use ignition_core::{AggregateResult, OverallStatus};
use serde::Serialize;

#[derive(Serialize)]
struct SignalReport {
    name: String,
    stage: u32,
    status: String,
    duration_ms: u128,
    attempts: u32,
    error: Option<String>,
}

#[derive(Serialize)]
struct AggregateReport {
    overall_status: String,
    total_duration_ms: u128,
    signals: Vec<SignalReport>,
}

impl From<&AggregateResult> for AggregateReport {
    fn from(result: &AggregateResult) -> Self {
        Self {
            overall_status: overall_status_wire(result.overall_status).to_string(),
            total_duration_ms: result.total_duration.as_millis(),
            signals: result
                .per_signal_results
                .iter()
                .map(|r| SignalReport {
                    name: r.name.clone(),
                    stage: r.stage,
                    status: r.status.to_string(),
                    duration_ms: r.duration.as_millis(),
                    attempts: r.attempts,
                    error: r.error.as_ref().map(|e| format!("{e:#}")),
                })
                .collect(),
        }
    }
}

fn overall_status_wire(status: OverallStatus) -> &'static str {
    match status {
        OverallStatus::Pending => "pending",
        OverallStatus::Succeeded => "succeeded",
        OverallStatus::PartialSuccess => "partial_success",
        OverallStatus::Failed => "failed",
        OverallStatus::Cancelled => "cancelled",
    }
}

pub fn print_json(result: &AggregateResult) {
    let report = AggregateReport::from(result);
    println!("{}", serde_json::to_string_pretty(&report).expect("report serializes"));
}

pub fn print_human(result: &AggregateResult) {
    println!("overall: {}", overall_status_wire(result.overall_status));
    println!("duration: {:.3}s", result.total_duration.as_secs_f64());
    println!();
    println!("{:<24} {:<8} {:>10} {:>8}  {}", "SIGNAL", "STAGE", "DURATION", "TRIES", "STATUS");
    println!("{}", "-".repeat(72));
    for r in &result.per_signal_results {
        let duration = format!("{}ms", r.duration.as_millis());
        print!(
            "{:<24} {:<8} {:>10} {:>8}  {}",
            r.name, r.stage, duration, r.attempts, r.status
        );
        if let Some(err) = &r.error {
            print!("  ({err})");
        }
        println!();
    }
}

/// Maps a terminal [`OverallStatus`] to a process exit code:
/// `succeeded -> healthy`, `partial_success -> degraded`, `failed`/
/// `cancelled -> unhealthy`, `pending -> unhealthy(starting)`.
pub fn exit_code(result: &AggregateResult) -> i32 {
    match result.overall_status {
        OverallStatus::Succeeded => 0,
        OverallStatus::PartialSuccess => 1,
        OverallStatus::Failed | OverallStatus::Cancelled => 2,
        OverallStatus::Pending => 3,
    }
}

/// Maps a terminal [`OverallStatus`] to the `/healthz` HTTP status per the
/// same exit-mapping table: `200` healthy, `200` degraded (with a body
/// flag), `503` unhealthy/starting.
pub fn http_status(result: &AggregateResult) -> u16 {
    match result.overall_status {
        OverallStatus::Succeeded | OverallStatus::PartialSuccess => 200,
        OverallStatus::Failed | OverallStatus::Cancelled | OverallStatus::Pending => 503,
    }
}

pub fn is_degraded(result: &AggregateResult) -> bool {
    result.overall_status == OverallStatus::PartialSuccess
}

#[cfg(test)]
mod tests {
    use super::*;
    use ignition_core::{SignalResult, SignalStatus};
    use std::time::{Duration, SystemTime};

    fn result(overall: OverallStatus) -> AggregateResult {
        AggregateResult {
            per_signal_results: vec![SignalResult {
                name: "db".to_string(),
                stage: 0,
                status: SignalStatus::Succeeded,
                started_at: SystemTime::now(),
                finished_at: SystemTime::now(),
                duration: Duration::from_millis(10),
                error: None,
                attempts: 1,
            }],
            total_duration: Duration::from_millis(10),
            overall_status: overall,
        }
    }

    #[test]
    fn exit_code_maps_each_overall_status() {
        assert_eq!(exit_code(&result(OverallStatus::Succeeded)), 0);
        assert_eq!(exit_code(&result(OverallStatus::PartialSuccess)), 1);
        assert_eq!(exit_code(&result(OverallStatus::Failed)), 2);
        assert_eq!(exit_code(&result(OverallStatus::Cancelled)), 2);
        assert_eq!(exit_code(&result(OverallStatus::Pending)), 3);
    }

    #[test]
    fn http_status_maps_each_overall_status() {
        assert_eq!(http_status(&result(OverallStatus::Succeeded)), 200);
        assert_eq!(http_status(&result(OverallStatus::PartialSuccess)), 200);
        assert_eq!(http_status(&result(OverallStatus::Failed)), 503);
        assert_eq!(http_status(&result(OverallStatus::Pending)), 503);
    }
}
