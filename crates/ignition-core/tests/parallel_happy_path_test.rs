//! Two independent signals in a Parallel stage under BestEffort both
//! succeed; the run's total duration is close to the slower signal's delay,
//! not their sum.

use std::sync::Arc;
use std::time::Duration;

use ignition_core::{CancellationToken, Coordinator, IgnitionOptions, OverallStatus, Policy, Services, SignalStatus};
use ignition_test_utils::{ControllableSignal, status_of};

#[tokio::test]
async fn both_signals_succeed_and_run_concurrently() {
    let options = IgnitionOptions {
        policy: Policy::BestEffort,
        global_timeout: Some(Duration::from_secs(2)),
        ..IgnitionOptions::default()
    };
    let coordinator = Coordinator::new(options, Services::new());

    coordinator.add_signal(Arc::new(ControllableSignal::succeeding("a", Duration::from_millis(200))));
    coordinator.add_signal(Arc::new(ControllableSignal::succeeding("b", Duration::from_millis(300))));

    let result = coordinator.wait_all(CancellationToken::new()).await.unwrap();

    assert_eq!(result.overall_status, OverallStatus::Succeeded);
    assert_eq!(status_of(&result, "a"), SignalStatus::Succeeded);
    assert_eq!(status_of(&result, "b"), SignalStatus::Succeeded);

    // Parallel, not sequential: well under the 500ms sum of both delays.
    assert!(
        result.total_duration < Duration::from_millis(450),
        "expected concurrent execution, total_duration was {:?}",
        result.total_duration
    );
    assert!(result.total_duration >= Duration::from_millis(300));
}

#[tokio::test]
async fn get_result_is_callable_before_wait_all_completes() {
    let coordinator = Arc::new(Coordinator::new(IgnitionOptions::default(), Services::new()));
    coordinator.add_signal(Arc::new(ControllableSignal::succeeding("slow", Duration::from_millis(150))));

    let waiting = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.wait_all(CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let mid_flight = coordinator.get_result();
    assert_eq!(mid_flight.overall_status, OverallStatus::Pending);

    let result = waiting.await.unwrap().unwrap();
    assert_eq!(result.overall_status, OverallStatus::Succeeded);
}
