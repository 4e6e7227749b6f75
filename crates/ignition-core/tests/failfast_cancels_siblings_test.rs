//! Under FailFast, one signal failing cancels its still-running siblings
//! (they terminate `Cancelled`, not `Failed`), and `wait_all` raises a
//! composite error.

use std::sync::Arc;
use std::time::Duration;

use ignition_core::{CancellationToken, Coordinator, CoordinatorError, IgnitionOptions, OverallStatus, Policy, Services, SignalStatus};
use ignition_test_utils::{ControllableSignal, status_of};

#[tokio::test]
async fn failing_signal_cancels_slower_siblings() {
    let options = IgnitionOptions {
        policy: Policy::FailFast,
        ..IgnitionOptions::default()
    };
    let coordinator = Coordinator::new(options, Services::new());

    coordinator.add_signal(Arc::new(ControllableSignal::failing(
        "a",
        Duration::from_millis(50),
        "dependency unreachable",
    )));
    coordinator.add_signal(Arc::new(ControllableSignal::succeeding("b", Duration::from_secs(5))));
    coordinator.add_signal(Arc::new(ControllableSignal::succeeding("c", Duration::from_secs(5))));

    let started = std::time::Instant::now();
    let err = coordinator
        .wait_all(CancellationToken::new())
        .await
        .expect_err("FailFast with a failing signal must raise a composite error");

    match err {
        CoordinatorError::Failed(wait_all_err) => {
            assert_eq!(wait_all_err.total_count, 3);
            assert_eq!(wait_all_err.failed_count, 3);
        }
        other => panic!("expected WaitAllError, got {other:?}"),
    }

    // B and C must not have been allowed to run to their full 5s delay.
    assert!(started.elapsed() < Duration::from_secs(2));

    let result = coordinator.get_result();
    assert_eq!(result.overall_status, OverallStatus::Failed);
    assert_eq!(status_of(&result, "a"), SignalStatus::Failed);
    assert_eq!(status_of(&result, "b"), SignalStatus::Cancelled);
    assert_eq!(status_of(&result, "c"), SignalStatus::Cancelled);
}
