//! A signal whose own timeout elapses is reported `TimedOut`, not `Failed`
//! or `Cancelled`, with a measured duration at least as long as its
//! deadline, and an unrelated sibling is unaffected.

use std::sync::Arc;
use std::time::Duration;

use ignition_core::{CancellationToken, Coordinator, IgnitionOptions, Policy, Services, SignalStatus};
use ignition_test_utils::{ControllableSignal, result_of, status_of};

#[tokio::test]
async fn per_signal_timeout_elapses_into_timed_out() {
    let options = IgnitionOptions {
        policy: Policy::BestEffort,
        global_timeout: Some(Duration::from_secs(10)),
        ..IgnitionOptions::default()
    };
    let coordinator = Coordinator::new(options, Services::new());

    coordinator.add_signal(Arc::new(
        ControllableSignal::succeeding("slow-dependency", Duration::from_millis(500))
            .with_timeout(Duration::from_millis(100)),
    ));
    coordinator.add_signal(Arc::new(ControllableSignal::succeeding("unrelated", Duration::from_millis(30))));

    let result = coordinator.wait_all(CancellationToken::new()).await;
    // Policy is BestEffort, so a TimedOut signal alongside a Succeeded one
    // does not raise an error out of wait_all.
    let snapshot = result.unwrap();

    assert_eq!(status_of(&snapshot, "slow-dependency"), SignalStatus::TimedOut);
    assert_eq!(status_of(&snapshot, "unrelated"), SignalStatus::Succeeded);

    let timed_out = result_of(&snapshot, "slow-dependency");
    assert!(timed_out.duration >= Duration::from_millis(100));
    assert!(
        timed_out.error.is_some(),
        "error must be non-null whenever status is Failed or TimedOut"
    );
}
