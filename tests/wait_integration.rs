mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use common::make_test_node;
use telco_systest::cluster;
use telco_systest::wait::{self, ExponentialBackoff, FixedInterval, PollError};

// ══════════════════════════════════════════════════════════════════
// Readiness predicates driven through the poller (paused clock)
// ══════════════════════════════════════════════════════════════════

/// Node states seen on successive polls during a reboot.
fn reboot_sequence(poll: u32) -> k8s_openapi::api::core::v1::Node {
    match poll {
        1 | 2 => make_test_node("sno-1", true, "boot-a"),
        3 | 4 => make_test_node("sno-1", false, "boot-a"),
        5 => make_test_node("sno-1", false, "boot-b"),
        _ => make_test_node("sno-1", true, "boot-b"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_reboot_detected_by_boot_id_and_ready() {
    let polls = Arc::new(AtomicU32::new(0));
    let started = tokio::time::Instant::now();

    wait::poll_until(
        "node sno-1 to reboot",
        Duration::from_secs(60),
        FixedInterval(Duration::from_secs(5)),
        || {
            let polls = polls.clone();
            async move {
                let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                let node = reboot_sequence(n);
                let new_boot = cluster::node_boot_id(&node).as_deref() != Some("boot-a");
                Ok(new_boot && cluster::node_is_ready(&node))
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(polls.load(Ordering::SeqCst), 6);
    assert_eq!(started.elapsed(), Duration::from_secs(25));
}

#[tokio::test(start_paused = true)]
async fn test_third_call_success_within_three_seconds() {
    let calls = Arc::new(AtomicU32::new(0));
    let started = tokio::time::Instant::now();

    wait::poll_until(
        "third call",
        Duration::from_secs(5),
        FixedInterval(Duration::from_secs(1)),
        || {
            let calls = calls.clone();
            async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1 >= 3) }
        },
    )
    .await
    .unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed <= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_gives_up_with_description() {
    let err = wait::poll_until(
        "mcp master to be updated",
        Duration::from_secs(30),
        ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(8)),
        || async { Ok::<bool, PollError>(false) },
    )
    .await
    .unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("timed out"));
    assert!(msg.contains("mcp master to be updated"));
}
