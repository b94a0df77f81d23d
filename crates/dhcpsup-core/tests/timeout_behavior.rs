//! Contract Test: Negotiation Timeout
//!
//! Verifies the timeout path with paused time:
//! - An unanswered negotiation times out, goes terminal, and is
//!   deregistered exactly once even though two notification paths
//!   report it
//! - Binding a lease disarms the timer for good
//! - A timeout notification for a superseded handle is ignored

mod common;

use common::*;
use dhcpsup_core::config::Ip4Settings;
use dhcpsup_core::{ClientNotification, DhcpManager, DhcpState};
use std::time::Duration;

fn new_manager(factory: &MockFactory) -> (
    DhcpManager,
    tokio::sync::mpsc::UnboundedReceiver<ClientNotification>,
) {
    DhcpManager::new(
        minimal_config(),
        Box::new(MockFactory::sharing_counters_with(factory)),
        None,
    )
    .expect("manager construction succeeds")
}

#[tokio::test(start_paused = true)]
async fn unanswered_negotiation_times_out_terminally() {
    let factory = MockFactory::new();
    let (mut manager, mut rx) = new_manager(&factory);

    manager
        .start_negotiation(
            "eth0",
            "uuid-1",
            &Ip4Settings::default(),
            Some(Duration::from_secs(10)),
            None,
        )
        .await
        .unwrap();
    while rx.try_recv().is_ok() {}

    // Paused time auto-advances to the timer
    let note = rx.recv().await.expect("timeout notification arrives");
    assert!(matches!(note, ClientNotification::TimedOut { ref iface, .. } if iface == "eth0"));
    manager.process_notification(note);
    assert_eq!(manager.active_count(), 0);

    // The state-changed path reports the same terminal handle; a
    // second processing is a no-op
    let mut saw_abend = false;
    while let Ok(note) = rx.try_recv() {
        if let ClientNotification::StateChanged { state, .. } = &note {
            saw_abend |= *state == DhcpState::Abend;
        }
        manager.process_notification(note);
    }
    assert!(saw_abend);
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn bound_lease_disarms_the_timer() {
    let factory = MockFactory::new();
    let (mut manager, mut rx) = new_manager(&factory);

    manager
        .start_negotiation(
            "eth0",
            "uuid-1",
            &Ip4Settings::default(),
            Some(Duration::from_secs(10)),
            None,
        )
        .await
        .unwrap();
    let pid = factory.pid_for("eth0").unwrap();

    manager.handle_event(&event(
        "eth0",
        pid,
        "BOUND",
        &[
            ("new_ip_address", "192.168.1.10"),
            ("new_subnet_mask", "255.255.255.0"),
        ],
    ));
    assert_eq!(manager.client_info("eth0").unwrap().state, DhcpState::Bound);

    // Sail well past the deadline; the aborted timer must stay silent
    tokio::time::sleep(Duration::from_secs(60)).await;
    while let Ok(note) = rx.try_recv() {
        assert!(
            !matches!(note, ClientNotification::TimedOut { .. }),
            "disarmed timer fired"
        );
        manager.process_notification(note);
    }
    assert_eq!(manager.active_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_racing_a_bind_leaves_the_bound_handle_registered() {
    let factory = MockFactory::new();
    let (mut manager, mut rx) = new_manager(&factory);

    manager
        .start_negotiation(
            "eth0",
            "uuid-1",
            &Ip4Settings::default(),
            Some(Duration::from_secs(10)),
            None,
        )
        .await
        .unwrap();
    let pid = factory.pid_for("eth0").unwrap();

    // Let the timer fire and queue its notification first
    tokio::time::sleep(Duration::from_secs(11)).await;

    // The bind arrives before the queued timeout is processed
    manager.handle_event(&event(
        "eth0",
        pid,
        "BOUND",
        &[
            ("new_ip_address", "192.168.1.10"),
            ("new_subnet_mask", "255.255.255.0"),
        ],
    ));
    assert_eq!(manager.client_info("eth0").unwrap().state, DhcpState::Bound);

    // Draining the stale timeout must not evict the live handle
    while let Ok(note) = rx.try_recv() {
        manager.process_notification(note);
    }
    assert_eq!(
        manager.client_info("eth0").map(|info| info.state),
        Some(DhcpState::Bound)
    );
    assert_eq!(manager.active_count(), 1);

    // Later events still reach the handle
    manager.handle_event(&event("eth0", pid, "END", &[]));
    assert_eq!(manager.client_info("eth0").unwrap().state, DhcpState::Ended);
}

#[tokio::test(start_paused = true)]
async fn stale_timeout_for_superseded_handle_is_ignored() {
    let factory = MockFactory::new();
    let (mut manager, mut rx) = new_manager(&factory);
    let settings = Ip4Settings::default();

    manager
        .start_negotiation("eth0", "uuid-1", &settings, Some(Duration::from_secs(10)), None)
        .await
        .unwrap();
    // Handle identities are assigned sequentially from 1
    let first_id = 1;

    // Supersede before the timer fires
    manager
        .start_negotiation("eth0", "uuid-2", &settings, Some(Duration::from_secs(10)), None)
        .await
        .unwrap();
    while rx.try_recv().is_ok() {}

    // A stale timeout naming the superseded handle must not touch the
    // replacement
    manager.process_notification(ClientNotification::TimedOut {
        client_id: first_id,
        iface: "eth0".to_string(),
    });
    assert_eq!(manager.active_count(), 1);
    assert_eq!(manager.client_info("eth0").unwrap().uuid, "uuid-2");
    assert_eq!(manager.client_info("eth0").unwrap().state, DhcpState::Active);
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_never_arms_a_timer() {
    let factory = MockFactory::new();
    let (mut manager, mut rx) = new_manager(&factory);

    manager
        .start_negotiation(
            "eth0",
            "uuid-1",
            &Ip4Settings::default(),
            Some(Duration::ZERO),
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3600)).await;
    while let Ok(note) = rx.try_recv() {
        assert!(!matches!(note, ClientNotification::TimedOut { .. }));
    }
    assert_eq!(manager.client_info("eth0").unwrap().state, DhcpState::Active);
}
