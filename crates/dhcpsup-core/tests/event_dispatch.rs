//! Contract Test: Event Dispatch Isolation
//!
//! Verifies how inbound lease events are correlated with handles:
//! - Correlation is by process identity, then checked against the
//!   reported interface
//! - Malformed or unmatched events are dropped without touching any
//!   handle and without panicking
//! - A superseded process can never feed events to its replacement

mod common;

use common::*;
use dhcpsup_core::config::Ip4Settings;
use dhcpsup_core::{DhcpManager, DhcpState};

fn new_manager(factory: &MockFactory) -> (
    DhcpManager,
    tokio::sync::mpsc::UnboundedReceiver<dhcpsup_core::ClientNotification>,
) {
    DhcpManager::new(
        minimal_config(),
        Box::new(MockFactory::sharing_counters_with(factory)),
        None,
    )
    .expect("manager construction succeeds")
}

const LEASE_KEYS: &[(&str, &str)] = &[
    ("new_ip_address", "192.168.1.10"),
    ("new_subnet_mask", "255.255.255.0"),
    ("new_routers", "192.168.1.1"),
];

#[tokio::test]
async fn bound_event_translates_into_a_lease() {
    let factory = MockFactory::new();
    let (mut manager, _rx) = new_manager(&factory);

    manager
        .start_negotiation("eth0", "uuid-1", &Ip4Settings::default(), None, None)
        .await
        .unwrap();
    let pid = factory.pid_for("eth0").unwrap();

    manager.handle_event(&event("eth0", pid, "BOUND", LEASE_KEYS));

    let info = manager.client_info("eth0").unwrap();
    assert_eq!(info.state, DhcpState::Bound);
}

#[tokio::test]
async fn unknown_pid_is_dropped() {
    let factory = MockFactory::new();
    let (mut manager, _rx) = new_manager(&factory);

    manager
        .start_negotiation("eth0", "uuid-1", &Ip4Settings::default(), None, None)
        .await
        .unwrap();

    // Pid matching no registered handle: dropped, registry unchanged
    manager.handle_event(&event("eth0", 99999, "BOUND", LEASE_KEYS));

    let info = manager.client_info("eth0").unwrap();
    assert_eq!(info.state, DhcpState::Active);
    assert_eq!(manager.active_count(), 1);
}

#[tokio::test]
async fn interface_mismatch_is_dropped() {
    let factory = MockFactory::new();
    let (mut manager, _rx) = new_manager(&factory);
    let settings = Ip4Settings::default();

    manager
        .start_negotiation("eth0", "uuid-1", &settings, None, None)
        .await
        .unwrap();
    manager
        .start_negotiation("wlan0", "uuid-2", &settings, None, None)
        .await
        .unwrap();
    let eth0_pid = factory.pid_for("eth0").unwrap();

    // eth0's pid reporting for wlan0: neither handle may transition
    manager.handle_event(&event("wlan0", eth0_pid, "BOUND", LEASE_KEYS));

    assert_eq!(manager.client_info("eth0").unwrap().state, DhcpState::Active);
    assert_eq!(manager.client_info("wlan0").unwrap().state, DhcpState::Active);
}

#[tokio::test]
async fn malformed_events_are_dropped_without_panic() {
    let factory = MockFactory::new();
    let (mut manager, _rx) = new_manager(&factory);

    manager
        .start_negotiation("eth0", "uuid-1", &Ip4Settings::default(), None, None)
        .await
        .unwrap();
    let pid = factory.pid_for("eth0").unwrap();

    // No interface
    manager.handle_event(&[("pid", "100"), ("reason", "BOUND")].into_iter().collect());
    // No pid
    manager.handle_event(&[("interface", "eth0"), ("reason", "BOUND")].into_iter().collect());
    // Unparseable pid
    manager.handle_event(
        &[("interface", "eth0"), ("pid", "-7"), ("reason", "BOUND")]
            .into_iter()
            .collect(),
    );
    manager.handle_event(
        &[("interface", "eth0"), ("pid", "junk"), ("reason", "BOUND")]
            .into_iter()
            .collect(),
    );
    // No reason
    let pid_str = pid.to_string();
    manager.handle_event(
        &[("interface", "eth0"), ("pid", pid_str.as_str())]
            .into_iter()
            .collect(),
    );

    assert_eq!(manager.client_info("eth0").unwrap().state, DhcpState::Active);
    assert_eq!(manager.active_count(), 1);
}

#[tokio::test]
async fn superseded_pid_cannot_reach_replacement_handle() {
    let factory = MockFactory::new();
    let (mut manager, _rx) = new_manager(&factory);
    let settings = Ip4Settings::default();

    manager
        .start_negotiation("eth0", "uuid-1", &settings, None, None)
        .await
        .unwrap();
    let old_pid = factory.pid_for("eth0").unwrap();

    manager
        .start_negotiation("eth0", "uuid-2", &settings, None, None)
        .await
        .unwrap();
    let new_pid = factory.pid_for("eth0").unwrap();
    assert_ne!(old_pid, new_pid);

    // The old process's dying gasp matches no registered pid
    manager.handle_event(&event("eth0", old_pid, "FAIL", &[]));

    let info = manager.client_info("eth0").unwrap();
    assert_eq!(info.state, DhcpState::Active);
    assert_eq!(info.uuid, "uuid-2");
}

#[tokio::test]
async fn events_target_only_the_matching_interface() {
    let factory = MockFactory::new();
    let (mut manager, _rx) = new_manager(&factory);
    let settings = Ip4Settings::default();

    manager
        .start_negotiation("eth0", "uuid-1", &settings, None, None)
        .await
        .unwrap();
    manager
        .start_negotiation("wlan0", "uuid-2", &settings, None, None)
        .await
        .unwrap();
    let wlan0_pid = factory.pid_for("wlan0").unwrap();

    manager.handle_event(&event("wlan0", wlan0_pid, "BOUND", LEASE_KEYS));

    assert_eq!(manager.client_info("wlan0").unwrap().state, DhcpState::Bound);
    assert_eq!(manager.client_info("eth0").unwrap().state, DhcpState::Active);
}
