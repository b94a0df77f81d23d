//! Test doubles and common utilities for manager contract tests
//!
//! These doubles verify registry and dispatch behavior without
//! spawning any real process or touching the filesystem.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use dhcpsup_core::config::{BackendConfig, Ip4Settings, ManagerConfig};
use dhcpsup_core::error::{Error, Result};
use dhcpsup_core::lease::LeaseOptions;
use dhcpsup_core::traits::{BackendFactory, DhcpBackend, LeaseEntry, Pid};

/// A mock backend that records calls and hands out a fixed pid
pub struct MockBackend {
    pid: Pid,
    pid_file: PathBuf,
    /// Shared with the factory that created this backend
    start_call_count: Arc<AtomicUsize>,
    stop_call_count: Arc<AtomicUsize>,
    fail_next_start: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl DhcpBackend for MockBackend {
    async fn start(
        &mut self,
        _uuid: &str,
        _settings: &Ip4Settings,
        _anycast: Option<Ipv4Addr>,
    ) -> Result<Pid> {
        self.start_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(Error::backend_unavailable("/no/such/client"));
        }
        Ok(self.pid)
    }

    async fn stop(&mut self) -> Result<()> {
        self.stop_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }

    fn pid_file(&self) -> &Path {
        &self.pid_file
    }
}

/// A mock factory that assigns each created backend the next pid in
/// sequence (100, 101, ...) and tracks calls across all backends
pub struct MockFactory {
    next_pid: Arc<AtomicU32>,
    /// iface → pid assigned to the most recently created backend
    assigned_pids: Arc<std::sync::Mutex<HashMap<String, Pid>>>,
    create_call_count: Arc<AtomicUsize>,
    start_call_count: Arc<AtomicUsize>,
    stop_call_count: Arc<AtomicUsize>,
    fail_next_start: Arc<AtomicBool>,
    /// Lease entries returned by get_lease_config()
    pub lease_entries: Vec<LeaseEntry>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            next_pid: Arc::new(AtomicU32::new(100)),
            assigned_pids: Arc::new(std::sync::Mutex::new(HashMap::new())),
            create_call_count: Arc::new(AtomicUsize::new(0)),
            start_call_count: Arc::new(AtomicUsize::new(0)),
            stop_call_count: Arc::new(AtomicUsize::new(0)),
            fail_next_start: Arc::new(AtomicBool::new(false)),
            lease_entries: Vec::new(),
        }
    }

    /// Create a handle that shares counters with an existing factory
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            next_pid: Arc::clone(&other.next_pid),
            assigned_pids: Arc::clone(&other.assigned_pids),
            create_call_count: Arc::clone(&other.create_call_count),
            start_call_count: Arc::clone(&other.start_call_count),
            stop_call_count: Arc::clone(&other.stop_call_count),
            fail_next_start: Arc::clone(&other.fail_next_start),
            lease_entries: other.lease_entries.clone(),
        }
    }

    /// Make the next start() call fail with a backend error
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Pid assigned to the most recently created backend for `iface`
    pub fn pid_for(&self, iface: &str) -> Option<Pid> {
        self.assigned_pids.lock().unwrap().get(iface).copied()
    }

    pub fn create_call_count(&self) -> usize {
        self.create_call_count.load(Ordering::SeqCst)
    }

    pub fn start_call_count(&self) -> usize {
        self.start_call_count.load(Ordering::SeqCst)
    }

    pub fn stop_call_count(&self) -> usize {
        self.stop_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BackendFactory for MockFactory {
    fn create(&self, iface: &str) -> Box<dyn DhcpBackend> {
        self.create_call_count.fetch_add(1, Ordering::SeqCst);
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.assigned_pids
            .lock()
            .unwrap()
            .insert(iface.to_string(), pid);
        Box::new(MockBackend {
            pid,
            pid_file: PathBuf::from(format!("/tmp/mock-{iface}.pid")),
            start_call_count: Arc::clone(&self.start_call_count),
            stop_call_count: Arc::clone(&self.stop_call_count),
            fail_next_start: Arc::clone(&self.fail_next_start),
        })
    }

    async fn get_lease_config(&self, _iface: &str, _uuid: &str) -> Vec<LeaseEntry> {
        self.lease_entries.clone()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Helper to create a minimal ManagerConfig for testing
pub fn minimal_config() -> ManagerConfig {
    ManagerConfig::new(
        BackendConfig::Dhclient {
            path: "/sbin/dhclient".into(),
        },
        "/tmp/dhcpsup-test",
    )
}

/// Build a lease event map the way an external client would report it
pub fn event(iface: &str, pid: Pid, reason: &str, extra: &[(&str, &str)]) -> LeaseOptions {
    let mut options: Vec<(String, String)> = vec![
        ("interface".to_string(), iface.to_string()),
        ("pid".to_string(), pid.to_string()),
        ("reason".to_string(), reason.to_string()),
    ];
    for (k, v) in extra {
        options.push((k.to_string(), v.to_string()));
    }
    options.into_iter().collect()
}
