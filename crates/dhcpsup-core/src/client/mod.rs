//! Per-interface DHCP client lifecycle
//!
//! One [`DhcpClient`] drives one external negotiation from start
//! through lease acquisition, renewal, failure, or timeout, to
//! termination.
//!
//! ## State machine
//!
//! ```text
//! Init ──► Starting ──► Active ──► Bound ◄──► Renewing
//!             │            │         │            │
//!             │  spawn     │ timeout/│ FAIL/      │
//!             ▼  failure   ▼ FAIL    ▼ EXPIRE     ▼
//!           Abend ◄────────┴─────────┴────────────┘
//!             ▲
//!   END/STOP/release ──► Ended          (Abend, Ended terminal)
//! ```
//!
//! ## Notification paths
//!
//! Terminal outcomes surface through two distinct paths on one channel
//! registered at handle creation: `StateChanged` for every transition
//! and `TimedOut` when the internal timer expires with no lease bound.
//! The manager's deregistration is idempotent, so either terminal
//! notification may arrive first.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::Ip4Settings;
use crate::error::{Error, Result};
use crate::lease::{self, IpConfig, LeaseOptions};
use crate::traits::{DhcpBackend, Pid};

/// Lifecycle state of one supervised negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpState {
    /// Created, process not yet spawned
    Init,
    /// Spawn requested
    Starting,
    /// Process identity recorded, awaiting lease events
    Active,
    /// At least one usable lease established
    Bound,
    /// Lease refresh in progress, prior lease still valid
    Renewing,
    /// Abnormal end: spawn failure, malformed critical data,
    /// process-reported failure, or timeout
    Abend,
    /// Graceful stop or process-reported completion
    Ended,
}

impl DhcpState {
    /// Whether this state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, DhcpState::Abend | DhcpState::Ended)
    }
}

impl fmt::Display for DhcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DhcpState::Init => "init",
            DhcpState::Starting => "starting",
            DhcpState::Active => "active",
            DhcpState::Bound => "bound",
            DhcpState::Renewing => "renewing",
            DhcpState::Abend => "abend",
            DhcpState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Notifications a client handle emits toward the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotification {
    /// The handle transitioned state
    StateChanged {
        /// Identity of the emitting handle (guards against supersession)
        client_id: u64,
        /// Interface the handle is bound to
        iface: String,
        /// New state
        state: DhcpState,
    },

    /// The negotiation timed out with no lease bound
    TimedOut {
        /// Identity of the emitting handle
        client_id: u64,
        /// Interface the handle is bound to
        iface: String,
    },
}

/// Snapshot of a client handle returned to callers
///
/// Handles themselves stay owned by the manager; callers holding a
/// snapshot across an asynchronous boundary must re-resolve by
/// interface name rather than cache it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Interface name
    pub iface: String,
    /// Negotiation correlation token
    pub uuid: String,
    /// Process identity, once spawned
    pub pid: Option<Pid>,
    /// Current lifecycle state
    pub state: DhcpState,
}

/// Classification of the reason strings external clients report
enum ReasonClass {
    /// A usable lease was obtained (BOUND, REBOOT)
    Lease,
    /// A lease refresh completed (RENEW, REBIND)
    Renew,
    /// Client is initializing, nothing actionable yet
    Preinit,
    /// Process-reported failure (FAIL, ABEND, EXPIRE, NAK)
    Fail,
    /// Normal termination (END, STOP, RELEASE)
    End,
    /// Anything else: logged and ignored
    Unknown,
}

fn classify_reason(reason: &str) -> ReasonClass {
    match reason.to_ascii_uppercase().as_str() {
        "BOUND" | "REBOOT" => ReasonClass::Lease,
        "RENEW" | "REBIND" => ReasonClass::Renew,
        "PREINIT" => ReasonClass::Preinit,
        "FAIL" | "ABEND" | "EXPIRE" | "NAK" => ReasonClass::Fail,
        "END" | "STOP" | "RELEASE" => ReasonClass::End,
        _ => ReasonClass::Unknown,
    }
}

/// One supervised external DHCP negotiation
pub struct DhcpClient {
    /// Manager-assigned identity, unique across the manager's lifetime
    id: u64,

    /// Interface name, immutable for the handle's lifetime, never empty
    iface: String,

    /// Caller-supplied negotiation correlation token
    uuid: String,

    /// Process identity, set once the external process is spawned
    pid: Option<Pid>,

    /// Current lifecycle state
    state: DhcpState,

    /// Backend adapter owning the marker file and command line
    backend: Box<dyn DhcpBackend>,

    /// Optional anycast hint, immutable
    anycast: Option<Ipv4Addr>,

    /// Negotiation timeout; zero disables the timer
    timeout: Duration,

    /// Channel toward the manager, registered at creation
    notify: mpsc::UnboundedSender<ClientNotification>,

    /// Armed timeout timer, aborted on bind or teardown
    timeout_task: Option<AbortHandle>,

    /// Last bound configuration
    lease: Option<IpConfig>,

    /// When the current lease was bound
    bound_at: Option<DateTime<Utc>>,
}

impl DhcpClient {
    pub(crate) fn new(
        id: u64,
        iface: impl Into<String>,
        uuid: impl Into<String>,
        backend: Box<dyn DhcpBackend>,
        anycast: Option<Ipv4Addr>,
        timeout: Duration,
        notify: mpsc::UnboundedSender<ClientNotification>,
    ) -> Self {
        let iface = iface.into();
        debug_assert!(!iface.is_empty());
        Self {
            id,
            iface,
            uuid: uuid.into(),
            pid: None,
            state: DhcpState::Init,
            backend,
            anycast,
            timeout,
            notify,
            timeout_task: None,
            lease: None,
            bound_at: None,
        }
    }

    /// Manager-assigned handle identity
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Interface this handle is bound to
    pub fn iface(&self) -> &str {
        &self.iface
    }

    /// Negotiation correlation token
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Process identity of the external client, once spawned
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Current lifecycle state
    pub fn state(&self) -> DhcpState {
        self.state
    }

    /// Last bound configuration, if any lease was established
    pub fn lease(&self) -> Option<&IpConfig> {
        self.lease.as_ref()
    }

    /// When the current lease was bound
    pub fn bound_at(&self) -> Option<DateTime<Utc>> {
        self.bound_at
    }

    /// Snapshot for callers
    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            iface: self.iface.clone(),
            uuid: self.uuid.clone(),
            pid: self.pid,
            state: self.state,
        }
    }

    /// Run the start sequence up to process spawn.
    ///
    /// Failure short-circuits straight to `Abend`; the error is also
    /// returned so the synchronous caller sees it.
    pub(crate) async fn start(&mut self, settings: &Ip4Settings) -> Result<()> {
        self.set_state(DhcpState::Starting);
        match self.backend.start(&self.uuid, settings, self.anycast).await {
            Ok(pid) => {
                info!(
                    "{} started with pid {pid} on {}",
                    self.backend.backend_name(),
                    self.iface
                );
                self.pid = Some(pid);
                self.set_state(DhcpState::Active);
                self.arm_timeout();
                Ok(())
            }
            Err(e) => {
                self.set_state(DhcpState::Abend);
                Err(e)
            }
        }
    }

    /// Feed one correlated event into the state machine.
    ///
    /// Events arriving after a terminal state are a no-op.
    pub(crate) fn handle_options(&mut self, options: &LeaseOptions, reason: &str) {
        if self.state.is_terminal() {
            debug!("ignoring event ({reason}) for finished client on {}", self.iface);
            return;
        }

        match classify_reason(reason) {
            ReasonClass::Lease => self.lease_obtained(options, reason),
            ReasonClass::Renew => {
                if matches!(self.state, DhcpState::Bound | DhcpState::Renewing) {
                    self.set_state(DhcpState::Renewing);
                }
                self.lease_obtained(options, reason);
            }
            ReasonClass::Preinit => {
                debug!("{} initializing on {}", self.backend.backend_name(), self.iface);
            }
            ReasonClass::Fail => {
                warn!("DHCP client on {} reported failure ({reason})", self.iface);
                self.disarm_timeout();
                self.set_state(DhcpState::Abend);
            }
            ReasonClass::End => {
                info!("DHCP client on {} finished ({reason})", self.iface);
                self.disarm_timeout();
                self.set_state(DhcpState::Ended);
            }
            ReasonClass::Unknown => {
                warn!("unhandled DHCP event reason '{reason}' on {}", self.iface);
            }
        }
    }

    fn lease_obtained(&mut self, options: &LeaseOptions, reason: &str) {
        let config = lease::options_to_config_with(options, reason, |opts, config| {
            self.backend.parse_lease_options(opts, config)
        });
        match config {
            Some(config) => {
                self.lease = Some(config);
                self.bound_at = Some(Utc::now());
                self.disarm_timeout();
                self.set_state(DhcpState::Bound);
            }
            None => {
                // Lease reason with no usable payload: critical data is malformed
                warn!(
                    "{}",
                    Error::lease_data(format!(
                        "lease event ({reason}) on {} carried no usable configuration",
                        self.iface
                    ))
                );
                self.disarm_timeout();
                self.set_state(DhcpState::Abend);
            }
        }
    }

    /// React to the timeout timer: terminal only when no lease bound yet
    pub(crate) fn on_timeout(&mut self) {
        if self.state.is_terminal() || self.lease.is_some() {
            return;
        }
        warn!("{}", Error::timeout(&self.iface));
        self.set_state(DhcpState::Abend);
    }

    /// Explicit stop: marker-file cleanup, then `Ended`.
    ///
    /// Does not wait for, or guarantee, the external process has
    /// exited; termination policy belongs to the caller.
    pub(crate) async fn stop(&mut self) -> Result<()> {
        self.disarm_timeout();
        let result = self.backend.stop().await;
        if !self.state.is_terminal() {
            self.set_state(DhcpState::Ended);
        }
        result
    }

    fn set_state(&mut self, new_state: DhcpState) {
        if self.state == new_state {
            return;
        }
        debug!("DHCP client on {}: {} -> {new_state}", self.iface, self.state);
        self.state = new_state;
        let _ = self.notify.send(ClientNotification::StateChanged {
            client_id: self.id,
            iface: self.iface.clone(),
            state: new_state,
        });
    }

    fn arm_timeout(&mut self) {
        if self.timeout.is_zero() {
            return;
        }
        let notify = self.notify.clone();
        let client_id = self.id;
        let iface = self.iface.clone();
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = notify.send(ClientNotification::TimedOut { client_id, iface });
        });
        self.timeout_task = Some(task.abort_handle());
    }

    /// Abort the timeout timer; safe to call repeatedly
    pub(crate) fn disarm_timeout(&mut self) {
        if let Some(handle) = self.timeout_task.take() {
            handle.abort();
        }
    }
}

impl Drop for DhcpClient {
    fn drop(&mut self) {
        self.disarm_timeout();
    }
}
