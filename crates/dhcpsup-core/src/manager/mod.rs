//! DHCP manager and registry
//!
//! The manager owns the process-wide table of active per-interface
//! client handles, dispatches inbound events to the right handle by
//! correlating process identity and interface name, and enforces that
//! at most one negotiation is active per interface.
//!
//! ## Event flow
//!
//! ```text
//! caller ──start_negotiation──► Manager ──spawn──► external client
//!                                  ▲                     │
//!            notifications channel │      event transport │
//!                                  │                     ▼
//!                 ClientNotification ◄── DhcpClient ◄── handle_event
//! ```
//!
//! ## Threading
//!
//! All operations run on one control task; there is no locking because
//! there is no parallelism inside the core. Events for a given
//! interface are processed in arrival order, and a freshly started
//! handle fully replaces its predecessor before it can receive any
//! event. The manager is explicitly constructed and passed by
//! reference from the daemon's composition root; there is no global.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::{ClientInfo, ClientNotification, DhcpClient};
use crate::config::{Ip4Settings, ManagerConfig};
use crate::error::{Error, Result};
use crate::lease::{self, IpConfig, LeaseOptions};
use crate::traits::{BackendFactory, HostnameProvider, LeaseEntry};

/// Process-wide DHCP client supervisor
///
/// ## Lifecycle
///
/// 1. Create with [`DhcpManager::new()`], keeping the returned
///    notification receiver
/// 2. Drive it from one event loop: inbound transport events go to
///    [`handle_event`](Self::handle_event), notifications read from the
///    receiver go to [`process_notification`](Self::process_notification)
/// 3. Drop to release bookkeeping; external processes are deliberately
///    not terminated by the drop
pub struct DhcpManager {
    /// Validated configuration
    config: ManagerConfig,

    /// Backend strategy, resolved once for the manager's lifetime
    factory: Box<dyn BackendFactory>,

    /// Registry: interface name → live client handle
    clients: HashMap<String, DhcpClient>,

    /// Optional hostname source; outlives the manager by construction
    hostname_provider: Option<Arc<dyn HostnameProvider>>,

    /// Sender cloned into every handle at creation
    notify_tx: mpsc::UnboundedSender<ClientNotification>,

    /// Identity for the next handle; never reused within this manager
    next_client_id: u64,
}

impl DhcpManager {
    /// Create a new manager.
    ///
    /// # Parameters
    ///
    /// - `config`: manager configuration (validated here)
    /// - `factory`: backend adapter factory selected by configuration
    /// - `hostname_provider`: optional hostname source for requests
    ///   that ask for hostname transmission without supplying one
    ///
    /// # Returns
    ///
    /// The manager plus the notification receiver its event loop must
    /// drain into [`process_notification`](Self::process_notification).
    pub fn new(
        config: ManagerConfig,
        factory: Box<dyn BackendFactory>,
        hostname_provider: Option<Arc<dyn HostnameProvider>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientNotification>)> {
        config.validate()?;
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let manager = Self {
            config,
            factory,
            clients: HashMap::new(),
            hostname_provider,
            notify_tx,
            next_client_id: 1,
        };

        Ok((manager, notify_rx))
    }

    /// Start (or restart) DHCP on an interface.
    ///
    /// Any existing handle for `iface` is unconditionally stopped and
    /// deregistered first: supersession is not an error, the last
    /// caller wins. The start sequence runs synchronously up to process
    /// spawn; lease progress arrives later through the event path.
    ///
    /// On spawn failure the fresh handle is deregistered automatically
    /// and the error returned; a returned error never means "still
    /// running, just unreported".
    pub async fn start_negotiation(
        &mut self,
        iface: &str,
        uuid: &str,
        settings: &Ip4Settings,
        timeout: Option<Duration>,
        anycast: Option<Ipv4Addr>,
    ) -> Result<ClientInfo> {
        if iface.is_empty() {
            return Err(Error::config("interface name cannot be empty"));
        }

        // Supersede any old handle before the new one can see events
        if let Some(mut old) = self.clients.remove(iface) {
            info!("superseding DHCP client on {iface}");
            if let Err(e) = old.stop().await {
                warn!("error stopping superseded client on {iface}: {e}");
            }
        }

        let settings = self.effective_settings(settings);
        let timeout =
            timeout.unwrap_or_else(|| Duration::from_secs(self.config.default_timeout_secs));

        let backend = self.factory.create(iface);
        let id = self.next_client_id;
        self.next_client_id += 1;

        let mut client = DhcpClient::new(
            id,
            iface,
            uuid,
            backend,
            anycast,
            timeout,
            self.notify_tx.clone(),
        );

        match client.start(&settings).await {
            Ok(()) => {
                let info = client.info();
                self.clients.insert(iface.to_string(), client);
                Ok(info)
            }
            Err(e) => {
                // The handle never entered the registry; dropping it is
                // the deregistration
                error!("failed to start DHCP client on {iface}: {e}");
                Err(e)
            }
        }
    }

    /// Dispatch one inbound event to the handle it correlates with.
    ///
    /// Events missing `interface`, `pid`, or `reason`, with an
    /// unparseable pid, with a pid matching no registered handle, or
    /// whose interface disagrees with the matched handle are logged and
    /// dropped. No malformed event ever affects another interface.
    pub fn handle_event(&mut self, options: &LeaseOptions) {
        if let Err(e) = self.dispatch_event(options) {
            warn!("dropped DHCP event: {e}");
        }
    }

    fn dispatch_event(&mut self, options: &LeaseOptions) -> Result<()> {
        let Some(iface) = options.interface() else {
            return Err(Error::malformed_event("no associated interface"));
        };
        let Some(pid_str) = options.get(lease::OPT_PID) else {
            return Err(Error::malformed_event(format!(
                "no associated pid (interface {iface})"
            )));
        };
        let Some(pid) = options.pid() else {
            return Err(Error::malformed_event(format!(
                "unconvertible pid '{pid_str}' (interface {iface})"
            )));
        };

        // O(n) over the registry; bounded by live interface count
        let Some(client) = self.clients.values_mut().find(|c| c.pid() == Some(pid)) else {
            return Err(Error::UnmatchedEvent { pid });
        };

        // Defense against pid reuse misattributing events
        if client.iface() != iface {
            debug!(
                "event claims interface '{iface}' but pid {pid} belongs to '{}'",
                client.iface()
            );
            return Err(Error::UnmatchedEvent { pid });
        }

        let Some(reason) = options.reason() else {
            return Err(Error::malformed_event(format!(
                "no reason (interface {iface})"
            )));
        };
        let reason = reason.to_string();

        client.handle_options(options, &reason);
        Ok(())
    }

    /// Consume one client notification, deregistering on terminal
    /// outcomes.
    ///
    /// Idempotent: the state-changed and timeout paths may both report
    /// the same terminal handle, in either order, and supersession may
    /// already have replaced the handle; stale notifications are
    /// dropped by identity mismatch. A timeout that lost the race
    /// against a bind leaves the handle registered, since the timer
    /// only goes terminal with no lease bound.
    pub fn process_notification(&mut self, notification: ClientNotification) {
        match notification {
            ClientNotification::StateChanged {
                client_id,
                iface,
                state,
            } => {
                if state.is_terminal() {
                    self.deregister(&iface, client_id);
                }
            }
            ClientNotification::TimedOut { client_id, iface } => {
                // A queued timeout may race a bind: only a handle the
                // timer actually drove terminal gets deregistered
                let timed_out = match self.clients.get_mut(&iface) {
                    Some(client) if client.id() == client_id => {
                        client.on_timeout();
                        client.state().is_terminal()
                    }
                    _ => false,
                };
                if timed_out {
                    self.deregister(&iface, client_id);
                }
            }
        }
    }

    /// Stop DHCP on an interface.
    ///
    /// Instructs the adapter to clean up its marker file and
    /// deregisters the handle. Does not terminate the external process;
    /// that decision is left to a caller that knows whether this daemon
    /// or the external client owns the interface's future.
    pub async fn stop_negotiation(&mut self, iface: &str) -> Result<()> {
        match self.clients.remove(iface) {
            Some(mut client) => {
                debug!("stopping DHCP client on {iface}");
                client.stop().await
            }
            None => Ok(()),
        }
    }

    /// Read the backend's persisted lease data for `(iface, uuid)`
    pub async fn get_lease_config(&self, iface: &str, uuid: &str) -> Vec<LeaseEntry> {
        self.factory.get_lease_config(iface, uuid).await
    }

    /// Offline lease translation, bypassing the registry entirely.
    ///
    /// Pure function of its inputs; `iface` only labels the log output.
    pub fn test_translate(
        iface: &str,
        options: &LeaseOptions,
        reason: &str,
    ) -> Option<IpConfig> {
        debug!("offline lease translation for {iface} ({reason})");
        lease::options_to_config(options, reason)
    }

    /// Snapshot of the handle registered for `iface`, if any
    pub fn client_info(&self, iface: &str) -> Option<ClientInfo> {
        self.clients.get(iface).map(DhcpClient::info)
    }

    /// Interfaces with a live handle
    pub fn active_interfaces(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Number of live handles
    pub fn active_count(&self) -> usize {
        self.clients.len()
    }

    fn deregister(&mut self, iface: &str, client_id: u64) {
        let matches = self
            .clients
            .get(iface)
            .is_some_and(|c| c.id() == client_id);
        if !matches {
            return;
        }
        if let Some(mut client) = self.clients.remove(iface) {
            // Disconnect the timer before the handle goes away so no
            // in-flight callback re-enters it
            client.disarm_timeout();
            debug!("deregistered DHCP client on {iface}");
        }
        // Stopping the external process is left to the controlling
        // caller: the daemon may quit without terminating the client
    }

    fn effective_settings(&self, settings: &Ip4Settings) -> Ip4Settings {
        let mut settings = settings.clone();
        if settings.send_hostname
            && settings.hostname.is_none()
            && let Some(provider) = &self.hostname_provider
        {
            settings.hostname = provider.hostname();
        }
        settings
    }
}
