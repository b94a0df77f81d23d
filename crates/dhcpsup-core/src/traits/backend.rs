// # DHCP Backend Trait
//
// Defines the interface a backend adapter implements for one external
// DHCP client program. Adapters are polymorphic over exactly this
// capability set {start, stop, parse-lease-options}; adding a backend
// means implementing these traits, never touching the manager.
//
// ## Implementations
//
// - ISC dhclient: `dhcpsup-dhclient` crate
// - dhcpcd: `dhcpsup-dhcpcd` crate
//
// ## Division of responsibility
//
// Adapters own the mechanics of one external program: its command line,
// its marker-file convention, its lease-option quirks. They do not own
// termination policy: `stop()` removes the marker file and nothing
// else, so the external process may deliberately outlive this daemon.
// Lifecycle decisions (supersession, timeout, deregistration) belong to
// the manager and the client state machine.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::config::Ip4Settings;
use crate::error::Result;
use crate::lease::{IpConfig, LeaseOptions};
use crate::traits::spawner::Pid;

/// One lease entry recovered from a backend's persisted lease database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseEntry {
    /// Leased address
    pub address: Ipv4Addr,
    /// Expiry time, when the backend records one
    pub expires: Option<chrono::DateTime<chrono::Utc>>,
}

/// Trait for backend adapter implementations
///
/// One instance supervises at most one external process for one
/// interface; the adapter is created per start request by its
/// [`BackendFactory`] and dropped when the manager deregisters the
/// owning client handle.
#[async_trait]
pub trait DhcpBackend: Send {
    /// Construct and launch exactly one external client process.
    ///
    /// Implementations must, in order: verify the configured program
    /// exists (`BackendUnavailable` otherwise), terminate any stale
    /// process recorded in this interface's marker file, then spawn.
    /// Spawning is fire-and-forget; lease progress arrives later as
    /// events. Never retried automatically on `SpawnFailed`.
    ///
    /// # Parameters
    ///
    /// - `uuid`: caller-supplied negotiation correlation token
    /// - `settings`: per-request IPv4 DHCP settings
    /// - `anycast`: optional anycast hint for the client process
    ///
    /// # Returns
    ///
    /// - `Ok(Pid)`: the new process identity
    /// - `Err(Error)`: `BackendUnavailable` or `SpawnFailed`
    async fn start(
        &mut self,
        uuid: &str,
        settings: &Ip4Settings,
        anycast: Option<Ipv4Addr>,
    ) -> Result<Pid>;

    /// Remove this interface's marker file.
    ///
    /// Does NOT terminate the external process; whether the process
    /// should die with this daemon's record of it is decided by a
    /// higher-level caller.
    async fn stop(&mut self) -> Result<()>;

    /// Backend-specific lease-option parsing.
    ///
    /// The default covers the common classless static route handling;
    /// adapters override it when their program reports options under
    /// different conventions.
    fn parse_lease_options(&self, options: &LeaseOptions, config: &mut IpConfig) -> bool {
        crate::lease::process_classless_routes(options, config)
    }

    /// Name of the external program, used in logs and marker-file paths
    fn backend_name(&self) -> &'static str;

    /// Path of this interface's process-identity marker file
    fn pid_file(&self) -> &Path;
}

/// Per-backend construction, resolved once at manager construction.
///
/// The manager holds a single factory value for its whole lifetime; the
/// backend set is closed and selected by configuration.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Create an adapter instance bound to `iface`
    fn create(&self, iface: &str) -> Box<dyn DhcpBackend>;

    /// Read the backend's persisted lease data for `(iface, uuid)`.
    ///
    /// Backend-specific; backends without a readable lease database
    /// return the empty vec.
    async fn get_lease_config(&self, iface: &str, uuid: &str) -> Vec<LeaseEntry>;

    /// Backend name (for logging and marker-file naming)
    fn name(&self) -> &'static str;
}
