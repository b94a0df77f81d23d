// # dhcpsupd - DHCP supervisor daemon
//
// Thin integration layer over dhcpsup-core:
// 1. Reads configuration from environment variables
// 2. Initializes the runtime and the selected backend
// 3. Starts one negotiation per configured interface
// 4. Bridges action-script event datagrams into the manager
//
// All lifecycle logic lives in dhcpsup-core; this binary only wires
// transport, signals, and configuration together.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Backend
// - `DHCPSUP_BACKEND`: External client program (dhclient, dhcpcd)
// - `DHCPSUP_BACKEND_PATH`: Install path override for the program
//
// ### Interfaces
// - `DHCPSUP_INTERFACES`: Comma-separated interfaces to negotiate on
//
// ### Runtime
// - `DHCPSUP_STATE_DIR`: Directory for marker and lease files
// - `DHCPSUP_EVENT_SOCKET`: Unix datagram socket receiving lease
//   events as flat JSON string maps from the action script
// - `DHCPSUP_TIMEOUT_SECS`: Negotiation timeout (0 disables)
// - `DHCPSUP_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export DHCPSUP_BACKEND=dhclient
// export DHCPSUP_INTERFACES=eth0,wlan0
// export DHCPSUP_STATE_DIR=/run/dhcpsup
//
// dhcpsupd
// ```

use anyhow::Result;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UnixDatagram;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use dhcpsup_core::config::{BackendConfig, Ip4Settings, ManagerConfig};
use dhcpsup_core::traits::{BackendFactory, HostnameProvider};
use dhcpsup_core::{DhcpManager, LeaseOptions};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    backend: String,
    backend_path: Option<String>,
    interfaces: Vec<String>,
    state_dir: String,
    event_socket: String,
    timeout_secs: Option<u64>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            backend: env::var("DHCPSUP_BACKEND").unwrap_or_else(|_| "dhclient".to_string()),
            backend_path: env::var("DHCPSUP_BACKEND_PATH").ok(),
            interfaces: env::var("DHCPSUP_INTERFACES")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            state_dir: env::var("DHCPSUP_STATE_DIR").unwrap_or_else(|_| "/run/dhcpsup".to_string()),
            event_socket: env::var("DHCPSUP_EVENT_SOCKET")
                .unwrap_or_else(|_| "/run/dhcpsup/events.sock".to_string()),
            timeout_secs: env::var("DHCPSUP_TIMEOUT_SECS")
                .ok()
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| anyhow::anyhow!("DHCPSUP_TIMEOUT_SECS is not a number: {e}"))?,
            log_level: env::var("DHCPSUP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.backend.as_str() {
            "dhclient" | "dhcpcd" => {}
            _ => anyhow::bail!(
                "DHCPSUP_BACKEND '{}' is not supported. \
                Supported backends: dhclient, dhcpcd",
                self.backend
            ),
        }

        if let Some(path) = &self.backend_path
            && path.is_empty()
        {
            anyhow::bail!("DHCPSUP_BACKEND_PATH cannot be empty when set");
        }

        if self.interfaces.is_empty() {
            anyhow::bail!(
                "DHCPSUP_INTERFACES must contain at least one interface. \
                Set it via: export DHCPSUP_INTERFACES=eth0"
            );
        }
        for iface in &self.interfaces {
            validate_interface_name(iface)?;
        }

        if self.state_dir.is_empty() {
            anyhow::bail!("DHCPSUP_STATE_DIR cannot be empty");
        }
        if self.event_socket.is_empty() {
            anyhow::bail!("DHCPSUP_EVENT_SOCKET cannot be empty");
        }

        if let Some(timeout) = self.timeout_secs
            && timeout > 3600
        {
            anyhow::bail!(
                "DHCPSUP_TIMEOUT_SECS must be at most 3600 (0 disables). Got: {timeout}"
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DHCPSUP_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn backend_config(&self) -> BackendConfig {
        match (self.backend.as_str(), &self.backend_path) {
            ("dhcpcd", Some(path)) => BackendConfig::Dhcpcd { path: path.into() },
            ("dhcpcd", None) => BackendConfig::Dhcpcd {
                path: "/sbin/dhcpcd".into(),
            },
            (_, Some(path)) => BackendConfig::Dhclient { path: path.into() },
            (_, None) => BackendConfig::Dhclient {
                path: "/sbin/dhclient".into(),
            },
        }
    }
}

/// Kernel interface names: non-empty, at most 15 bytes, no separators
fn validate_interface_name(iface: &str) -> Result<()> {
    if iface.is_empty() {
        anyhow::bail!("Interface name cannot be empty");
    }
    if iface.len() > 15 {
        anyhow::bail!("Interface name too long: '{iface}' (max 15 bytes)");
    }
    if iface.contains('/') || iface.contains(char::is_whitespace) {
        anyhow::bail!("Interface name contains invalid characters: '{iface}'");
    }
    Ok(())
}

/// Hostname source backed by the kernel's own record
struct SystemHostname;

impl HostnameProvider for SystemHostname {
    fn hostname(&self) -> Option<String> {
        let raw = std::fs::read_to_string("/proc/sys/kernel/hostname").ok()?;
        let hostname = raw.trim();
        if hostname.is_empty() || hostname == "(none)" {
            return None;
        }
        Some(hostname.to_string())
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    info!("Starting dhcpsupd daemon");
    info!(
        "Backend {}, {} interface(s)",
        config.backend,
        config.interfaces.len()
    );

    // The manager assumes a single control task; current-thread keeps
    // that assumption enforced by construction
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {}", e);
            DaemonExitCode::RuntimeError
        } else {
            DaemonExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    // The external clients are not waited on; let the kernel reap them
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGCHLD,
            nix::sys::signal::SigHandler::SigIgn,
        )?;
    }

    std::fs::create_dir_all(&config.state_dir)?;

    let manager_config = ManagerConfig::new(config.backend_config(), &config.state_dir);
    let factory = build_factory(&manager_config)?;

    let (mut manager, mut notify_rx) = DhcpManager::new(
        manager_config,
        factory,
        Some(Arc::new(SystemHostname) as Arc<dyn HostnameProvider>),
    )?;

    let timeout = config.timeout_secs.map(Duration::from_secs);
    let settings = Ip4Settings {
        send_hostname: true,
        ..Default::default()
    };

    for iface in &config.interfaces {
        let uuid = negotiation_uuid(iface);
        match manager
            .start_negotiation(iface, &uuid, &settings, timeout, None)
            .await
        {
            Ok(info) => info!("negotiating on {iface} (pid {:?})", info.pid),
            Err(e) => warn!("couldn't start DHCP on {iface}: {e}"),
        }
    }
    if manager.active_count() == 0 {
        anyhow::bail!("no interface could be started");
    }

    let socket = bind_event_socket(Path::new(&config.event_socket))?;
    info!("listening for lease events on {}", config.event_socket);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut buf = vec![0u8; 65536];

    let signal_name = loop {
        tokio::select! {
            received = socket.recv(&mut buf) => {
                match received {
                    Ok(len) => handle_datagram(&mut manager, &buf[..len]),
                    Err(e) => warn!("event socket receive failed: {e}"),
                }
            }
            Some(notification) = notify_rx.recv() => {
                debug!("notification: {notification:?}");
                manager.process_notification(notification);
            }
            _ = sigterm.recv() => break "SIGTERM",
            _ = sigint.recv() => break "SIGINT",
        }
    };

    info!("Received shutdown signal: {signal_name}");
    if let Err(e) = std::fs::remove_file(&config.event_socket) {
        warn!("couldn't remove event socket: {e}");
    }
    // External clients keep their leases; the controlling system
    // decides separately whether to tear interfaces down
    info!(
        "Shutting down with {} client(s) left running",
        manager.active_count()
    );

    Ok(())
}

/// Decode one action-script datagram and feed it to the manager.
///
/// The action script reports every lease event as one flat JSON object
/// of strings; anything else is logged and dropped.
fn handle_datagram(manager: &mut DhcpManager, payload: &[u8]) {
    match serde_json::from_slice::<HashMap<String, String>>(payload) {
        Ok(map) => manager.handle_event(&LeaseOptions::from(map)),
        Err(e) => warn!("undecodable lease event datagram: {e}"),
    }
}

fn bind_event_socket(path: &Path) -> Result<UnixDatagram> {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        anyhow::bail!("couldn't remove stale event socket {}: {e}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(UnixDatagram::bind(path)?)
}

/// Correlation token tying lease files to one negotiation run
fn negotiation_uuid(iface: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{iface}-{now}")
}

fn build_factory(config: &ManagerConfig) -> Result<Box<dyn BackendFactory>> {
    let state_dir = PathBuf::from(&config.state_dir);
    match &config.backend {
        #[cfg(feature = "dhclient")]
        BackendConfig::Dhclient { path } => Ok(Box::new(dhcpsup_dhclient::DhclientFactory::new(
            path, state_dir,
        ))),
        #[cfg(feature = "dhcpcd")]
        BackendConfig::Dhcpcd { path } => Ok(Box::new(dhcpsup_dhcpcd::DhcpcdFactory::new(
            path, state_dir,
        ))),
        #[allow(unreachable_patterns)]
        other => anyhow::bail!(
            "backend '{}' is not compiled into this build",
            other.type_name()
        ),
    }
}
