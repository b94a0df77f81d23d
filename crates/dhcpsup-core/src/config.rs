//! Configuration types for the DHCP supervisor
//!
//! The backend is a closed set of tagged variants selected once at
//! manager construction; there is no runtime backend registration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default DHCP negotiation timeout, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 45;

/// Manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Which external DHCP client program to supervise
    pub backend: BackendConfig,

    /// Runtime state directory holding per-interface marker files
    /// (`<state-dir>/<backend>-<iface>.pid`) and lease files
    pub state_dir: PathBuf,

    /// Negotiation timeout applied when a start request supplies none
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl ManagerConfig {
    /// Create a configuration for the given backend and state directory
    pub fn new(backend: BackendConfig, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            state_dir: state_dir.into(),
            default_timeout_secs: default_timeout_secs(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(crate::Error::config("state directory cannot be empty"));
        }
        self.backend.validate()
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new(BackendConfig::default(), "/run/dhcpsup")
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Backend selection: one variant per supported external DHCP client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// ISC dhclient
    Dhclient {
        /// Install path of the dhclient binary
        #[serde(default = "default_dhclient_path")]
        path: PathBuf,
    },

    /// dhcpcd
    Dhcpcd {
        /// Install path of the dhcpcd binary
        #[serde(default = "default_dhcpcd_path")]
        path: PathBuf,
    },
}

impl BackendConfig {
    /// Validate the backend configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        let path = match self {
            BackendConfig::Dhclient { path } => path,
            BackendConfig::Dhcpcd { path } => path,
        };
        if path.as_os_str().is_empty() {
            return Err(crate::Error::config(format!(
                "{} binary path cannot be empty",
                self.type_name()
            )));
        }
        Ok(())
    }

    /// Get the backend type name
    pub fn type_name(&self) -> &'static str {
        match self {
            BackendConfig::Dhclient { .. } => "dhclient",
            BackendConfig::Dhcpcd { .. } => "dhcpcd",
        }
    }

    /// Configured install path of the external program
    pub fn path(&self) -> &PathBuf {
        match self {
            BackendConfig::Dhclient { path } => path,
            BackendConfig::Dhcpcd { path } => path,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Dhclient {
            path: default_dhclient_path(),
        }
    }
}

fn default_dhclient_path() -> PathBuf {
    PathBuf::from("/sbin/dhclient")
}

fn default_dhcpcd_path() -> PathBuf {
    PathBuf::from("/sbin/dhcpcd")
}

/// Per-request IPv4 DHCP settings carried into a start request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ip4Settings {
    /// Ask the external client to send a hostname to the DHCP server
    #[serde(default)]
    pub send_hostname: bool,

    /// Literal hostname to send; when absent and `send_hostname` is set,
    /// the manager consults its hostname provider
    #[serde(default)]
    pub hostname: Option<String>,

    /// Optional DHCP client identifier
    #[serde(default)]
    pub client_id: Option<String>,
}
