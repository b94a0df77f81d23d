//! Error types for the DHCP supervisor
//!
//! Every failure here is scoped to a single interface's negotiation.
//! Nothing in this crate is treated as fatal to the daemon: a failed
//! start is reported to the caller, an asynchronous failure surfaces
//! through the client notification path, and malformed inbound events
//! are logged and dropped.

use thiserror::Error;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DHCP supervisor
#[derive(Error, Debug)]
pub enum Error {
    /// The configured external DHCP client program is not installed
    #[error("DHCP client binary not found: {0}")]
    BackendUnavailable(String),

    /// OS-level process creation failed; never retried automatically
    #[error("failed to spawn DHCP client: {source}")]
    SpawnFailed {
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Inbound event is missing or has unparseable correlation fields
    #[error("malformed DHCP event: {0}")]
    MalformedEvent(String),

    /// Inbound event does not correlate to any registered client
    #[error("no registered client for DHCP event from pid {pid}")]
    UnmatchedEvent {
        /// Process identity claimed by the event
        pid: u32,
    },

    /// Classless-route batch (or other lease payload) was unusable
    #[error("unusable lease data: {0}")]
    MalformedLeaseData(String),

    /// No lease was bound within the caller-supplied duration
    #[error("DHCP negotiation timed out on {iface}")]
    Timeout {
        /// Interface whose negotiation expired
        iface: String,
    },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem or other I/O errors (marker files, lease files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a backend-unavailable error from the missing program path
    pub fn backend_unavailable(path: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable(path.to_string())
    }

    /// Create a spawn-failed error from the underlying OS error
    pub fn spawn_failed(source: std::io::Error) -> Self {
        Self::SpawnFailed { source }
    }

    /// Create a malformed-event error
    pub fn malformed_event(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    /// Create a malformed-lease-data error
    pub fn lease_data(msg: impl Into<String>) -> Self {
        Self::MalformedLeaseData(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a timeout error for an interface
    pub fn timeout(iface: impl Into<String>) -> Self {
        Self::Timeout {
            iface: iface.into(),
        }
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
