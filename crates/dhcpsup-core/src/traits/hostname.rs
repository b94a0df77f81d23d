//! Hostname provider seam
//!
//! When a start request asks to send a hostname but supplies no literal
//! one, the manager consults this provider. The provider is handed to
//! the manager at construction as an `Arc`, so by construction order it
//! outlives every lookup; there is no weak-reference dance.

/// Source of the hostname to inject into outgoing DHCP requests
pub trait HostnameProvider: Send + Sync {
    /// Current machine hostname, if one is known
    fn hostname(&self) -> Option<String>;
}
