//! Core traits for the DHCP supervisor
//!
//! This module defines the abstract interfaces the core depends on.
//!
//! - [`DhcpBackend`]: one supervised external DHCP client process
//! - [`BackendFactory`]: per-backend construction and lease-config lookup
//! - [`HostnameProvider`]: optional source of the hostname to transmit
//! - [`ProcessSpawner`]: fire-and-forget process creation boundary

pub mod backend;
pub mod hostname;
pub mod spawner;

pub use backend::{BackendFactory, DhcpBackend, LeaseEntry};
pub use hostname::HostnameProvider;
pub use spawner::{Pid, ProcessSpawner};
