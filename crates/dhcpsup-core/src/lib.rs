// # dhcpsup-core
//
// Core library for supervising external DHCP client processes.
//
// ## Architecture Overview
//
// This library provides the core functionality for per-interface DHCP
// lifecycle management:
// - **DhcpBackend / BackendFactory**: Traits adapting one external
//   client program (dhclient, dhcpcd) to a common contract
// - **ProcessSpawner**: Trait isolating process spawn/signal side
//   effects so the core stays testable
// - **DhcpClient**: Per-interface state machine driving one negotiation
//   from spawn to a terminal outcome
// - **DhcpManager**: Registry holding one handle per interface,
//   correlating inbound events by process identity
// - **lease**: Pure translation from raw client-reported key/value
//   options to structured IPv4 configuration
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Lifecycle logic is separate from
//    backend-specific command lines and file formats
// 2. **Single-Threaded Core**: One control task owns the registry; no
//    locking, events processed in arrival order
// 3. **Side Effects at the Seams**: Process and filesystem access go
//    through traits, replaced by doubles in tests
// 4. **Library-First**: The daemon is a thin shell over this crate

pub mod client;
pub mod config;
pub mod error;
pub mod lease;
pub mod manager;
pub mod process;
pub mod traits;

// Re-export core types for convenience
pub use client::{ClientInfo, ClientNotification, DhcpState};
pub use config::{BackendConfig, Ip4Settings, ManagerConfig};
pub use error::{Error, Result};
pub use lease::{IpConfig, Ipv4Route, LeaseOptions};
pub use manager::DhcpManager;
pub use process::SystemSpawner;
pub use traits::{BackendFactory, DhcpBackend, HostnameProvider, LeaseEntry, Pid, ProcessSpawner};
