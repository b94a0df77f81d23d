// # Process Spawner Trait
//
// The process-creation boundary the adapters depend on. The core never
// waits on children: spawn returns immediately with a process identity
// or an error, and all further progress arrives through the event
// transport.
//
// ## Implementations
//
// - [`SystemSpawner`](crate::process::SystemSpawner): real processes
// - Test doubles live with the contract tests

use std::ffi::OsString;
use std::io;
use std::path::Path;

/// Process identity of a supervised external client
pub type Pid = u32;

/// Trait for process-creation implementations
pub trait ProcessSpawner: Send + Sync {
    /// Launch `program` with `args`, detached from this daemon's
    /// process group.
    ///
    /// The child must be placed in its own process group immediately
    /// after creation so signals aimed at this daemon's group never
    /// reach it.
    ///
    /// # Returns
    ///
    /// - `Ok(Pid)`: the new process identity (fire-and-forget)
    /// - `Err(io::Error)`: OS-level creation failure
    fn spawn(&self, program: &Path, args: &[OsString]) -> io::Result<Pid>;

    /// Deliver SIGTERM to `pid`
    fn terminate(&self, pid: Pid) -> io::Result<()>;

    /// Whether a process with identity `pid` currently exists
    fn is_running(&self, pid: Pid) -> bool;
}
