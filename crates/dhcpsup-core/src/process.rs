//! Real process creation and marker-file bookkeeping
//!
//! The per-interface marker file (`<state-dir>/<backend>-<iface>.pid`)
//! is the only state shared across daemon restarts. A pre-existing
//! marker is treated as possible evidence of a still-running prior
//! client, which must be terminated before a new one is launched or the
//! two would fight over the interface.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::traits::spawner::{Pid, ProcessSpawner};

/// Spawner backed by the operating system
///
/// Children are detached into their own process group and never reaped
/// here; the daemon ignores SIGCHLD so exited clients do not linger.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl ProcessSpawner for SystemSpawner {
    fn spawn(&self, program: &Path, args: &[OsString]) -> io::Result<Pid> {
        use std::os::unix::process::CommandExt;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            // Own process group: our group signals must not reach the client
            .process_group(0)
            .spawn()?;
        Ok(child.id())
    }

    fn terminate(&self, pid: Pid) -> io::Result<()> {
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        )
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))
    }

    fn is_running(&self, pid: Pid) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }
}

/// Record `pid` in the marker file at `path`
pub fn write_pid_file(path: &Path, pid: Pid) -> Result<()> {
    fs::write(path, format!("{pid}\n"))?;
    Ok(())
}

/// Read a process identity back from a marker file
pub fn read_pid_file(path: &Path) -> Option<Pid> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Remove a marker file; a missing file is not an error
pub fn remove_pid_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Terminate any stale client recorded in `pid_file` and remove the file.
///
/// The recorded pid is only signalled when `/proc/<pid>/comm` still
/// names `binary_name`; pids are reused quickly and the marker may be
/// arbitrarily old.
pub fn stop_stale_process(
    pid_file: &Path,
    binary_name: &str,
    spawner: &dyn ProcessSpawner,
) -> Result<()> {
    let contents = match fs::read_to_string(pid_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if let Ok(pid) = contents.trim().parse::<Pid>() {
        if process_name_matches(pid, binary_name) {
            info!("terminating stale {binary_name} process {pid} from {}", pid_file.display());
            if let Err(e) = spawner.terminate(pid) {
                warn!("failed to terminate stale {binary_name} process {pid}: {e}");
            }
        } else {
            debug!("pid {pid} recorded in {} no longer names {binary_name}", pid_file.display());
        }
    } else {
        warn!("ignoring unparseable marker file {}", pid_file.display());
    }

    remove_pid_file(pid_file)
}

fn process_name_matches(pid: Pid, binary_name: &str) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/comm")) {
        Ok(comm) => comm.trim() == binary_name,
        Err(_) => false,
    }
}
