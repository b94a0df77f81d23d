// # dhcpsup-dhcpcd
//
// dhcpcd backend adapter for the DHCP supervisor.
//
// Implements the `DhcpBackend` and `BackendFactory` traits from
// dhcpsup-core for the dhcpcd program.
//
// ## Differences from the dhclient adapter
//
// - dhcpcd takes everything on the command line; no generated config
//   file
// - dhcpcd keeps no lease database this adapter can read back, so
//   `get_lease_config()` always returns empty
// - dhcpcd has no anycast support; the hint is logged and dropped

use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use dhcpsup_core::config::Ip4Settings;
use dhcpsup_core::error::{Error, Result};
use dhcpsup_core::process::{self, SystemSpawner};
use dhcpsup_core::traits::{BackendFactory, DhcpBackend, LeaseEntry, Pid, ProcessSpawner};

/// Default action script invoked by dhcpcd on lease events
pub const DEFAULT_ACTION_SCRIPT: &str = "/usr/libexec/dhcpsup/dhcpsup-action";

/// Factory for dhcpcd backend adapters
pub struct DhcpcdFactory {
    program: PathBuf,
    state_dir: PathBuf,
    action_script: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
}

impl DhcpcdFactory {
    /// Create a factory spawning real processes
    pub fn new(program: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self::with_spawner(program, state_dir, Arc::new(SystemSpawner))
    }

    /// Create a factory with a caller-supplied spawner (used by tests)
    pub fn with_spawner(
        program: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            program: program.into(),
            state_dir: state_dir.into(),
            action_script: PathBuf::from(DEFAULT_ACTION_SCRIPT),
            spawner,
        }
    }

    /// Override the action script path
    pub fn action_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.action_script = path.into();
        self
    }
}

#[async_trait]
impl BackendFactory for DhcpcdFactory {
    fn create(&self, iface: &str) -> Box<dyn DhcpBackend> {
        Box::new(Dhcpcd {
            iface: iface.to_string(),
            program: self.program.clone(),
            action_script: self.action_script.clone(),
            pid_file: self.state_dir.join(format!("dhcpcd-{iface}.pid")),
            spawner: Arc::clone(&self.spawner),
        })
    }

    async fn get_lease_config(&self, iface: &str, _uuid: &str) -> Vec<LeaseEntry> {
        // dhcpcd keeps its lease state in a format this daemon doesn't
        // read back
        debug!("no readable dhcpcd lease database for {iface}");
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "dhcpcd"
    }
}

/// One dhcpcd process supervised for one interface
pub struct Dhcpcd {
    iface: String,
    program: PathBuf,
    action_script: PathBuf,
    pid_file: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
}

#[async_trait]
impl DhcpBackend for Dhcpcd {
    async fn start(
        &mut self,
        _uuid: &str,
        settings: &Ip4Settings,
        anycast: Option<Ipv4Addr>,
    ) -> Result<Pid> {
        if !self.program.exists() {
            return Err(Error::backend_unavailable(self.program.display()));
        }

        if let Some(anycast) = anycast {
            debug!("dhcpcd has no anycast support, dropping hint {anycast}");
        }

        process::stop_stale_process(&self.pid_file, "dhcpcd", self.spawner.as_ref())?;

        let mut args: Vec<OsString> = vec![
            // Don't background on lease (disable fork())
            "-B".into(),
            // Disable built-in carrier detection
            "-K".into(),
            // Disable built-in IPv4LL
            "-L".into(),
            "-c".into(),
            self.action_script.clone().into(),
        ];
        if settings.send_hostname
            && let Some(hostname) = &settings.hostname
        {
            args.push("-h".into());
            args.push(hostname.clone().into());
        }
        args.push(self.iface.clone().into());

        debug!("spawning {} for {}", self.program.display(), self.iface);
        let pid = self
            .spawner
            .spawn(&self.program, &args)
            .map_err(Error::spawn_failed)?;
        process::write_pid_file(&self.pid_file, pid)?;
        Ok(pid)
    }

    async fn stop(&mut self) -> Result<()> {
        process::remove_pid_file(&self.pid_file)
    }

    fn backend_name(&self) -> &'static str {
        "dhcpcd"
    }

    fn pid_file(&self) -> &Path {
        &self.pid_file
    }
}
