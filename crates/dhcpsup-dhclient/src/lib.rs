// # dhcpsup-dhclient
//
// ISC dhclient backend adapter for the DHCP supervisor.
//
// Implements the `DhcpBackend` and `BackendFactory` traits from
// dhcpsup-core for the ISC dhclient program.
//
// ## Files owned per interface
//
// - `<state-dir>/dhclient-<iface>.pid`: process-identity marker
// - `<state-dir>/dhclient-<iface>.conf`: generated request options
// - `<state-dir>/dhclient-<uuid>-<iface>.lease`: dhclient's own lease
//   database, readable back through `get_lease_config()`
//
// ## Process model
//
// dhclient runs foreground (`-d`) in its own process group and reports
// lease events by invoking the action script with the lease options in
// its environment. Stopping the adapter removes the marker file only;
// the process itself may outlive the daemon.

use std::ffi::OsString;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use dhcpsup_core::config::Ip4Settings;
use dhcpsup_core::error::{Error, Result};
use dhcpsup_core::process::{self, SystemSpawner};
use dhcpsup_core::traits::{BackendFactory, DhcpBackend, LeaseEntry, Pid, ProcessSpawner};

/// Default action script invoked by dhclient on lease events
pub const DEFAULT_ACTION_SCRIPT: &str = "/usr/libexec/dhcpsup/dhcpsup-action";

/// Factory for dhclient backend adapters
pub struct DhclientFactory {
    program: PathBuf,
    state_dir: PathBuf,
    action_script: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
}

impl DhclientFactory {
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
impl BackendFactory for DhclientFactory {
    fn create(&self, iface: &str) -> Box<dyn DhcpBackend> {
        Box::new(Dhclient {
            iface: iface.to_string(),
            program: self.program.clone(),
            state_dir: self.state_dir.clone(),
            action_script: self.action_script.clone(),
            pid_file: self.state_dir.join(format!("dhclient-{iface}.pid")),
            spawner: Arc::clone(&self.spawner),
        })
    }

    async fn get_lease_config(&self, iface: &str, uuid: &str) -> Vec<LeaseEntry> {
        let path = lease_file_path(&self.state_dir, uuid, iface);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("no dhclient lease file at {}: {e}", path.display());
                return Vec::new();
            }
        };
        parse_lease_file(&contents, Utc::now())
    }

    fn name(&self) -> &'static str {
        "dhclient"
    }
}

/// One dhclient process supervised for one interface
pub struct Dhclient {
    iface: String,
    program: PathBuf,
    state_dir: PathBuf,
    action_script: PathBuf,
    pid_file: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
}

impl Dhclient {
    fn conf_file_path(&self) -> PathBuf {
        self.state_dir.join(format!("dhclient-{}.conf", self.iface))
    }

    /// Write the generated dhclient.conf when the request carries
    /// options dhclient only takes from a config file
    fn write_conf_file(&self, settings: &Ip4Settings) -> Result<Option<PathBuf>> {
        let mut conf = String::new();
        if settings.send_hostname
            && let Some(hostname) = &settings.hostname
        {
            conf.push_str(&format!("send host-name \"{hostname}\";\n"));
        }
        if let Some(client_id) = &settings.client_id {
            conf.push_str(&format!("send dhcp-client-identifier \"{client_id}\";\n"));
        }
        if conf.is_empty() {
            return Ok(None);
        }
        let path = self.conf_file_path();
        fs::write(&path, conf)?;
        Ok(Some(path))
    }
}

#[async_trait]
impl DhcpBackend for Dhclient {
    async fn start(
        &mut self,
        uuid: &str,
        settings: &Ip4Settings,
        anycast: Option<Ipv4Addr>,
    ) -> Result<Pid> {
        if !self.program.exists() {
            return Err(Error::backend_unavailable(self.program.display()));
        }

        process::stop_stale_process(&self.pid_file, "dhclient", self.spawner.as_ref())?;

        let conf_file = self.write_conf_file(settings)?;
        let lease_file = lease_file_path(&self.state_dir, uuid, &self.iface);

        let mut args: Vec<OsString> = vec![
            "-d".into(),
            "-sf".into(),
            self.action_script.clone().into(),
            "-pf".into(),
            self.pid_file.clone().into(),
            "-lf".into(),
            lease_file.into(),
        ];
        if let Some(conf_file) = conf_file {
            args.push("-cf".into());
            args.push(conf_file.into());
        }
        if let Some(anycast) = anycast {
            args.push("-e".into());
            args.push(format!("DHCP_ANYCAST={anycast}").into());
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
        if let Err(e) = fs::remove_file(self.conf_file_path())
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("couldn't remove dhclient conf for {}: {e}", self.iface);
        }
        process::remove_pid_file(&self.pid_file)
    }

    fn backend_name(&self) -> &'static str {
        "dhclient"
    }

    fn pid_file(&self) -> &Path {
        &self.pid_file
    }
}

fn lease_file_path(state_dir: &Path, uuid: &str, iface: &str) -> PathBuf {
    state_dir.join(format!("dhclient-{uuid}-{iface}.lease"))
}

/// Parse dhclient's lease-database format.
///
/// Blocks look like:
///
/// ```text
/// lease {
///   interface "eth0";
///   fixed-address 192.168.1.10;
///   expire 3 2026/09/03 12:00:00;
/// }
/// ```
///
/// Entries whose expiry is in the past are dropped; `expire never`
/// keeps the entry with no expiry. Blocks without a parseable
/// fixed-address are skipped.
fn parse_lease_file(contents: &str, now: DateTime<Utc>) -> Vec<LeaseEntry> {
    let mut entries = Vec::new();
    let mut in_block = false;
    let mut address: Option<Ipv4Addr> = None;
    let mut expires: Option<DateTime<Utc>> = None;
    let mut expired = false;

    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with("lease") && line.ends_with('{') {
            in_block = true;
            address = None;
            expires = None;
            expired = false;
            continue;
        }
        if !in_block {
            continue;
        }
        if line == "}" {
            if let Some(address) = address.take()
                && !expired
            {
                entries.push(LeaseEntry { address, expires });
            }
            in_block = false;
            continue;
        }

        let line = line.trim_end_matches(';');
        if let Some(value) = line.strip_prefix("fixed-address ") {
            match value.trim().parse() {
                Ok(addr) => address = Some(addr),
                Err(_) => warn!("unparseable fixed-address '{value}' in lease file"),
            }
        } else if let Some(value) = line.strip_prefix("expire ") {
            let value = value.trim();
            if value == "never" {
                expires = None;
            } else {
                match parse_expire(value) {
                    Some(when) => {
                        expired = when <= now;
                        expires = Some(when);
                    }
                    None => warn!("unparseable expire '{value}' in lease file"),
                }
            }
        }
    }

    entries
}

/// `expire <weekday> YYYY/MM/DD HH:MM:SS` with the weekday ignored
fn parse_expire(value: &str) -> Option<DateTime<Utc>> {
    let rest = value.split_once(' ')?.1;
    let naive = NaiveDateTime::parse_from_str(rest, "%Y/%m/%d %H:%M:%S").ok()?;
    Some(naive.and_utc())
}
