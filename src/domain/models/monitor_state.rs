use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::domain::models::HostAddress;
use crate::error::{Result, SyncError};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MonitorPhase {
    Initial,
    Steady,
}

/// In-memory record of what the monitor has reconciled so far.
///
/// The scratch file only carries `last_known` across restarts; it is read
/// once on start and written after each successful reconciliation.
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    pub last_known: Option<HostAddress>,
    pub monitor_pid: u32,
    pub dev_server_pid: Option<u32>,
    pub reconciliations: u64,
    pub failures: u64,
    pub last_change_unix: Option<u64>,
}

impl MonitorState {
    pub fn new(monitor_pid: u32) -> Self {
        Self {
            monitor_pid,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        match self.last_known {
            None => MonitorPhase::Initial,
            Some(_) => MonitorPhase::Steady,
        }
    }

    pub fn needs_reconcile(&self, probed: &HostAddress) -> bool {
        self.last_known.as_ref() != Some(probed)
    }

    pub fn record_success(&mut self, address: HostAddress, dev_server_pid: Option<u32>) {
        self.last_known = Some(address);
        self.reconciliations += 1;
        self.last_change_unix = Some(unix_now());
        if dev_server_pid.is_some() {
            self.dev_server_pid = dev_server_pid;
        }
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Reads the scratch file. Missing or unparsable content means no prior address.
    pub fn load_last_known(path: &Path) -> Option<HostAddress> {
        match fs::read_to_string(path) {
            Ok(content) => match content.parse() {
                Ok(address) => Some(address),
                Err(e) => {
                    log::warn!("Ignoring last-known address in {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn persist_last_known(&self, path: &Path) -> Result<()> {
        let Some(address) = self.last_known else {
            return Ok(());
        };
        fs::write(path, format!("{}\n", address)).map_err(|e| SyncError::io(path, e))
    }
}

/// Snapshot published to the status endpoint and the `status` command.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MonitorStatus {
    pub hostname: String,
    pub running: bool,
    pub phase: Option<MonitorPhase>,
    pub host_ip: Option<HostAddress>,
    pub monitor_pid: Option<u32>,
    pub dev_server_pid: Option<u32>,
    pub reconciliations: u64,
    pub failures: u64,
    pub last_change_unix: Option<u64>,
}

impl MonitorStatus {
    pub fn from_state(state: &MonitorState, hostname: String) -> Self {
        Self {
            hostname,
            running: true,
            phase: Some(state.phase()),
            host_ip: state.last_known,
            monitor_pid: Some(state.monitor_pid),
            dev_server_pid: state.dev_server_pid,
            reconciliations: state.reconciliations,
            failures: state.failures,
            last_change_unix: state.last_change_unix,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
