//! Manager-wide tuning read from `config/iocmanager.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use crate::error::SettingsError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    pub procserv: ProcServSettings,
    pub reconcile: ReconcileSettings,
}

/// Highest procmgrd platform number in use; each platform owns two ports.
pub const PROCMGRD_PLATFORMS: u16 = 3;

/// Control-channel timing and launch parameters. Times are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcServSettings {
    pub connect_timeout_ms: u64,
    /// How long to wait for procServ to acknowledge one control byte.
    pub ack_timeout_ms: u64,
    pub settle_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub procmgrd_base_port: u16,
    /// procServ executable used in launch commands.
    pub exe: String,
    /// Per-IOC log files go to `<log_root>/<ioc>/iocInfo/ioc.log`.
    pub log_root: String,
}

impl Default for ProcServSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            ack_timeout_ms: 1_000,
            settle_timeout_ms: 5_000,
            close_timeout_ms: 3_000,
            backoff_initial_ms: 50,
            backoff_max_ms: 500,
            procmgrd_base_port: 39050,
            exe: "procServ".to_string(),
            log_root: "/cds/data/iocData".to_string(),
        }
    }
}

impl ProcServSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// procmgrd control port for a platform number, `None` past `u16::MAX`.
    pub fn procmgrd_port(&self, platform: u16) -> Option<u16> {
        platform
            .checked_sub(1)?
            .checked_mul(2)
            .and_then(|offset| self.procmgrd_base_port.checked_add(offset))
    }

    pub fn log_file(&self, ioc: &str) -> String {
        format!("{}/{ioc}/iocInfo/ioc.log", self.log_root.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub max_parallel_sessions: usize,
    /// A disabled IOC whose status file is younger than this may be crash
    /// looping and is stopped again.
    pub recent_crash_window_secs: u64,
    /// Confirm status-file entries against the live supervisor before planning.
    pub probe_liveness: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            max_parallel_sessions: 8,
            recent_crash_window_secs: 600,
            probe_liveness: true,
        }
    }
}

impl ReconcileSettings {
    pub fn recent_crash_window(&self) -> Duration {
        Duration::from_secs(self.recent_crash_window_secs)
    }
}

pub fn parse_settings(contents: &str) -> Result<ManagerSettings, toml::de::Error> {
    toml::from_str(contents)
}

/// Load settings, falling back to defaults when the file does not exist.
pub fn load_settings(path: impl AsRef<Path>) -> Result<ManagerSettings, SettingsError> {
    let path = path.as_ref();
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ManagerSettings::default()),
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_settings(&contents).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
