//! Parsing of the banner procServ sends to every new connection.

use serde::{Deserialize, Serialize};

use crate::protocol::{MSG_AUTORESTART_MODE, MSG_BANNER_END, MSG_SHUT_DOWN};
use crate::state::{AutoRestartMode, RunState, SupervisorState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcStatus {
    /// procServ is up and its child is running.
    Running,
    /// procServ is up and its child is stopped.
    Shutdown,
    /// Connected, but no complete banner arrived.
    Error,
    /// Nothing accepted the connection.
    NoConnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerInfo {
    pub status: ProcStatus,
    pub pid: Option<u32>,
    /// Child name procServ was started with.
    pub child: Option<String>,
    pub startup_dir: Option<String>,
    pub mode: AutoRestartMode,
    /// procServ 2.8+ wording ("auto restart mode").
    pub mode_wording: bool,
}

impl BannerInfo {
    fn empty(status: ProcStatus) -> Self {
        Self {
            status,
            pid: None,
            child: None,
            startup_dir: None,
            mode: AutoRestartMode::Off,
            mode_wording: false,
        }
    }

    pub fn no_connect() -> Self {
        Self::empty(ProcStatus::NoConnect)
    }

    pub fn error() -> Self {
        Self::empty(ProcStatus::Error)
    }

    pub fn parse(text: &str) -> Self {
        if !text.contains(MSG_BANNER_END) {
            return Self::error();
        }

        let (status, pid) = if text.contains(MSG_SHUT_DOWN) {
            (ProcStatus::Shutdown, None)
        } else {
            let pid = banner_lines(text)
                .filter(|line| line.starts_with("Child \""))
                .find_map(|line| line.split_once("\" PID: "))
                .and_then(|(_, pid)| pid.trim().parse().ok());
            (ProcStatus::Running, pid)
        };

        let child = banner_lines(text)
            .filter_map(|line| line.strip_prefix("Child \""))
            .find_map(|rest| rest.split_once("\" start"))
            .map(|(name, _)| name.to_string());

        let startup_dir = banner_lines(text)
            .find_map(|line| line.strip_prefix("Server startup directory: "))
            .map(|dir| dir.trim_end().to_string());

        Self {
            status,
            pid,
            child,
            startup_dir,
            mode: parse_mode(text),
            mode_wording: text.contains(MSG_AUTORESTART_MODE),
        }
    }

    /// Modeled supervisor state, when the banner was complete.
    pub fn state(&self) -> Option<SupervisorState> {
        let run = match self.status {
            ProcStatus::Running => RunState::Running,
            ProcStatus::Shutdown => RunState::NotRunning,
            ProcStatus::Error | ProcStatus::NoConnect => return None,
        };
        Some(SupervisorState::new(run, self.mode))
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcStatus::Running
    }
}

/// Banner lines with the `@@@ ` prefix removed.
fn banner_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.trim_start().strip_prefix("@@@ "))
}

fn parse_mode(text: &str) -> AutoRestartMode {
    let announces = |label: &str| {
        text.contains(&format!("auto restart is {label},"))
            || text.contains(&format!("auto restart mode is {label},"))
    };
    if announces("ON") {
        AutoRestartMode::On
    } else if announces("ONESHOT") {
        AutoRestartMode::OneShot
    } else {
        AutoRestartMode::Off
    }
}
