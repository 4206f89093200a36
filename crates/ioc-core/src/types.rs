//! Desired and observed records for supervised IOCs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Desired-state record for one IOC, as stored in a hutch config.
///
/// Values are plain data: edits are made on a copy and handed back to
/// [`crate::Config::update_proc`], which owns `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IocProc {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Install/boot directory of the IOC release.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub disable: bool,
    /// Start command override; procServ runs `./st.cmd` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    /// Startup stagger in seconds.
    #[serde(default)]
    pub delay: u32,
    /// Prior values of `path`, most recent last.
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Hardware IOC: booted by its own hardware, never driven through procServ.
    #[serde(default)]
    pub hard: bool,
}

impl IocProc {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            path: path.into(),
            alias: None,
            disable: false,
            cmd: None,
            delay: 0,
            history: Vec::new(),
            parent: None,
            hard: false,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    pub fn with_delay(mut self, delay: u32) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    pub fn disabled(mut self, disable: bool) -> Self {
        self.disable = disable;
        self
    }

    pub fn hard(mut self, hard: bool) -> Self {
        self.hard = hard;
        self
    }

    /// Name shown to operators: the alias when set, else the IOC name.
    pub fn display_name(&self) -> &str {
        match self.alias.as_deref() {
            Some(alias) if !alias.is_empty() => alias,
            _ => &self.name,
        }
    }

    /// Start command handed to procServ.
    pub fn start_command(&self) -> &str {
        match self.cmd.as_deref() {
            Some(cmd) if !cmd.trim().is_empty() => cmd,
            _ => "./st.cmd",
        }
    }

    pub fn placement(&self) -> Placement {
        Placement {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// Where a procServ instance listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Placement {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Observed-state record recovered from one status-directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IocStatusFile {
    /// File name, which is the IOC name the supervisor was started with.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub pid: u32,
    pub mtime: DateTime<Utc>,
}

impl IocStatusFile {
    pub fn placement(&self) -> Placement {
        Placement {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_proc_has_empty_optionals() {
        let proc = IocProc::new("ioc-a", "host", 30001, "ioc/a");
        assert_eq!(proc.alias, None);
        assert_eq!(proc.cmd, None);
        assert_eq!(proc.parent, None);
        assert!(proc.history.is_empty());
        assert!(!proc.disable);
        assert!(!proc.hard);
    }

    #[test]
    fn display_name_prefers_non_empty_alias() {
        let proc = IocProc::new("ioc-a", "host", 30001, "ioc/a");
        assert_eq!(proc.display_name(), "ioc-a");
        assert_eq!(proc.clone().with_alias("").display_name(), "ioc-a");
        assert_eq!(proc.with_alias("SHOUTER").display_name(), "SHOUTER");
    }

    #[test]
    fn start_command_defaults_to_st_cmd() {
        let proc = IocProc::new("ioc-a", "host", 30001, "ioc/a");
        assert_eq!(proc.start_command(), "./st.cmd");
        assert_eq!(proc.with_cmd("./run.sh").start_command(), "./run.sh");
    }

    #[test]
    fn placement_renders_host_and_port() {
        let proc = IocProc::new("ioc-a", "ctl-host-01", 30305, "ioc/a");
        assert_eq!(proc.placement().to_string(), "ctl-host-01:30305");
    }
}
