//! In-memory configuration store for one hutch.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, DuplicatePortError};
use crate::types::IocProc;

pub const DEFAULT_COMMITHOST: &str = "psbuild-rhel7";

/// Port ranges procServ instances are allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRange {
    /// Reserved for IOCs that are not reachable from outside the controls network.
    Closed,
    /// Reserved for IOCs that other networks may talk to.
    Open,
}

impl PortRange {
    pub fn ports(self) -> RangeInclusive<u16> {
        match self {
            Self::Closed => 30001..=38999,
            Self::Open => 39100..=39199,
        }
    }
}

/// Desired state of every IOC in a hutch, keyed by IOC name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    path: Option<PathBuf>,
    mtime: Option<DateTime<Utc>>,
    /// Host that config commits must run on.
    pub commithost: String,
    pub allow_console: bool,
    hosts: Vec<String>,
    procs: BTreeMap<String, IocProc>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            mtime: None,
            commithost: DEFAULT_COMMITHOST.to_string(),
            allow_console: false,
            hosts: Vec::new(),
            procs: BTreeMap::new(),
        }
    }
}

impl Config {
    /// An empty, unsaved store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_backing(mut self, path: PathBuf, mtime: DateTime<Utc>) -> Self {
        self.path = Some(path);
        self.mtime = Some(mtime);
        self
    }

    pub(crate) fn set_backing(&mut self, path: PathBuf, mtime: DateTime<Utc>) {
        self.path = Some(path);
        self.mtime = Some(mtime);
    }

    /// Backing file, if this store was read from or saved to disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Modification time of the backing file when it was last read or written.
    pub fn mtime(&self) -> Option<DateTime<Utc>> {
        self.mtime
    }

    pub fn procs(&self) -> &BTreeMap<String, IocProc> {
        &self.procs
    }

    pub fn get(&self, name: &str) -> Option<&IocProc> {
        self.procs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.procs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Distinct hosts in first-seen order.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Register a host without assigning an IOC to it.
    pub fn add_host(&mut self, host: &str) {
        if !host.is_empty() && !self.hosts.iter().any(|known| known == host) {
            self.hosts.push(host.to_string());
        }
    }

    /// Insert a new IOC. Port conflicts are only checked by [`Config::validate`].
    pub fn add_proc(&mut self, proc: IocProc) -> Result<(), ConfigError> {
        if self.procs.contains_key(&proc.name) {
            return Err(ConfigError::DuplicateName { name: proc.name });
        }
        self.add_host(&proc.host);
        self.procs.insert(proc.name.clone(), proc);
        Ok(())
    }

    /// Replace an existing IOC.
    ///
    /// The stored history is kept; when `path` changes the outgoing path is
    /// appended to it. History on the incoming value is ignored.
    pub fn update_proc(&mut self, proc: IocProc) -> Result<(), ConfigError> {
        let Some(stored) = self.procs.get(&proc.name) else {
            return Err(ConfigError::NotFound { name: proc.name });
        };

        let mut history = stored.history.clone();
        if stored.path != proc.path {
            history.push(stored.path.clone());
        }

        let updated = IocProc { history, ..proc };
        self.add_host(&updated.host);
        self.procs.insert(updated.name.clone(), updated);
        Ok(())
    }

    /// Remove an IOC, returning its last record. Missing names are an error.
    pub fn delete_proc(&mut self, name: &str) -> Result<IocProc, ConfigError> {
        self.procs.remove(name).ok_or_else(|| ConfigError::NotFound {
            name: name.to_string(),
        })
    }

    /// Check that no two enabled IOCs share a host and port.
    pub fn validate(&self) -> Result<(), DuplicatePortError> {
        let mut seen: HashMap<(&str, u16), &str> = HashMap::new();
        for proc in self.procs.values().filter(|proc| !proc.disable) {
            if let Some(first) = seen.insert((proc.host.as_str(), proc.port), &proc.name) {
                return Err(DuplicatePortError {
                    host: proc.host.clone(),
                    port: proc.port,
                    first: first.to_string(),
                    second: proc.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Lowest port in `range` that no IOC on `host` uses, enabled or not.
    pub fn next_free_port(&self, host: &str, range: PortRange) -> Option<u16> {
        let used: Vec<u16> = self
            .procs
            .values()
            .filter(|proc| proc.host == host)
            .map(|proc| proc.port)
            .collect();
        range.ports().find(|port| !used.contains(port))
    }

    /// IOCs configured for `host`, in name order.
    pub fn procs_on_host<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a IocProc> + 'a {
        self.procs.values().filter(move |proc| proc.host == host)
    }

    pub(crate) fn from_parts(
        commithost: String,
        allow_console: bool,
        hosts: Vec<String>,
        procs: Vec<IocProc>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self {
            commithost,
            allow_console,
            ..Self::default()
        };
        for host in &hosts {
            config.add_host(host);
        }
        for proc in procs {
            config.add_proc(proc)?;
        }
        Ok(config)
    }
}
