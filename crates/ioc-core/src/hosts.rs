use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use tracing::{debug, warn};

use crate::config::Config;
use crate::paths::Paths;
use crate::persist::{get_hutch_list, read_hutch_config};

/// Host to OS label and host to hutch membership, captured once per pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostClassifier {
    os: BTreeMap<String, String>,
    groups: BTreeMap<String, BTreeSet<String>>,
}

/// First non-empty line of `config/.host/<host>`, if any.
fn read_host_os(paths: &Paths, host: &str) -> Option<String> {
    if host.is_empty() || host.contains('/') {
        return None;
    }
    let path = paths.host_dir().join(host);
    match fs::read_to_string(&path) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "cannot read host os entry");
            None
        }
    }
}

/// Resolve OS labels for `hosts`. Hosts without an entry are left out.
pub fn get_host_os<'a>(
    paths: &Paths,
    hosts: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, String> {
    hosts
        .into_iter()
        .filter_map(|host| read_host_os(paths, host).map(|os| (host.to_string(), os)))
        .collect()
}

impl HostClassifier {
    /// Build from every hutch config under `paths` and the host OS table.
    ///
    /// Hutch configs that fail to read are skipped so one broken hutch does
    /// not hide the rest.
    pub fn load(paths: &Paths) -> Self {
        let mut classifier = Self::default();
        let hutches = match get_hutch_list(paths) {
            Ok(hutches) => hutches,
            Err(err) => {
                warn!(error = %err, "cannot list hutches for host classification");
                Vec::new()
            }
        };
        for hutch in hutches {
            match read_hutch_config(paths, &hutch) {
                Ok(config) => classifier.add_hutch(&hutch, &config),
                Err(err) => debug!(hutch = %hutch, error = %err, "skipping unreadable hutch"),
            }
        }

        let hosts: Vec<String> = classifier.groups.keys().cloned().collect();
        classifier.os = get_host_os(paths, hosts.iter().map(String::as_str));
        classifier
    }

    /// Record that `hutch` uses every host listed or assigned in `config`.
    pub fn add_hutch(&mut self, hutch: &str, config: &Config) {
        let assigned = config.procs().values().map(|proc| proc.host.as_str());
        for host in config.hosts().iter().map(String::as_str).chain(assigned) {
            self.groups
                .entry(host.to_string())
                .or_default()
                .insert(hutch.to_string());
        }
    }

    pub fn set_os(&mut self, host: impl Into<String>, os: impl Into<String>) {
        self.os.insert(host.into(), os.into());
    }

    pub fn os(&self, host: &str) -> Option<&str> {
        self.os.get(host).map(String::as_str)
    }

    /// Hutches whose configs mention `host`.
    pub fn hutches(&self, host: &str) -> impl Iterator<Item = &str> {
        self.groups
            .get(host)
            .into_iter()
            .flat_map(|hutches| hutches.iter().map(String::as_str))
    }

    pub fn in_hutch(&self, host: &str, hutch: &str) -> bool {
        self.groups
            .get(host)
            .is_some_and(|hutches| hutches.contains(hutch))
    }

    /// Hosts known to any hutch, sorted.
    pub fn known_hosts(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}
