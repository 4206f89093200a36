//! Per-hutch authorization lists.
//!
//! Three independent files live next to a hutch config:
//!
//! - `iocmanager.auth`: users allowed to apply changes. Missing means nobody.
//! - `iocmanager.nossh`: users denied remote execution. Missing means nobody is denied.
//! - `iocmanager.special`: IOCs anyone may toggle, as `name` or `name:variant,variant`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

use crate::paths::Paths;

/// Allowed variants for one special IOC. An empty set allows any variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialEntry {
    pub variants: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HutchPolicy {
    hutch: String,
    authorized: BTreeSet<String>,
    nossh: BTreeSet<String>,
    special: BTreeMap<String, SpecialEntry>,
}

fn read_lines(path: &Path) -> Option<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Some(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect(),
        ),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "cannot read policy file");
            None
        }
    }
}

pub fn parse_special_line(line: &str) -> (String, SpecialEntry) {
    let (name, variants) = match line.split_once(':') {
        Some((name, variants)) => (name, variants),
        None => (line, ""),
    };
    let variants = variants
        .split(',')
        .map(str::trim)
        .filter(|variant| !variant.is_empty())
        .map(str::to_string)
        .collect();
    (name.trim().to_string(), SpecialEntry { variants })
}

impl HutchPolicy {
    /// Read all three lists for `hutch`. Unreadable files fall back to their
    /// missing-file meaning, so this never fails.
    pub fn load(paths: &Paths, hutch: &str) -> Self {
        let authorized = read_lines(&paths.auth_file(hutch))
            .unwrap_or_default()
            .into_iter()
            .collect();
        let nossh = read_lines(&paths.nossh_file(hutch))
            .unwrap_or_default()
            .into_iter()
            .collect();

        let mut special: BTreeMap<String, SpecialEntry> = BTreeMap::new();
        for line in read_lines(&paths.special_file(hutch)).unwrap_or_default() {
            let (name, entry) = parse_special_line(&line);
            // Repeated names merge; a bare entry anywhere opens every variant.
            match special.get_mut(&name) {
                Some(existing) if existing.variants.is_empty() => {}
                Some(_) if entry.variants.is_empty() => {
                    special.insert(name, entry);
                }
                Some(existing) => existing.variants.extend(entry.variants),
                None => {
                    special.insert(name, entry);
                }
            }
        }

        Self {
            hutch: hutch.to_string(),
            authorized,
            nossh,
            special,
        }
    }

    pub fn hutch(&self) -> &str {
        &self.hutch
    }

    /// May `user` apply changes in this hutch.
    pub fn check_auth(&self, user: &str) -> bool {
        self.authorized.contains(user)
    }

    /// May `user` run commands on this hutch's hosts.
    pub fn check_ssh(&self, user: &str) -> bool {
        !self.nossh.contains(user)
    }

    /// Is `name` listed as special, optionally for a specific `variant`.
    ///
    /// A bare query matches any listed name. A variant query matches a
    /// name-only entry, or an entry that lists that exact variant.
    pub fn check_special(&self, name: &str, variant: Option<&str>) -> bool {
        let Some(entry) = self.special.get(name) else {
            return false;
        };
        match variant {
            None => true,
            Some(_) if entry.variants.is_empty() => true,
            Some(variant) => entry.variants.contains(variant),
        }
    }

    pub fn special(&self) -> &BTreeMap<String, SpecialEntry> {
        &self.special
    }
}

pub fn check_auth(paths: &Paths, user: &str, hutch: &str) -> bool {
    HutchPolicy::load(paths, hutch).check_auth(user)
}

pub fn check_ssh(paths: &Paths, user: &str, hutch: &str) -> bool {
    HutchPolicy::load(paths, hutch).check_ssh(user)
}

pub fn check_special(paths: &Paths, name: &str, hutch: &str, variant: Option<&str>) -> bool {
    HutchPolicy::load(paths, hutch).check_special(name, variant)
}
