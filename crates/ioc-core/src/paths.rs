//! Filesystem locations shared by the config store, status reconciler and policy lookups.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_PYPS_ROOT: &str = "/cds/group/pcds/pyps";
pub const CONFIG_FILE_NAME: &str = "iocmanager.cfg";

/// Resolved layout of a `PYPS_ROOT` tree.
///
/// ```text
/// $PYPS_ROOT/config/iocmanager.toml         manager settings
/// $PYPS_ROOT/config/<hutch>/iocmanager.cfg  desired state
/// $PYPS_ROOT/config/<hutch>/iocmanager.auth|nossh|special
/// $PYPS_ROOT/config/<hutch>/iocmanager/startProc
/// $PYPS_ROOT/config/.status/<hutch>/<ioc>   published by running supervisors
/// $PYPS_ROOT/config/.host/<host>            first line is the host OS
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from `PYPS_ROOT`, falling back to the site default.
    pub fn from_env() -> Self {
        let root = std::env::var_os("PYPS_ROOT")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PYPS_ROOT));
        Self::with_root(root)
    }

    /// Process-wide default, resolved from the environment on first use.
    pub fn global() -> &'static Paths {
        static GLOBAL: OnceLock<Paths> = OnceLock::new();
        GLOBAL.get_or_init(Paths::from_env)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir().join("iocmanager.toml")
    }

    pub fn hutch_dir(&self, hutch: &str) -> PathBuf {
        self.config_dir().join(hutch)
    }

    pub fn config_file(&self, hutch: &str) -> PathBuf {
        self.hutch_dir(hutch).join(CONFIG_FILE_NAME)
    }

    pub fn auth_file(&self, hutch: &str) -> PathBuf {
        self.hutch_dir(hutch).join("iocmanager.auth")
    }

    pub fn nossh_file(&self, hutch: &str) -> PathBuf {
        self.hutch_dir(hutch).join("iocmanager.nossh")
    }

    pub fn special_file(&self, hutch: &str) -> PathBuf {
        self.hutch_dir(hutch).join("iocmanager.special")
    }

    /// Directory holding the hutch's `startProc` launch script.
    pub fn startup_dir(&self, hutch: &str) -> PathBuf {
        self.hutch_dir(hutch).join("iocmanager")
    }

    pub fn status_dir(&self, hutch: &str) -> PathBuf {
        self.config_dir().join(".status").join(hutch)
    }

    pub fn host_dir(&self) -> PathBuf {
        self.config_dir().join(".host")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_hutch_locations_from_root() {
        let paths = Paths::with_root("/pyps");
        assert_eq!(
            paths.config_file("xpp"),
            PathBuf::from("/pyps/config/xpp/iocmanager.cfg")
        );
        assert_eq!(
            paths.special_file("xpp"),
            PathBuf::from("/pyps/config/xpp/iocmanager.special")
        );
        assert_eq!(
            paths.status_dir("xpp"),
            PathBuf::from("/pyps/config/.status/xpp")
        );
        assert_eq!(paths.host_dir(), PathBuf::from("/pyps/config/.host"));
        assert_eq!(
            paths.startup_dir("xpp"),
            PathBuf::from("/pyps/config/xpp/iocmanager")
        );
        assert_eq!(
            paths.settings_file(),
            PathBuf::from("/pyps/config/iocmanager.toml")
        );
    }

    #[test]
    fn global_is_resolved_once() {
        let first = Paths::global() as *const Paths;
        let second = Paths::global() as *const Paths;
        assert_eq!(first, second);
    }
}
