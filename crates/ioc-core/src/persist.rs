//! Durable text format for hutch configs.
//!
//! A config file is TOML: store-level keys first, then one `[[ioc]]` table per
//! IOC in name order. Rendering is deterministic, so a file written here and
//! read back unmodified re-renders to the same bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{Config, DEFAULT_COMMITHOST};
use crate::error::ConfigError;
use crate::paths::{Paths, CONFIG_FILE_NAME};
use crate::types::IocProc;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default = "default_commithost")]
    commithost: String,
    #[serde(default)]
    allow_console: bool,
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default, rename = "ioc")]
    iocs: Vec<IocProc>,
}

fn default_commithost() -> String {
    DEFAULT_COMMITHOST.to_string()
}

/// Parse config text. `origin` only labels errors.
pub fn parse_config(contents: &str, origin: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    Config::from_parts(file.commithost, file.allow_console, file.hosts, file.iocs)
}

/// Render a config in the canonical on-disk form.
pub fn render_config(config: &Config, origin: &Path) -> Result<String, ConfigError> {
    let file = ConfigFile {
        commithost: config.commithost.clone(),
        allow_console: config.allow_console,
        hosts: config.hosts().to_vec(),
        iocs: config.procs().values().cloned().collect(),
    };
    toml::to_string(&file).map_err(|source| ConfigError::Serialize {
        path: origin.to_path_buf(),
        source,
    })
}

fn file_mtime(path: &Path) -> Result<DateTime<Utc>, ConfigError> {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Read a config file, recording its path and modification time.
pub fn read_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let mtime = file_mtime(path)?;
    let body = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&body, path)?;
    Ok(config.with_backing(path.to_path_buf(), mtime))
}

/// Read `path` only if it changed since `last_mtime`.
pub fn read_config_if_changed(
    path: impl AsRef<Path>,
    last_mtime: Option<DateTime<Utc>>,
) -> Result<Option<Config>, ConfigError> {
    let path = path.as_ref();
    if let Some(last) = last_mtime {
        if file_mtime(path)? == last {
            debug!(path = %path.display(), "config unchanged since last read");
            return Ok(None);
        }
    }
    read_config(path).map(Some)
}

pub fn read_hutch_config(paths: &Paths, hutch: &str) -> Result<Config, ConfigError> {
    read_config(paths.config_file(hutch))
}

/// Validate and atomically replace `dest` with the rendered config.
///
/// Nothing is written when validation or rendering fails, and a failure
/// while writing leaves any previous file at `dest` in place.
pub fn write_config(dest: impl AsRef<Path>, config: &Config) -> Result<(), ConfigError> {
    let dest = dest.as_ref();
    config.validate()?;
    let body = render_config(config, dest)?;

    let write_err = |source: std::io::Error| ConfigError::Write {
        path: dest.to_path_buf(),
        source,
    };
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(body.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    set_shared_permissions(tmp.path()).map_err(write_err)?;
    tmp.persist(dest).map_err(|err| write_err(err.error))?;

    info!(path = %dest.display(), iocs = config.len(), "wrote config");
    Ok(())
}

#[cfg(unix)]
fn set_shared_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o664))
}

#[cfg(not(unix))]
fn set_shared_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl Config {
    /// Write back to the backing file and refresh the recorded mtime.
    pub fn save(&mut self) -> Result<(), ConfigError> {
        let Some(path) = self.path().map(Path::to_path_buf) else {
            return Err(ConfigError::Write {
                path: PathBuf::new(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "config has no backing file",
                ),
            });
        };
        write_config(&path, self)?;
        let mtime = file_mtime(&path)?;
        self.set_backing(path, mtime);
        Ok(())
    }

    /// True when the backing file changed on disk since it was read or saved.
    pub fn is_stale(&self) -> bool {
        match (self.path(), self.mtime()) {
            (Some(path), Some(mtime)) => file_mtime(path).map_or(true, |now| now != mtime),
            _ => false,
        }
    }
}

/// Hutches with a config file under the config root, sorted.
pub fn get_hutch_list(paths: &Paths) -> Result<Vec<String>, ConfigError> {
    let config_dir = paths.config_dir();
    let entries = match fs::read_dir(&config_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ConfigError::ListDir {
                path: config_dir,
                source,
            })
        }
    };

    let mut hutches: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().join(CONFIG_FILE_NAME).is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    hutches.sort();
    Ok(hutches)
}

/// Filter for [`find_iocs`]; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IocQuery {
    pub name: Option<String>,
    pub host: Option<String>,
}

impl IocQuery {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            host: None,
        }
    }

    pub fn by_host(host: impl Into<String>) -> Self {
        Self {
            name: None,
            host: Some(host.into()),
        }
    }

    pub fn and_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn matches(&self, proc: &IocProc) -> bool {
        self.name.as_deref().map_or(true, |name| proc.name == name)
            && self.host.as_deref().map_or(true, |host| proc.host == host)
    }
}

/// Search every hutch config for matching IOCs, as `(hutch, proc)` pairs.
pub fn find_iocs(paths: &Paths, query: &IocQuery) -> Result<Vec<(String, IocProc)>, ConfigError> {
    let mut found = Vec::new();
    for hutch in get_hutch_list(paths)? {
        let config = read_hutch_config(paths, &hutch)?;
        found.extend(
            config
                .procs()
                .values()
                .filter(|proc| query.matches(proc))
                .map(|proc| (hutch.clone(), proc.clone())),
        );
    }
    Ok(found)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    pub(crate) const PYTEST_CFG: &str = r#"commithost = "localhost"
allow_console = true
hosts = ["test-server1", "test-server2"]

[[ioc]]
name = "ioc-counter"
host = "test-server2"
port = 30002
path = "ioc/counter"
disable = false
delay = 0
history = ["ioc/old"]
hard = false

[[ioc]]
name = "ioc-shouter"
host = "test-server1"
port = 30001
path = "ioc/shouter"
alias = "SHOUTER"
disable = false
delay = 1
history = []
hard = false
"#;

    pub(crate) const SECOND_CFG: &str = r#"hosts = ["test-server3"]

[[ioc]]
name = "ioc-other"
host = "test-server3"
port = 31000
path = "ioc/other"
"#;

    /// Lay out a PYPS_ROOT with three hutches and the support directories.
    pub(crate) fn mk_pyps_root(root: &Path) -> Paths {
        let paths = Paths::with_root(root);
        for (hutch, body) in [
            ("pytest", PYTEST_CFG),
            ("second_hutch", SECOND_CFG),
            ("commit_test", "hosts = []\n"),
        ] {
            fs::create_dir_all(paths.hutch_dir(hutch)).expect("create hutch dir");
            fs::write(paths.config_file(hutch), body).expect("write cfg");
        }
        fs::create_dir_all(paths.status_dir("pytest")).expect("create status dir");
        fs::create_dir_all(paths.host_dir()).expect("create host dir");
        paths
    }

    #[test]
    fn read_config_parses_fixture_and_records_mtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = mk_pyps_root(dir.path());
        let cfg_path = paths.config_file("pytest");

        let config = read_config(&cfg_path).expect("read config");

        let on_disk = DateTime::<Utc>::from(
            fs::metadata(&cfg_path)
                .and_then(|meta| meta.modified())
                .expect("mtime"),
        );
        assert_eq!(config.mtime(), Some(on_disk));
        assert_eq!(config.path(), Some(cfg_path.as_path()));

        assert_eq!(
            config.get("ioc-counter"),
            Some(
                &IocProc::new("ioc-counter", "test-server2", 30002, "ioc/counter")
                    .with_history(vec!["ioc/old".to_string()])
            )
        );
        assert_eq!(
            config.get("ioc-shouter"),
            Some(
                &IocProc::new("ioc-shouter", "test-server1", 30001, "ioc/shouter")
                    .with_alias("SHOUTER")
                    .with_delay(1)
            )
        );
        assert_eq!(config.hosts(), ["test-server1", "test-server2"]);
        assert_eq!(config.commithost, "localhost");
        assert!(config.allow_console);
    }

    #[test]
    fn read_hutch_config_resolves_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = mk_pyps_root(dir.path());
        let config = read_hutch_config(&paths, "second_hutch").expect("read hutch");
        assert_eq!(config.len(), 1);
        assert_eq!(config.commithost, DEFAULT_COMMITHOST);
        assert!(!config.allow_console);
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let body = "[[ioc]]\nname = \"a\"\nhost = \"h\"\nport = 1\npath = \"p\"\nflavor = \"x\"\n";
        let err = parse_config(body, Path::new("inline")).expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn malformed_text_is_parse_error() {
        let err = parse_config("this is not a config", Path::new("inline")).expect_err("garbage");
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = parse_config("[[ioc]]\nname = \"a\"\n", Path::new("inline"))
            .expect_err("missing fields");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn duplicate_names_in_file_are_rejected() {
        let body = "[[ioc]]\nname = \"a\"\nhost = \"h\"\nport = 1\npath = \"p\"\n\n\
                    [[ioc]]\nname = \"a\"\nhost = \"h\"\nport = 2\npath = \"p\"\n";
        let err = parse_config(body, Path::new("inline")).expect_err("duplicate");
        assert!(matches!(err, ConfigError::DuplicateName { name } if name == "a"));
    }

    #[test]
    fn unmodified_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = mk_pyps_root(dir.path());
        let first = dir.path().join("first.cfg");
        let second = dir.path().join("second.cfg");

        let config = read_hutch_config(&paths, "pytest").expect("read fixture");
        write_config(&first, &config).expect("write first");
        let reread = read_config(&first).expect("read first");
        write_config(&second, &reread).expect("write second");

        let first_bytes = fs::read(&first).expect("first bytes");
        let second_bytes = fs::read(&second).expect("second bytes");
        assert_eq!(first_bytes, second_bytes);
        assert_eq!(
            fs::read_to_string(&first).expect("first text"),
            PYTEST_CFG,
            "fixture must survive read then write unchanged"
        );
        assert_eq!(reread.procs(), config.procs());
        assert_eq!(reread.hosts(), config.hosts());
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("iocmanager.cfg");

        let mut config = Config::new();
        config.commithost = "localhost".to_string();
        config
            .add_proc(
                IocProc::new("full", "h1", 30001, "ioc/full/R2")
                    .with_alias("FULL")
                    .with_cmd("./run.sh")
                    .with_delay(5)
                    .with_parent("template")
                    .disabled(true),
            )
            .expect("add full");
        config
            .add_proc(IocProc::new("bare", "h2", 30002, ""))
            .expect("add bare");
        config
            .add_proc(IocProc::new("hioc-x", "hioc-x", 0, "").hard(true))
            .expect("add hard");
        let upgraded = config.get("full").cloned().expect("full").with_path("ioc/full/R3");
        config.update_proc(upgraded).expect("upgrade");

        write_config(&dest, &config).expect("write");
        let reread = read_config(&dest).expect("read back");

        assert_eq!(reread.procs(), config.procs());
        assert_eq!(
            reread.get("full").map(|p| p.history.clone()),
            Some(vec!["ioc/full/R2".to_string()])
        );
        assert_eq!(reread.commithost, "localhost");
    }

    #[test]
    fn invalid_config_leaves_no_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = mk_pyps_root(dir.path());
        let dest = dir.path().join("iocmanager.cfg");

        let mut config = read_hutch_config(&paths, "pytest").expect("read fixture");
        config
            .add_proc(IocProc::new("bad_proc1", "some_host", 30010, ""))
            .expect("add first");
        config
            .add_proc(IocProc::new("bad_proc2", "some_host", 30010, ""))
            .expect("add second");

        let err = write_config(&dest, &config).expect_err("duplicate port");
        assert!(matches!(err, ConfigError::DuplicatePort(_)));
        assert!(!dest.exists());
        let leftovers = fs::read_dir(dir.path()).expect("list").count();
        // Only the pyps "config" directory remains.
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("iocmanager.cfg");
        fs::write(&dest, "previous").expect("seed");

        let mut config = Config::new();
        config.add_proc(IocProc::new("a", "h", 1, "")).expect("a");
        config.add_proc(IocProc::new("b", "h", 1, "")).expect("b");

        assert!(write_config(&dest, &config).is_err());
        assert_eq!(fs::read_to_string(&dest).expect("read"), "previous");
    }

    #[test]
    fn changed_detection_uses_recorded_mtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = mk_pyps_root(dir.path());
        let cfg_path = paths.config_file("pytest");

        let config = read_config(&cfg_path).expect("read");
        assert!(!config.is_stale());
        assert!(read_config_if_changed(&cfg_path, config.mtime())
            .expect("check")
            .is_none());

        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000_000);
        fs::File::options()
            .write(true)
            .open(&cfg_path)
            .and_then(|file| file.set_modified(later))
            .expect("touch");

        assert!(config.is_stale());
        let reread = read_config_if_changed(&cfg_path, config.mtime())
            .expect("check")
            .expect("changed");
        assert_eq!(reread.mtime(), Some(DateTime::<Utc>::from(later)));
    }

    #[test]
    fn save_refreshes_mtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = mk_pyps_root(dir.path());
        let mut config = read_hutch_config(&paths, "pytest").expect("read");
        config
            .add_proc(IocProc::new("ioc-new", "test-server1", 30003, "ioc/new"))
            .expect("add");

        config.save().expect("save");
        assert!(!config.is_stale());
        let reread = read_hutch_config(&paths, "pytest").expect("reread");
        assert!(reread.contains("ioc-new"));

        let mut unsaved = Config::new();
        assert!(matches!(unsaved.save(), Err(ConfigError::Write { .. })));
    }

    #[test]
    fn hutch_list_only_counts_dirs_with_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = mk_pyps_root(dir.path());
        assert_eq!(
            get_hutch_list(&paths).expect("list"),
            ["commit_test", "pytest", "second_hutch"]
        );

        let empty = Paths::with_root(dir.path().join("missing"));
        assert!(get_hutch_list(&empty).expect("list").is_empty());
    }

    #[test]
    fn find_iocs_by_name_and_host() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = mk_pyps_root(dir.path());

        let by_name = find_iocs(&paths, &IocQuery::by_name("ioc-counter")).expect("search");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].0, "pytest");
        assert_eq!(by_name[0].1.host, "test-server2");

        let by_host = find_iocs(&paths, &IocQuery::by_host("test-server1")).expect("search");
        assert_eq!(by_host.len(), 1);
        assert_eq!(by_host[0].1.name, "ioc-shouter");

        let narrowed = find_iocs(
            &paths,
            &IocQuery::by_name("ioc-counter").and_host("test-server1"),
        )
        .expect("search");
        assert!(narrowed.is_empty());

        let everything = find_iocs(&paths, &IocQuery::default()).expect("search");
        assert_eq!(everything.len(), 3);
        assert_eq!(everything[2].0, "second_hutch");
    }
}
