//! Recovery of running IOCs from a hutch status directory.
//!
//! Every supervisor start script writes `<status dir>/<ioc name>` with a single
//! line `<pid> <host> <port> <path>`. Files are written concurrently by many
//! hosts and are never cleaned up by their writers, so a scan also prunes:
//!
//! - a non-empty file that does not parse is deleted
//! - when several files claim the same host and port, only the newest survives
//! - zero-length files are skipped and left in place

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::StatusDirError;
use crate::paths::Paths;
use crate::types::IocStatusFile;

/// Parse the single status line. `None` means the content is malformed.
pub fn parse_status_line(name: &str, contents: &str, mtime: DateTime<Utc>) -> Option<IocStatusFile> {
    let line = contents.lines().next()?;
    let mut fields = line.split_whitespace();
    let (pid, host, port, path) = (fields.next()?, fields.next()?, fields.next()?, fields.next()?);
    if fields.next().is_some() {
        return None;
    }

    Some(IocStatusFile {
        name: name.to_string(),
        host: host.to_string(),
        port: port.parse().ok()?,
        path: path.to_string(),
        pid: pid.parse().ok()?,
        mtime,
    })
}

/// Render the line a supervisor start script would write.
pub fn format_status_line(status: &IocStatusFile) -> String {
    format!(
        "{} {} {} {}\n",
        status.pid, status.host, status.port, status.path
    )
}

enum Entry {
    Parsed(IocStatusFile),
    Empty,
    Malformed,
    Gone,
}

fn load_entry(path: &Path, name: &str) -> Entry {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Entry::Gone,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "cannot read status file");
            return Entry::Gone;
        }
    };
    if contents.is_empty() {
        return Entry::Empty;
    }

    // Stat after reading so the mtime is at least as fresh as the content.
    let mtime = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => DateTime::<Utc>::from(modified),
        Err(err) if err.kind() == ErrorKind::NotFound => return Entry::Gone,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "cannot stat status file");
            return Entry::Gone;
        }
    };

    match std::str::from_utf8(&contents)
        .ok()
        .and_then(|text| parse_status_line(name, text, mtime))
    {
        Some(status) => Entry::Parsed(status),
        None => Entry::Malformed,
    }
}

/// Delete a status file, logging instead of failing.
fn lazy_delete(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(file = %path.display(), error = %err, "failed to delete status file"),
    }
}

/// Scan `dir`, prune stale and corrupt entries, and return the survivors
/// sorted by IOC name.
///
/// Entries are visited in filename order. When two entries for the same host
/// and port carry the same mtime, the one visited first is kept.
pub fn reconcile_status_dir(dir: &Path) -> Result<Vec<IocStatusFile>, StatusDirError> {
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "status directory does not exist yet");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(StatusDirError::ListDir {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut names: Vec<String> = listing
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map_or(true, |kind| !kind.is_dir()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut live: HashMap<(String, u16), IocStatusFile> = HashMap::new();
    for name in names {
        let path = dir.join(&name);
        let status = match load_entry(&path, &name) {
            Entry::Parsed(status) => status,
            Entry::Empty | Entry::Gone => continue,
            Entry::Malformed => {
                info!(file = %path.display(), "deleting malformed status file");
                lazy_delete(&path);
                continue;
            }
        };

        let key = (status.host.clone(), status.port);
        match live.get(&key) {
            Some(current) if current.mtime >= status.mtime => {
                info!(obsolete = %status.name, kept = %current.name, "deleting superseded status file");
                lazy_delete(&path);
            }
            Some(current) => {
                info!(obsolete = %current.name, kept = %status.name, "deleting superseded status file");
                lazy_delete(&dir.join(&current.name));
                live.insert(key, status);
            }
            None => {
                live.insert(key, status);
            }
        }
    }

    let mut survivors: Vec<IocStatusFile> = live.into_values().collect();
    survivors.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(survivors)
}

/// [`reconcile_status_dir`] for a hutch.
pub fn read_status_dir(paths: &Paths, hutch: &str) -> Result<Vec<IocStatusFile>, StatusDirError> {
    reconcile_status_dir(&paths.status_dir(hutch))
}

/// Forget an IOC after its supervisor was shut down.
pub fn remove_status_file(paths: &Paths, hutch: &str, name: &str) {
    lazy_delete(&paths.status_dir(hutch).join(name));
}
