// casket-common/src/caskroom.rs
//! On-disk install records.
//!
//! ```text
//! <caskroom>/<token>/<version>/...                                   staged payload
//! <caskroom>/<token>/.metadata/<version>/<timestamp>/Casks/<token>.json  definition snapshot
//! ```
//!
//! A version counts as installed while it has both a snapshot and a staged
//! directory. Directories with the upgrade backup suffix are never counted.
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::config::Config;

pub const METADATA_DIR: &str = ".metadata";
pub const SNAPSHOT_SUBDIR: &str = "Casks";
pub const BACKUP_SUFFIX: &str = ".upgrading";

pub fn metadata_master_container_path(config: &Config, token: &str) -> PathBuf {
    config.caskroom_dir().join(token).join(METADATA_DIR)
}

pub fn snapshot_file_name(token: &str) -> String {
    format!("{token}.json")
}

/// Sortable timestamp for a new snapshot directory.
pub fn new_timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S%.3f").to_string()
}

/// Appends the upgrade backup suffix to `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(BACKUP_SUFFIX);
    PathBuf::from(os)
}

fn sorted_dir_names(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", dir.display(), e);
            }
            return Vec::new();
        }
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .collect();
    names.sort();
    names
}

/// Newest timestamp directory under a versioned metadata directory.
pub fn latest_timestamp_dir(metadata_versioned_path: &Path) -> Option<PathBuf> {
    sorted_dir_names(metadata_versioned_path)
        .pop()
        .map(|ts| metadata_versioned_path.join(ts))
}

/// `(version, timestamp)` pairs with a live staged directory, oldest first.
pub fn timestamped_versions(config: &Config, token: &str) -> Vec<(String, String)> {
    let caskroom_path = config.caskroom_dir().join(token);
    let master = metadata_master_container_path(config, token);
    let mut pairs = Vec::new();
    for version in sorted_dir_names(&master) {
        if version.ends_with(BACKUP_SUFFIX) || !caskroom_path.join(&version).is_dir() {
            continue;
        }
        for timestamp in sorted_dir_names(&master.join(&version)) {
            pairs.push((version.clone(), timestamp));
        }
    }
    pairs.sort_by(|a, b| a.1.cmp(&b.1));
    pairs
}

/// Installed versions ordered by when they were installed.
pub fn installed_versions(config: &Config, token: &str) -> Vec<String> {
    let mut versions: Vec<String> = Vec::new();
    for (version, _) in timestamped_versions(config, token).into_iter().rev() {
        if !versions.contains(&version) {
            versions.push(version);
        }
    }
    versions.reverse();
    versions
}

/// Snapshot of the definition used for the most recent install.
pub fn installed_caskfile(config: &Config, token: &str) -> Option<PathBuf> {
    let (version, timestamp) = timestamped_versions(config, token).pop()?;
    let path = metadata_master_container_path(config, token)
        .join(version)
        .join(timestamp)
        .join(SNAPSHOT_SUBDIR)
        .join(snapshot_file_name(token));
    path.is_file().then_some(path)
}

/// Tokens with at least one installed version.
pub fn installed_tokens(config: &Config) -> Vec<String> {
    sorted_dir_names(&config.caskroom_dir())
        .into_iter()
        .filter(|token| !installed_versions(config, token).is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(config: &Config, token: &str, version: &str, ts: &str, staged: bool) {
        let snap = metadata_master_container_path(config, token)
            .join(version)
            .join(ts)
            .join(SNAPSHOT_SUBDIR);
        fs::create_dir_all(&snap).unwrap();
        fs::write(snap.join(snapshot_file_name(token)), "{}").unwrap();
        if staged {
            fs::create_dir_all(config.caskroom_dir().join(token).join(version)).unwrap();
        }
    }

    #[test]
    fn installed_versions_require_staged_dir_and_sort_by_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        record(&config, "foo", "2.0", "20240101000000.000", true);
        record(&config, "foo", "1.0", "20230101000000.000", true);
        record(&config, "foo", "0.9", "20220101000000.000", false);

        assert_eq!(installed_versions(&config, "foo"), vec!["1.0", "2.0"]);
        let caskfile = installed_caskfile(&config, "foo").unwrap();
        assert!(caskfile.ends_with(".metadata/2.0/20240101000000.000/Casks/foo.json"));
        assert_eq!(installed_tokens(&config), vec!["foo".to_string()]);
    }

    #[test]
    fn backup_directories_are_not_installed_versions() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        record(&config, "foo", "1.0.upgrading", "20230101000000.000", true);
        assert!(installed_versions(&config, "foo").is_empty());
        assert!(installed_caskfile(&config, "foo").is_none());
    }

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/c/foo/1.0")),
            PathBuf::from("/c/foo/1.0.upgrading")
        );
    }
}
