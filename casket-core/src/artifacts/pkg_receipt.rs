// casket-core/src/artifacts/pkg_receipt.rs
//! Removal of files recorded in macOS package receipts (`pkgutil`).
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::exec::{CommandExecutor, CommandSpec};
use crate::helpers;

const PKGUTIL: &str = "/usr/sbin/pkgutil";

#[derive(Debug, Deserialize)]
struct ReceiptInfo {
    volume: String,
    #[serde(rename = "install-location")]
    install_location: String,
}

/// Paths owned by a receipt, grouped by how they are removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReceiptPaths {
    pub files: Vec<PathBuf>,
    /// Symlinks and device nodes.
    pub specials: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
}

pub struct PkgReceipt<'a> {
    pub package_id: String,
    executor: &'a dyn CommandExecutor,
    config: &'a Config,
}

impl<'a> PkgReceipt<'a> {
    pub fn new(package_id: impl Into<String>, executor: &'a dyn CommandExecutor, config: &'a Config) -> Self {
        Self {
            package_id: package_id.into(),
            executor,
            config,
        }
    }

    /// Receipts whose id matches the `pkgutil` regular expression.
    pub fn all_matching(
        regex: &str,
        executor: &'a dyn CommandExecutor,
        config: &'a Config,
    ) -> Result<Vec<Self>> {
        let output = executor.run(
            &CommandSpec::new(PKGUTIL)
                .arg(format!("--pkgs={regex}"))
                .must_succeed(false),
        )?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| Self::new(id, executor, config))
            .collect())
    }

    /// Directory the package was installed relative to.
    pub fn root(&self) -> Result<PathBuf> {
        let output = self.executor.run(
            &CommandSpec::new(PKGUTIL)
                .arg("--pkg-info-plist")
                .arg(&self.package_id)
                .must_succeed(true),
        )?;
        let info: ReceiptInfo = plist::from_bytes(output.stdout.as_bytes()).map_err(|e| {
            CasketError::Generic(format!(
                "Failed to parse receipt info for {}: {}",
                self.package_id, e
            ))
        })?;
        Ok(Path::new(&info.volume).join(info.install_location.trim_start_matches('/')))
    }

    /// Every existing, deletable path the receipt lists.
    pub fn paths(&self, root: &Path) -> Result<ReceiptPaths> {
        let output = self.executor.run(
            &CommandSpec::new(PKGUTIL)
                .arg("--files")
                .arg(&self.package_id)
                .must_succeed(true),
        )?;
        let mut paths = ReceiptPaths::default();
        for line in output.stdout.lines().filter(|l| !l.is_empty()) {
            let path = root.join(line);
            if helpers::is_undeletable(&path, self.config) {
                continue;
            }
            let Ok(metadata) = path.symlink_metadata() else {
                continue;
            };
            let file_type = metadata.file_type();
            if is_special(&file_type) {
                paths.specials.push(path);
            } else if file_type.is_dir() {
                paths.dirs.push(path);
            } else if file_type.is_file() {
                paths.files.push(path);
            }
        }
        Ok(paths)
    }

    pub fn uninstall(&self) -> Result<()> {
        let root = self.root()?;
        let paths = self.paths(&root)?;

        if !paths.files.is_empty() {
            debug!("Deleting pkg files");
            self.remove_all(&paths.files)?;
        }
        if !paths.specials.is_empty() {
            debug!("Deleting pkg symlinks and special files");
            self.remove_all(&paths.specials)?;
        }
        if !paths.dirs.is_empty() {
            debug!("Deleting pkg directories");
            let mut dirs = paths.dirs;
            dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
            for dir in &dirs {
                self.with_full_permissions(dir, |d| {
                    self.clean_broken_symlinks(d)?;
                    self.clean_ds_store(d)?;
                    self.rmdir(d)
                })?;
            }
        }
        if !helpers::is_undeletable(&root, self.config) {
            self.rmdir(&root)?;
        }
        self.forget()
    }

    pub fn forget(&self) -> Result<()> {
        debug!("Forgetting receipt {}", self.package_id);
        self.executor.run(
            &CommandSpec::new(PKGUTIL)
                .arg("--forget")
                .arg(&self.package_id)
                .sudo(true)
                .must_succeed(true),
        )?;
        Ok(())
    }

    fn remove_all(&self, paths: &[PathBuf]) -> Result<()> {
        let input = paths
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join("\0");
        self.executor.run(
            &CommandSpec::new("/usr/bin/xargs")
                .args(["-0", "--", "/bin/rm", "--"])
                .input(input)
                .sudo(true)
                .must_succeed(true),
        )?;
        Ok(())
    }

    fn rm(&self, path: &Path) -> Result<()> {
        self.executor.run(
            &CommandSpec::new("/bin/rm")
                .args(["-f", "--"])
                .arg(path)
                .sudo(true)
                .must_succeed(true),
        )?;
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> Result<()> {
        let empty = fs::read_dir(path).map(|mut e| e.next().is_none()).unwrap_or(false);
        if !empty {
            return Ok(());
        }
        if path.is_symlink() {
            return self.rm(path);
        }
        self.executor.run(
            &CommandSpec::new("/bin/rmdir")
                .arg("--")
                .arg(path)
                .sudo(true)
                .must_succeed(true),
        )?;
        Ok(())
    }

    fn clean_broken_symlinks(&self, dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if path.is_symlink() && !path.exists() {
                self.rm(&path)?;
            }
        }
        Ok(())
    }

    fn clean_ds_store(&self, dir: &Path) -> Result<()> {
        let ds_store = dir.join(".DS_Store");
        if ds_store.exists() {
            self.rm(&ds_store)?;
        }
        Ok(())
    }

    /// Opens `dir` up to mode 777 around `op`, then puts its mode and flags
    /// back if it still exists.
    fn with_full_permissions<F>(&self, dir: &Path, op: F) -> Result<()>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let original_mode = mode_of(dir);
        let original_flags = self
            .executor
            .run(
                &CommandSpec::new("/usr/bin/stat")
                    .args(["-f", "%Of", "--"])
                    .arg(dir)
                    .must_succeed(true),
            )?
            .stdout
            .trim()
            .to_string();
        self.executor.run(
            &CommandSpec::new("/bin/chmod")
                .args(["--", "777"])
                .arg(dir)
                .sudo(true)
                .must_succeed(true),
        )?;

        let result = op(dir);

        if helpers::path_occupied(dir) {
            let restore = [
                CommandSpec::new("/bin/chmod")
                    .arg("--")
                    .arg(format!("{original_mode:o}"))
                    .arg(dir),
                CommandSpec::new("/usr/bin/chflags")
                    .arg("--")
                    .arg(&original_flags)
                    .arg(dir),
            ];
            for spec in restore {
                match self.executor.run(&spec.sudo(true).must_succeed(true)) {
                    Ok(_) => {}
                    Err(e) => warn!("Failed to restore permissions of {}: {}", dir.display(), e),
                }
            }
        }
        result
    }
}

#[cfg(unix)]
fn is_special(file_type: &fs::FileType) -> bool {
    file_type.is_symlink() || file_type.is_char_device() || file_type.is_block_device()
}

#[cfg(not(unix))]
fn is_special(file_type: &fs::FileType) -> bool {
    file_type.is_symlink()
}

#[cfg(unix)]
fn mode_of(path: &Path) -> u32 {
    fs::metadata(path)
        .map(|m| m.permissions().mode() % 0o1000)
        .unwrap_or(0o755)
}

#[cfg(not(unix))]
fn mode_of(_path: &Path) -> u32 {
    0o755
}
