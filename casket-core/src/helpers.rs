// casket-core/src/helpers.rs
//! Filesystem operations shared by the artifacts and the installer.
use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};

use casket_common::config::{Config, TargetCategory};
use casket_common::error::{CasketError, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::exec::{CommandExecutor, CommandSpec};

/// System locations that must never be removed, relative to `/`.
const SYSTEM_DIRS: &[&str] = &[
    "/",
    "/Applications",
    "/Applications/Utilities",
    "/Incompatible Software",
    "/Library",
    "/Library/Application Support",
    "/Library/Audio",
    "/Library/Caches",
    "/Library/ColorPickers",
    "/Library/ColorSync",
    "/Library/Components",
    "/Library/Contextual Menu Items",
    "/Library/Dictionaries",
    "/Library/Extensions",
    "/Library/Filesystems",
    "/Library/Fonts",
    "/Library/Frameworks",
    "/Library/Input Methods",
    "/Library/Internet Plug-Ins",
    "/Library/Keychains",
    "/Library/LaunchAgents",
    "/Library/LaunchDaemons",
    "/Library/Logs",
    "/Library/Modem Scripts",
    "/Library/Perl",
    "/Library/PreferencePanes",
    "/Library/Preferences",
    "/Library/Printers",
    "/Library/PrivilegedHelperTools",
    "/Library/QuickLook",
    "/Library/QuickTime",
    "/Library/Receipts",
    "/Library/Screen Savers",
    "/Library/ScriptingAdditions",
    "/Library/Scripts",
    "/Library/Security",
    "/Library/Speech",
    "/Library/Spotlight",
    "/Library/StartupItems",
    "/Library/Updates",
    "/Library/WebServer",
    "/Network",
    "/System",
    "/Users",
    "/Volumes",
    "/bin",
    "/cores",
    "/dev",
    "/etc",
    "/home",
    "/net",
    "/opt",
    "/private",
    "/private/etc",
    "/private/tmp",
    "/private/var",
    "/sbin",
    "/tmp",
    "/usr",
    "/usr/bin",
    "/usr/include",
    "/usr/lib",
    "/usr/libexec",
    "/usr/local",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/share",
    "/var",
];

/// Home locations that must never be removed, relative to `~`.
const HOME_DIRS: &[&str] = &[
    "",
    "Applications",
    "Desktop",
    "Documents",
    "Downloads",
    "Library",
    "Library/Application Support",
    "Library/Audio",
    "Library/Caches",
    "Library/ColorPickers",
    "Library/Containers",
    "Library/Dictionaries",
    "Library/Fonts",
    "Library/Input Methods",
    "Library/Internet Plug-Ins",
    "Library/LaunchAgents",
    "Library/Logs",
    "Library/PreferencePanes",
    "Library/Preferences",
    "Library/QuickLook",
    "Library/Screen Savers",
    "Library/Services",
    "Movies",
    "Music",
    "Pictures",
    "Public",
];

/// Lexically normalises `path`: drops `.` and trailing separators.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Whether `path` is a protected system, home or casket directory.
pub fn is_undeletable(path: &Path, config: &Config) -> bool {
    let path = normalize(path);
    if SYSTEM_DIRS.iter().any(|d| path == Path::new(d)) {
        return true;
    }
    if HOME_DIRS.iter().any(|d| path == normalize(&config.home.join(d))) {
        return true;
    }
    let mut protected = vec![
        config.prefix.clone(),
        config.caskroom_dir(),
        config.prefix.join("bin"),
    ];
    protected.extend(
        TargetCategory::ALL
            .into_iter()
            .map(|c| config.target_dir(c).to_path_buf()),
    );
    protected.iter().any(|p| normalize(p) == path)
}

/// Whether anything, including a dangling symlink, exists at `path`.
pub fn path_occupied(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// `true` when the path contains a `..` component.
pub fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

/// Removes a file, symlink or directory tree without escalating.
pub fn remove_native(path: &Path) -> io::Result<()> {
    let metadata = match path.symlink_metadata() {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.file_type().is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Recursively copies `from` to `to`, keeping symlinks and permissions.
pub fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    let metadata = from.symlink_metadata()?;
    if !metadata.file_type().is_dir() {
        return copy_entry(from, to, &metadata);
    }
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let dest = to.join(relative);
        let metadata = entry.path().symlink_metadata()?;
        copy_entry(entry.path(), &dest, &metadata)?;
    }
    Ok(())
}

fn copy_entry(from: &Path, to: &Path, metadata: &fs::Metadata) -> io::Result<()> {
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        fs::create_dir_all(to)?;
        fs::set_permissions(to, metadata.permissions())?;
    } else if file_type.is_symlink() {
        #[cfg(unix)]
        unix_fs::symlink(fs::read_link(from)?, to)?;
        #[cfg(not(unix))]
        fs::copy(from, to)?;
    } else {
        fs::copy(from, to)?;
    }
    Ok(())
}

/// Moves `from` to `to`, copying across filesystems when a rename is not
/// possible.
pub fn move_native(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                "Rename across devices, copying {} to {}",
                from.display(),
                to.display()
            );
            copy_recursive(from, to)?;
            remove_native(from)
        }
        Err(e) => Err(e),
    }
}

/// Removes `.DS_Store` and then `path` itself when the directory is empty.
/// Returns whether the directory is gone.
pub fn rmdir_if_possible(path: &Path) -> bool {
    if !path.is_dir() || path.is_symlink() {
        return !path_occupied(path);
    }
    let ds_store = path.join(".DS_Store");
    if ds_store.is_file() {
        let only_litter = fs::read_dir(path)
            .map(|entries| entries.flatten().count() == 1)
            .unwrap_or(false);
        if only_litter {
            let _ = fs::remove_file(&ds_store);
        }
    }
    match fs::remove_dir(path) {
        Ok(()) => {
            debug!("Removed empty directory {}", path.display());
            true
        }
        Err(e) => {
            debug!("Leaving directory {}: {}", path.display(), e);
            false
        }
    }
}

/// Filesystem helper that escalates through a [`CommandExecutor`].
pub struct FsHelper<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> FsHelper<'a> {
    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }

    fn type_args(path: &Path) -> Vec<&'static str> {
        match path.symlink_metadata() {
            Ok(m) if m.file_type().is_symlink() => vec!["-h"],
            Ok(m) if m.file_type().is_dir() => vec!["-R"],
            _ => Vec::new(),
        }
    }

    /// Runs `op`, widening permissions and then taking ownership of `path`
    /// between retries.
    pub fn gain_permissions<F>(&self, path: &Path, mut op: F) -> Result<()>
    where
        F: FnMut(&Path) -> Result<()>,
    {
        let mut tried_permissions = false;
        let mut tried_ownership = false;
        loop {
            let err = match op(path) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            let args = Self::type_args(path);
            if !tried_permissions {
                debug!("Widening permissions on {} after: {}", path.display(), err);
                for (exe, extra) in [
                    ("/usr/bin/chflags", vec!["--", "000"]),
                    ("/bin/chmod", vec!["--", "u+rwx"]),
                    ("/bin/chmod", vec!["-N"]),
                ] {
                    let spec = CommandSpec::new(exe)
                        .args(args.iter().copied())
                        .args(extra)
                        .arg(path);
                    if let Err(e) = self.executor.run(&spec) {
                        debug!("{} failed: {}", spec.display(), e);
                    }
                }
                tried_permissions = true;
                continue;
            }
            if !tried_ownership {
                debug!("Taking ownership of {} after: {}", path.display(), err);
                let spec = CommandSpec::new("/usr/sbin/chown")
                    .args(args.iter().copied())
                    .arg("--")
                    .arg(current_user())
                    .arg(path)
                    .sudo(true);
                if let Err(e) = self.executor.run(&spec) {
                    debug!("{} failed: {}", spec.display(), e);
                }
                tried_ownership = true;
                tried_permissions = false;
                continue;
            }
            return Err(err);
        }
    }

    /// Removes `path` whatever its permissions, escalating as needed.
    pub fn gain_permissions_remove(&self, path: &Path) -> Result<()> {
        if !path_occupied(path) {
            return Ok(());
        }
        self.gain_permissions(path, |p| self.remove_once(p))
    }

    fn remove_once(&self, path: &Path) -> Result<()> {
        match remove_native(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!(
                    "Direct removal of {} denied, trying with sudo",
                    path.display()
                );
                self.executor.run(
                    &CommandSpec::new("/bin/rm")
                        .args(["-R", "-f", "--"])
                        .arg(path)
                        .sudo(true)
                        .must_succeed(true),
                )?;
                if path_occupied(path) {
                    return Err(CasketError::Io(std::sync::Arc::new(e)));
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes `path` unless it is protected.
    pub fn delete(&self, path: &Path, config: &Config) -> Result<()> {
        if is_undeletable(path, config) {
            return Err(CasketError::CaskError(format!(
                "Cannot remove undeletable path '{}'.",
                path.display()
            )));
        }
        self.gain_permissions_remove(path)
    }

    /// Moves `from` to `to`, falling back to a privileged `mv` when the
    /// destination is not writable.
    pub fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    if e.kind() != io::ErrorKind::PermissionDenied {
                        return Err(e.into());
                    }
                    self.executor.run(
                        &CommandSpec::new("/bin/mkdir")
                            .args(["-p", "--"])
                            .arg(parent)
                            .sudo(true)
                            .must_succeed(true),
                    )?;
                }
            }
        }
        match move_native(from, to) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(
                    "Moving {} requires elevated permissions",
                    from.display()
                );
                self.executor.run(
                    &CommandSpec::new("/bin/mv")
                        .arg("--")
                        .arg(from)
                        .arg(to)
                        .sudo(true)
                        .must_succeed(true),
                )?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
