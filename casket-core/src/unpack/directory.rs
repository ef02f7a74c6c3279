// casket-core/src/unpack/directory.rs
use std::fs;
use std::path::{Path, PathBuf};

use casket_common::error::Result;
use tracing::debug;

use super::UnpackStrategy;
use crate::helpers;

/// A directory whose children are merged into the destination.
#[derive(Debug)]
pub struct DirectoryStrategy {
    path: PathBuf,
    /// Move children instead of copying them; used for scratch directories.
    consume: bool,
}

impl DirectoryStrategy {
    pub fn copying(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            consume: false,
        }
    }

    pub fn moving(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            consume: true,
        }
    }
}

impl UnpackStrategy for DirectoryStrategy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &'static str {
        "directory"
    }

    fn extract(&self, to: &Path, _basename: &str) -> Result<()> {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(&self.path)? {
            let from = entry?.path();
            let dest = to.join(from.file_name().unwrap_or_default());
            if helpers::path_occupied(&dest) {
                debug!("Replacing {}", dest.display());
                helpers::remove_native(&dest)?;
            }
            if self.consume {
                helpers::move_native(&from, &dest)?;
            } else {
                helpers::copy_recursive(&from, &dest)?;
            }
        }
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

/// A file staged as-is under the cask's basename.
#[derive(Debug)]
pub struct UncompressedStrategy {
    path: PathBuf,
}

impl UncompressedStrategy {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl UnpackStrategy for UncompressedStrategy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &'static str {
        "uncompressed"
    }

    fn extract(&self, to: &Path, basename: &str) -> Result<()> {
        stage_copy(&self.path, to, basename)
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

/// Installer packages are staged unopened; the `pkg` artifact runs them.
#[derive(Debug)]
pub struct PkgStrategy {
    path: PathBuf,
}

impl PkgStrategy {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl UnpackStrategy for PkgStrategy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &'static str {
        "pkg"
    }

    fn extract(&self, to: &Path, basename: &str) -> Result<()> {
        stage_copy(&self.path, to, basename)
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

fn stage_copy(from: &Path, to: &Path, basename: &str) -> Result<()> {
    fs::create_dir_all(to)?;
    let dest = to.join(basename);
    if helpers::path_occupied(&dest) {
        helpers::remove_native(&dest)?;
    }
    debug!("Staging {} as {}", from.display(), dest.display());
    helpers::copy_recursive(from, &dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_merge_replaces_existing_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("Foo.app")).unwrap();
        fs::write(src.join("Foo.app/new"), b"n").unwrap();
        let to = tmp.path().join("to");
        fs::create_dir_all(to.join("Foo.app")).unwrap();
        fs::write(to.join("Foo.app/old"), b"o").unwrap();

        DirectoryStrategy::copying(&src).extract(&to, "ignored").unwrap();
        assert!(to.join("Foo.app/new").is_file());
        assert!(!to.join("Foo.app/old").exists());
        assert!(src.join("Foo.app/new").is_file());

        DirectoryStrategy::moving(&src).extract(&to, "ignored").unwrap();
        assert!(!src.join("Foo.app").exists());
    }

    #[test]
    fn pkg_is_copied_under_basename() {
        let tmp = tempfile::tempdir().unwrap();
        let pkg = tmp.path().join("download");
        fs::write(&pkg, b"xar!").unwrap();
        let to = tmp.path().join("to");
        PkgStrategy::new(pkg).extract(&to, "Tool.pkg").unwrap();
        assert_eq!(fs::read(to.join("Tool.pkg")).unwrap(), b"xar!");
    }
}
