// casket-core/src/unpack/mod.rs
//! Container detection and extraction.
//!
//! A downloaded container is matched to an [`UnpackStrategy`]; extraction
//! goes through a temporary directory and recurses while the result is a
//! single nested archive.
pub mod archive;
pub mod command;
pub mod directory;
pub mod dmg;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use casket_common::error::{CasketError, Result};
use casket_common::model::cask::ContainerType;
use tracing::debug;

pub use archive::{Compression, SingleFileStrategy, TarStrategy, ZipStrategy};
pub use command::{RarStrategy, SevenZipStrategy};
pub use directory::{DirectoryStrategy, PkgStrategy, UncompressedStrategy};
pub use dmg::DmgStrategy;

use crate::exec::CommandExecutor;
use crate::formula::FormulaManager;
use crate::helpers;

/// Nested archives deeper than this are left as they are.
const MAX_NESTING: usize = 8;

pub trait UnpackStrategy {
    /// The container this strategy extracts.
    fn path(&self) -> &Path;

    /// Short name used in logs, e.g. `zip`.
    fn name(&self) -> &'static str;

    /// Extracts into `to`. `basename` names the result for strategies that
    /// produce a single file.
    fn extract(&self, to: &Path, basename: &str) -> Result<()>;

    /// Terminal strategies are never unpacked further.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Formulae that must be installed before `extract` can run.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }
}

impl std::fmt::Debug for dyn UnpackStrategy + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.path().display())
    }
}

pub trait UnpackDetector {
    fn detect(&self, path: &Path, hint: Option<ContainerType>) -> Result<Box<dyn UnpackStrategy>>;

    /// Extracts `strategy` into `to`, unpacking again while the result is a
    /// single non-directory entry.
    fn extract_nestedly(
        &self,
        strategy: &dyn UnpackStrategy,
        to: &Path,
        basename: &str,
    ) -> Result<()> {
        extract_nestedly_at_depth(self, strategy, to, basename, 0)
    }
}

fn extract_nestedly_at_depth<D: UnpackDetector + ?Sized>(
    detector: &D,
    strategy: &dyn UnpackStrategy,
    to: &Path,
    basename: &str,
    depth: usize,
) -> Result<()> {
    if strategy.is_terminal() {
        return strategy.extract(to, basename);
    }
    let tmp = tempfile::tempdir()?;
    debug!(
        "Extracting {:?} via {}",
        strategy,
        tmp.path().display()
    );
    strategy.extract(tmp.path(), basename)?;

    let children: Vec<PathBuf> = fs::read_dir(tmp.path())?
        .flatten()
        .map(|e| e.path())
        .collect();
    if let [only] = children.as_slice() {
        let is_dir = only
            .symlink_metadata()
            .map(|m| m.file_type().is_dir())
            .unwrap_or(false);
        if !is_dir && depth < MAX_NESTING {
            let inner = detector.detect(only, None)?;
            let inner_name = file_name(only);
            debug!("Found nested container {:?}", inner);
            return extract_nestedly_at_depth(detector, inner.as_ref(), to, &inner_name, depth + 1);
        }
    }
    DirectoryStrategy::moving(tmp.path()).extract(to, basename)
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Picks a strategy from an explicit container type, the file name, or the
/// file's magic bytes, in that order.
pub struct DefaultDetector {
    executor: Arc<dyn CommandExecutor>,
    formulae: Arc<dyn FormulaManager>,
}

impl DefaultDetector {
    pub fn new(executor: Arc<dyn CommandExecutor>, formulae: Arc<dyn FormulaManager>) -> Self {
        Self { executor, formulae }
    }

    fn for_type(&self, path: &Path, kind: ContainerType) -> Box<dyn UnpackStrategy> {
        let path = path.to_path_buf();
        match kind {
            ContainerType::Directory => Box::new(DirectoryStrategy::copying(&path)),
            ContainerType::Zip => Box::new(ZipStrategy::new(path)),
            ContainerType::Tar => Box::new(TarStrategy::sniffed(path)),
            ContainerType::Gzip => Box::new(SingleFileStrategy::new(path, Compression::Gzip)),
            ContainerType::Bzip2 => Box::new(SingleFileStrategy::new(path, Compression::Bzip2)),
            ContainerType::Xz => Box::new(SingleFileStrategy::new(path, Compression::Xz)),
            ContainerType::Dmg => Box::new(DmgStrategy::new(path, Arc::clone(&self.executor))),
            ContainerType::Pkg => Box::new(PkgStrategy::new(path)),
            ContainerType::Rar => Box::new(RarStrategy::new(
                path,
                Arc::clone(&self.executor),
                Arc::clone(&self.formulae),
            )),
            ContainerType::SevenZip => Box::new(SevenZipStrategy::new(
                path,
                Arc::clone(&self.executor),
                Arc::clone(&self.formulae),
            )),
            ContainerType::Naked => Box::new(UncompressedStrategy::new(path)),
        }
    }

    fn from_extension(path: &Path) -> Option<Box<dyn UnpackStrategy>> {
        let name = file_name(path).to_lowercase();
        let tar = |c: Compression| -> Option<Box<dyn UnpackStrategy>> {
            Some(Box::new(TarStrategy::new(path.to_path_buf(), c)))
        };
        let owned = path.to_path_buf();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            return tar(Compression::Gzip);
        }
        if name.ends_with(".tar.bz2") || name.ends_with(".tbz") || name.ends_with(".tbz2") {
            return tar(Compression::Bzip2);
        }
        if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            return tar(Compression::Xz);
        }
        let ext = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        match ext.as_str() {
            "tar" => tar(Compression::None),
            "zip" => Some(Box::new(ZipStrategy::new(owned))),
            "gz" => Some(Box::new(SingleFileStrategy::new(owned, Compression::Gzip))),
            "bz2" => Some(Box::new(SingleFileStrategy::new(owned, Compression::Bzip2))),
            "xz" => Some(Box::new(SingleFileStrategy::new(owned, Compression::Xz))),
            "pkg" | "mpkg" => Some(Box::new(PkgStrategy::new(owned))),
            _ => None,
        }
    }

    fn from_magic(&self, path: &Path) -> Result<Option<Box<dyn UnpackStrategy>>> {
        let Some(kind) = infer::get_from_path(path)? else {
            return Ok(None);
        };
        debug!("Detected file type via content: {}", kind.extension());
        let container = match kind.extension() {
            "zip" => ContainerType::Zip,
            "tar" => ContainerType::Tar,
            "gz" => {
                if archive::gzip_wraps_tar(path) {
                    ContainerType::Tar
                } else {
                    ContainerType::Gzip
                }
            }
            "bz2" => ContainerType::Bzip2,
            "xz" => ContainerType::Xz,
            "rar" => ContainerType::Rar,
            "7z" => ContainerType::SevenZip,
            _ => return Ok(None),
        };
        Ok(Some(self.for_type(path, container)))
    }
}

impl UnpackDetector for DefaultDetector {
    fn detect(&self, path: &Path, hint: Option<ContainerType>) -> Result<Box<dyn UnpackStrategy>> {
        if !helpers::path_occupied(path) {
            return Err(CasketError::UnsupportedContainer(format!(
                "{} does not exist",
                path.display()
            )));
        }
        if let Some(kind) = hint {
            debug!("Using declared container type {:?} for {}", kind, path.display());
            return Ok(self.for_type(path, kind));
        }
        if path.is_dir() {
            return Ok(Box::new(DirectoryStrategy::copying(path)));
        }
        let lower = file_name(path).to_lowercase();
        if lower.ends_with(".dmg") {
            return Ok(self.for_type(path, ContainerType::Dmg));
        }
        if lower.ends_with(".rar") {
            return Ok(self.for_type(path, ContainerType::Rar));
        }
        if lower.ends_with(".7z") {
            return Ok(self.for_type(path, ContainerType::SevenZip));
        }
        if let Some(strategy) = Self::from_extension(path) {
            return Ok(strategy);
        }
        if let Some(strategy) = self.from_magic(path)? {
            return Ok(strategy);
        }
        debug!("No container format recognised for {}, treating as uncompressed", path.display());
        Ok(Box::new(UncompressedStrategy::new(path.to_path_buf())))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::exec::{CommandOutput, CommandSpec};

    struct NoCommands;

    impl CommandExecutor for NoCommands {
        fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            Err(CasketError::Generic(format!("unexpected command {}", spec.display())))
        }
    }

    struct NoFormulae;

    impl FormulaManager for NoFormulae {
        fn is_installed(&self, _name: &str) -> bool {
            false
        }

        fn install(&self, name: &str) -> Result<()> {
            Err(CasketError::Generic(format!("unexpected install of {name}")))
        }

        fn opt_prefix(&self, name: &str) -> PathBuf {
            PathBuf::from("/opt").join(name)
        }
    }

    fn detector() -> DefaultDetector {
        DefaultDetector::new(Arc::new(NoCommands), Arc::new(NoFormulae))
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn detects_by_hint_extension_and_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("a.zip");
        write_zip(&zip_path, &[("x", b"1")]);
        let tgz = tmp.path().join("b.tgz");
        fs::write(&tgz, b"").unwrap();
        let plain = tmp.path().join("tool");
        fs::write(&plain, b"#!/bin/sh\n").unwrap();

        let d = detector();
        assert_eq!(d.detect(&zip_path, None).unwrap().name(), "zip");
        assert_eq!(d.detect(&tgz, None).unwrap().name(), "tar");
        assert_eq!(d.detect(tmp.path(), None).unwrap().name(), "directory");
        assert_eq!(d.detect(&plain, None).unwrap().name(), "uncompressed");
        assert_eq!(
            d.detect(&plain, Some(ContainerType::Naked)).unwrap().name(),
            "uncompressed"
        );
        assert_eq!(d.detect(&zip_path, Some(ContainerType::Pkg)).unwrap().name(), "pkg");
    }

    #[test]
    fn detects_zip_without_extension_by_content() {
        let tmp = tempfile::tempdir().unwrap();
        let download = tmp.path().join("download");
        write_zip(&download, &[("x", b"1")]);
        assert_eq!(detector().detect(&download, None).unwrap().name(), "zip");
    }

    #[test]
    fn nested_zip_is_unpacked_to_its_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let inner = tmp.path().join("inner.zip");
        write_zip(&inner, &[("Foo.app/Contents/Info.plist", b"<plist/>")]);
        let outer = tmp.path().join("outer.zip");
        write_zip(&outer, &[("inner.zip", &fs::read(&inner).unwrap())]);

        let d = detector();
        let to = tmp.path().join("staged");
        let strategy = d.detect(&outer, None).unwrap();
        d.extract_nestedly(strategy.as_ref(), &to, "outer.zip").unwrap();

        assert!(to.join("Foo.app/Contents/Info.plist").is_file());
        assert!(!to.join("inner.zip").exists());
    }

    #[test]
    fn naked_file_is_staged_under_basename() {
        let tmp = tempfile::tempdir().unwrap();
        let download = tmp.path().join("tool--1.0");
        fs::write(&download, b"#!/bin/sh\necho hi\n").unwrap();

        let d = detector();
        let to = tmp.path().join("staged");
        let strategy = d.detect(&download, Some(ContainerType::Naked)).unwrap();
        d.extract_nestedly(strategy.as_ref(), &to, "tool").unwrap();
        assert!(to.join("tool").is_file());
    }
}
