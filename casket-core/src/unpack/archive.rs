// casket-core/src/unpack/archive.rs
use std::fs::{self, File};
use std::io::{self, Read, Seek};
#[cfg(unix)]
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use casket_common::error::{CasketError, Result};
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::{debug, error, warn};
use xz2::read::XzDecoder;
use zip::read::ZipArchive;

use super::UnpackStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    /// Reads the magic bytes of `path`.
    fn sniff(path: &Path) -> Result<Self> {
        Ok(match infer::get_from_path(path)?.map(|k| k.extension()) {
            Some("gz") => Compression::Gzip,
            Some("bz2") => Compression::Bzip2,
            Some("xz") => Compression::Xz,
            _ => Compression::None,
        })
    }

    fn reader(self, file: File) -> Box<dyn Read> {
        match self {
            Compression::None => Box::new(file),
            Compression::Gzip => Box::new(GzDecoder::new(file)),
            Compression::Bzip2 => Box::new(BzDecoder::new(file)),
            Compression::Xz => Box::new(XzDecoder::new(file)),
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
            Compression::Xz => ".xz",
        }
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        CasketError::Io(std::sync::Arc::new(io::Error::new(
            e.kind(),
            format!("Failed to open archive {}: {}", path.display(), e),
        )))
    })
}

/// Whether a gzip stream starts with a tar header.
pub(crate) fn gzip_wraps_tar(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut header = [0u8; 512];
    match GzDecoder::new(file).read_exact(&mut header) {
        Ok(()) => &header[257..262] == b"ustar",
        Err(_) => false,
    }
}

/// Joins an archive entry path onto `target_dir`, rejecting anything that
/// would escape it.
fn safe_join(target_dir: &Path, entry_path: &Path, archive: &Path) -> Result<Option<PathBuf>> {
    let mut out = target_dir.to_path_buf();
    let mut any = false;
    for comp in entry_path.components() {
        match comp {
            Component::Normal(p) => {
                out.push(p);
                any = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                error!(
                    "Disallowed component {:?} in path {} from {}",
                    comp,
                    entry_path.display(),
                    archive.display()
                );
                return Err(CasketError::Generic(format!(
                    "Unsafe path '{}' in archive {}",
                    entry_path.display(),
                    archive.display()
                )));
            }
        }
    }
    Ok(any.then_some(out))
}

/// Tar archives, optionally compressed.
#[derive(Debug)]
pub struct TarStrategy {
    path: PathBuf,
    /// `None` means the compression is read from the file when extracting.
    compression: Option<Compression>,
}

impl TarStrategy {
    pub fn new(path: PathBuf, compression: Compression) -> Self {
        Self {
            path,
            compression: Some(compression),
        }
    }

    pub fn sniffed(path: PathBuf) -> Self {
        Self {
            path,
            compression: None,
        }
    }
}

impl UnpackStrategy for TarStrategy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &'static str {
        "tar"
    }

    fn extract(&self, to: &Path, _basename: &str) -> Result<()> {
        let compression = match self.compression {
            Some(c) => c,
            None => Compression::sniff(&self.path)?,
        };
        fs::create_dir_all(to)?;
        let reader = compression.reader(open(&self.path)?);
        extract_tar(reader, to, &self.path)
    }
}

/// Represents a hardlink operation that was deferred.
struct DeferredHardLink {
    link_path: PathBuf,
    target_path: PathBuf,
}

fn extract_tar<R: Read>(reader: R, target_dir: &Path, archive_path: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    debug!("Starting TAR extraction for {}", archive_path.display());

    let mut deferred_hardlinks: Vec<DeferredHardLink> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result.map_err(|e| {
            CasketError::Generic(format!(
                "Error reading TAR entry from {}: {}",
                archive_path.display(),
                e
            ))
        })?;
        let entry_path: PathBuf = entry
            .path()
            .map_err(|e| {
                CasketError::Generic(format!(
                    "Invalid path in TAR entry from {}: {}",
                    archive_path.display(),
                    e
                ))
            })?
            .into_owned();
        let Some(dest) = safe_join(target_dir, &entry_path, archive_path)? else {
            continue;
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        if cfg!(unix) && entry.header().entry_type() == EntryType::Link {
            match entry.link_name() {
                Ok(Some(link_name)) => {
                    if let Some(target_path) = safe_join(target_dir, &link_name, archive_path)? {
                        deferred_hardlinks.push(DeferredHardLink {
                            link_path: dest,
                            target_path,
                        });
                    }
                }
                _ => {
                    let msg = format!(
                        "Hardlink entry '{}' in {} has no link target name.",
                        entry_path.display(),
                        archive_path.display()
                    );
                    warn!("{}", msg);
                    errors.push(msg);
                }
            }
            continue;
        }

        if let Err(e) = entry.unpack(&dest) {
            if e.kind() != io::ErrorKind::AlreadyExists {
                let msg = format!(
                    "Failed to unpack entry {:?} to {}: {}",
                    entry_path,
                    dest.display(),
                    e
                );
                error!("{}", msg);
                errors.push(msg);
            }
        }
    }

    for deferred in deferred_hardlinks {
        if remove_existing(&deferred.link_path).is_err()
            || fs::hard_link(&deferred.target_path, &deferred.link_path).is_err()
        {
            let msg = format!(
                "Failed to create hardlink '{}' -> '{}'",
                deferred.link_path.display(),
                deferred.target_path.display()
            );
            error!("{}", msg);
            errors.push(msg);
        }
    }

    if !errors.is_empty() {
        return Err(CasketError::Generic(format!(
            "Failed during TAR extraction for {} with {} error(s): {}",
            archive_path.display(),
            errors.len(),
            errors.join("; ")
        )));
    }
    debug!("Finished TAR extraction for {}", archive_path.display());
    Ok(())
}

fn remove_existing(path: &Path) -> io::Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Zip archives.
#[derive(Debug)]
pub struct ZipStrategy {
    path: PathBuf,
}

impl ZipStrategy {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl UnpackStrategy for ZipStrategy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &'static str {
        "zip"
    }

    fn extract(&self, to: &Path, _basename: &str) -> Result<()> {
        fs::create_dir_all(to)?;
        extract_zip(open(&self.path)?, to, &self.path)
    }
}

fn extract_zip<R: Read + Seek>(reader: R, target_dir: &Path, archive_path: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(reader).map_err(|e| {
        CasketError::Generic(format!(
            "Failed to open ZIP {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    debug!("Starting ZIP extraction for {}", archive_path.display());

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| {
            CasketError::Generic(format!(
                "Error reading ZIP index {} in {}: {}",
                i,
                archive_path.display(),
                e
            ))
        })?;
        let Some(entry_path) = file.enclosed_name() else {
            debug!("Skipping unsafe ZIP entry name {}", file.name());
            continue;
        };
        let Some(dest) = safe_join(target_dir, &entry_path, archive_path)? else {
            continue;
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        if file.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file.is_symlink() {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let link_target = PathBuf::from(String::from_utf8_lossy(&buf).to_string());
            #[cfg(unix)]
            {
                if dest.symlink_metadata().is_ok() {
                    let _ = fs::remove_file(&dest);
                }
                unix_fs::symlink(&link_target, &dest)?;
            }
            #[cfg(not(unix))]
            warn!(
                "Cannot create symlink on non-unix system: {} -> {}",
                dest.display(),
                link_target.display()
            );
        } else {
            if dest.exists() {
                fs::remove_file(&dest)?;
            }
            let mut out_file = File::create(&dest)?;
            io::copy(&mut file, &mut out_file)?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                if !file.is_symlink() && dest.is_file() {
                    fs::set_permissions(&dest, fs::Permissions::from_mode(mode))?;
                }
            }
        }
    }
    debug!("Finished ZIP extraction for {}", archive_path.display());
    Ok(())
}

/// A single compressed file such as `tool.gz`.
#[derive(Debug)]
pub struct SingleFileStrategy {
    path: PathBuf,
    compression: Compression,
}

impl SingleFileStrategy {
    pub fn new(path: PathBuf, compression: Compression) -> Self {
        Self { path, compression }
    }
}

impl UnpackStrategy for SingleFileStrategy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &'static str {
        match self.compression {
            Compression::None => "uncompressed",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
        }
    }

    fn extract(&self, to: &Path, basename: &str) -> Result<()> {
        fs::create_dir_all(to)?;
        let suffix = self.compression.suffix();
        let name = basename
            .strip_suffix(suffix)
            .filter(|n| !n.is_empty())
            .unwrap_or(basename);
        let dest = to.join(name);
        debug!("Decompressing {} to {}", self.path.display(), dest.display());
        let mut reader = self.compression.reader(open(&self.path)?);
        let mut out = File::create(&dest)?;
        io::copy(&mut reader, &mut out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression as Level;

    use super::*;

    fn write_tar_gz(path: &Path) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Level::default());
        let mut builder = tar::Builder::new(encoder);
        let data = b"hello";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "Tool.app/Contents/MacOS/tool", &data[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extracts_tar_gz_with_sniffed_compression() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("download");
        write_tar_gz(&archive);
        assert!(gzip_wraps_tar(&archive));

        let to = tmp.path().join("out");
        TarStrategy::sniffed(archive).extract(&to, "download").unwrap();
        assert_eq!(
            fs::read(to.join("Tool.app/Contents/MacOS/tool")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn single_gzip_file_drops_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let gz = tmp.path().join("tool.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Level::default());
        encoder.write_all(b"binary").unwrap();
        encoder.finish().unwrap();
        assert!(!gzip_wraps_tar(&gz));

        let to = tmp.path().join("out");
        SingleFileStrategy::new(gz, Compression::Gzip)
            .extract(&to, "tool.gz")
            .unwrap();
        assert_eq!(fs::read(to.join("tool")).unwrap(), b"binary");
    }

    #[test]
    fn rejects_parent_components() {
        let err = safe_join(Path::new("/t"), Path::new("../etc/passwd"), Path::new("a.tar"));
        assert!(err.is_err());
        assert_eq!(
            safe_join(Path::new("/t"), Path::new("./a/b"), Path::new("a.tar")).unwrap(),
            Some(PathBuf::from("/t/a/b"))
        );
    }
}
