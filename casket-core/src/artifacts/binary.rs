// casket-core/src/artifacts/binary.rs
//! `binary` stanzas: symlinks into the binary directory.
use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use casket_common::error::{CasketError, Result};
use casket_common::model::artifact::MovedSpec;
use tracing::{debug, info};

use super::{basename, ArtifactContext, PhaseOptions};
use crate::exec::CommandSpec;

const APPDIR_VAR: &str = "$APPDIR";

fn source_path(spec: &MovedSpec, ctx: &ArtifactContext<'_>) -> PathBuf {
    match spec.source.strip_prefix(APPDIR_VAR) {
        Some(rest) => ctx
            .config
            .appdir()
            .join(rest.trim_start_matches('/')),
        None => ctx.staged(&spec.source),
    }
}

fn target_path(spec: &MovedSpec, source: &Path, ctx: &ArtifactContext<'_>) -> PathBuf {
    match spec.target.as_deref() {
        Some(target) => {
            let target = ctx.config.expand_home(target);
            if target.is_absolute() {
                target
            } else {
                ctx.config.binarydir().join(target)
            }
        }
        None => ctx.config.binarydir().join(basename(source)),
    }
}

pub fn link(spec: &MovedSpec, ctx: &ArtifactContext<'_>, _options: PhaseOptions) -> Result<()> {
    let source = source_path(spec, ctx);
    let target = target_path(spec, &source, ctx);

    if !source.exists() {
        return Err(CasketError::CaskError(format!(
            "It seems the symlink source '{}' is not there.",
            source.display()
        )));
    }
    if target.symlink_metadata().is_ok() && !target.is_symlink() {
        return Err(CasketError::CaskError(format!(
            "It seems there is already a Binary at '{}'; not linking.",
            target.display()
        )));
    }

    info!(
        "Linking Binary '{}' to '{}'",
        basename(&source),
        target.display()
    );
    create_link(&source, &target, ctx)?;
    make_executable(&source, ctx)
}

fn create_link(source: &Path, target: &Path, ctx: &ArtifactContext<'_>) -> Result<()> {
    let native = (|| -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if target.is_symlink() {
            fs::remove_file(target)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(source, target)?;
        #[cfg(not(unix))]
        fs::copy(source, target).map(|_| ())?;
        Ok(())
    })();
    match native {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!("Linking {} needs sudo", target.display());
            ctx.executor.run(
                &CommandSpec::new("/bin/ln")
                    .args(["-h", "-f", "-s", "--"])
                    .arg(source)
                    .arg(target)
                    .sudo(true)
                    .must_succeed(true),
            )?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn make_executable(source: &Path, ctx: &ArtifactContext<'_>) -> Result<()> {
    let metadata = fs::metadata(source)?;
    let mode = metadata.permissions().mode();
    if mode & 0o111 == 0o111 {
        return Ok(());
    }
    let mut permissions = metadata.permissions();
    permissions.set_mode(mode | 0o111);
    match fs::set_permissions(source, permissions) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            ctx.executor.run(
                &CommandSpec::new("/bin/chmod")
                    .args(["+x", "--"])
                    .arg(source)
                    .sudo(true)
                    .must_succeed(true),
            )?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn make_executable(_source: &Path, _ctx: &ArtifactContext<'_>) -> Result<()> {
    Ok(())
}

/// Removes the link; anything that is not a symlink is left alone.
pub fn unlink(spec: &MovedSpec, ctx: &ArtifactContext<'_>) -> Result<()> {
    let source = source_path(spec, ctx);
    let target = target_path(spec, &source, ctx);
    if !target.is_symlink() {
        debug!("No Binary link at {}", target.display());
        return Ok(());
    }
    info!("Unlinking Binary '{}'", target.display());
    match fs::remove_file(&target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            ctx.fs().gain_permissions_remove(&target)
        }
        Err(e) => Err(e.into()),
    }
}
