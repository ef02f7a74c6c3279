// casket-core/src/install/mod.rs
//! The cask installer: fetch, stage, install artifacts, and the reverse.
//!
//! Every step that writes to the Caskroom cleans up after itself when it
//! fails, so a failed install leaves no versioned files behind.
mod dependencies;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use casket_common::caskroom;
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_common::loader::{CaskLoader, TapLoader};
use casket_common::model::{Artifact, Cask, Checksum};
use casket_net::{Downloader, HttpDownloader};
use tracing::{debug, error, info, warn};

use crate::artifacts::{self, moved, ArtifactContext, PhaseOptions};
use crate::exec::{CommandExecutor, CommandSpec, SystemCommand};
use crate::formula::{BrewFormulae, FormulaManager};
use crate::helpers::{self, FsHelper};
use crate::macos::{accessibility, HostSystem, Quarantine, SystemInfo, XattrQuarantine};
use crate::unpack::{DefaultDetector, UnpackDetector};

/// Metadata subdirectories that survive purging a version.
const PERSISTENT_METADATA_SUBDIRS: &[&str] = &["gpg"];

/// The collaborators an install talks to. Tests swap in fakes.
pub struct InstallContext {
    pub config: Config,
    pub executor: Arc<dyn CommandExecutor>,
    pub loader: Arc<dyn CaskLoader>,
    pub downloader: Arc<dyn Downloader>,
    pub detector: Arc<dyn UnpackDetector>,
    pub quarantine: Arc<dyn Quarantine>,
    pub formulae: Arc<dyn FormulaManager>,
    pub system: Arc<dyn SystemInfo>,
}

impl InstallContext {
    /// Context backed by the real machine, taps and network.
    pub fn host(config: Config) -> Self {
        let executor: Arc<dyn CommandExecutor> = Arc::new(SystemCommand);
        let formulae: Arc<dyn FormulaManager> =
            Arc::new(BrewFormulae::new(&config, Arc::clone(&executor)));
        Self {
            loader: Arc::new(TapLoader::new(&config)),
            downloader: Arc::new(HttpDownloader::new(&config)),
            detector: Arc::new(DefaultDetector::new(
                Arc::clone(&executor),
                Arc::clone(&formulae),
            )),
            quarantine: Arc::new(XattrQuarantine),
            system: Arc::new(HostSystem),
            formulae,
            executor,
            config,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub force: bool,
    pub reinstall: bool,
    pub upgrade: bool,
    pub skip_cask_deps: bool,
    pub binaries: bool,
    pub verbose: bool,
    pub require_sha: bool,
    pub quarantine: bool,
    pub installed_as_dependency: bool,
}

impl InstallOptions {
    /// Defaults taken from the configured `binaries`, `require_sha` and
    /// `quarantine` settings.
    pub fn from_config(config: &Config) -> Self {
        Self {
            binaries: config.binaries,
            require_sha: config.require_sha,
            quarantine: config.quarantine,
            ..Default::default()
        }
    }
}

pub struct Installer<'a> {
    cask: Cask,
    ctx: &'a InstallContext,
    options: InstallOptions,
    downloaded_path: Option<PathBuf>,
}

impl<'a> Installer<'a> {
    pub fn new(cask: Cask, ctx: &'a InstallContext, options: InstallOptions) -> Self {
        Self {
            cask,
            ctx,
            options,
            downloaded_path: None,
        }
    }

    /// Installer for the definition `token` was installed from, falling back
    /// to the current definition when no snapshot is readable.
    pub fn for_installed(token: &str, ctx: &'a InstallContext, options: InstallOptions) -> Result<Self> {
        let cask = match ctx.loader.load_installed(token) {
            Ok(cask) => cask,
            Err(e) => {
                debug!("No usable install snapshot for {}: {}", token, e);
                ctx.loader.load(token)?
            }
        };
        Ok(Self::new(cask, ctx, options))
    }

    pub fn cask(&self) -> &Cask {
        &self.cask
    }

    pub fn options(&self) -> InstallOptions {
        self.options
    }

    pub fn downloaded_path(&self) -> Option<&Path> {
        self.downloaded_path.as_deref()
    }

    fn config(&self) -> &Config {
        &self.ctx.config
    }

    fn artifact_context(&self) -> ArtifactContext<'_> {
        ArtifactContext::new(&self.ctx.config, self.ctx.executor.as_ref(), &self.cask)
    }

    fn fs(&self) -> FsHelper<'_> {
        FsHelper::new(self.ctx.executor.as_ref())
    }

    fn phase_options(&self, skip: bool) -> PhaseOptions {
        PhaseOptions {
            force: self.options.force,
            verbose: self.options.verbose,
            skip,
            upgrade: self.options.upgrade,
        }
    }

    pub fn summary(&self) -> String {
        let verb = if self.options.upgrade { "upgraded" } else { "installed" };
        format!("{} was successfully {}!", self.cask.token, verb)
    }

    // --- Install ---

    pub fn install(&mut self) -> Result<()> {
        debug!("Installer::install for {}", self.cask.token);
        if self.cask.is_installed(self.config())
            && !self.options.force
            && !self.options.reinstall
            && !self.options.upgrade
        {
            return Err(CasketError::CaskAlreadyInstalled(self.cask.token.clone()));
        }

        self.check_conflicts()?;
        self.print_caveats();
        self.fetch()?;
        if self.options.reinstall {
            self.uninstall_existing_cask()?;
        }
        self.stage()?;
        self.install_artifacts()?;
        self.enable_accessibility_access()?;

        info!("{}", self.summary());
        Ok(())
    }

    /// Fails with [`CasketError::CaskConflict`] when a cask listed in
    /// `conflicts_with` is installed. Unknown casks are ignored.
    pub fn check_conflicts(&self) -> Result<()> {
        let Some(conflicts) = &self.cask.conflicts_with else {
            return Ok(());
        };
        for token in &conflicts.cask {
            match self.ctx.loader.load(token) {
                Ok(other) if other.is_installed(self.config()) => {
                    return Err(CasketError::CaskConflict(
                        self.cask.token.clone(),
                        other.token,
                    ));
                }
                Ok(_) => {}
                Err(e) if e.is_unavailable() => {
                    debug!("Ignoring unknown conflicting cask {}", token);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn print_caveats(&self) {
        if let Some(caveats) = self.cask.caveats_text(self.config()) {
            info!("==> Caveats\n{}", caveats);
        }
    }

    /// Verifies the sha policy, satisfies `depends_on` and downloads the
    /// container.
    pub fn fetch(&mut self) -> Result<PathBuf> {
        debug!("Installer::fetch for {}", self.cask.token);
        self.verify_has_sha()?;
        self.satisfy_dependencies()?;
        self.download(self.options.force)
    }

    fn verify_has_sha(&self) -> Result<()> {
        if !self.options.require_sha || self.options.force {
            return Ok(());
        }
        match &self.cask.sha256 {
            None | Some(Checksum::NoCheck) => {
                Err(CasketError::CaskNoShasum(self.cask.token.clone()))
            }
            Some(Checksum::Hex(_)) => Ok(()),
        }
    }

    pub fn download(&mut self, force: bool) -> Result<PathBuf> {
        info!("Downloading {}", self.cask.token);
        let path = self
            .ctx
            .downloader
            .perform(&self.cask, force)
            .map_err(|e| CasketError::CaskDownloadFailed(self.cask.token.clone(), Arc::new(e)))?;
        if self.options.quarantine {
            if let Err(e) = self.ctx.quarantine.cask(&self.cask, &path) {
                warn!("Failed to quarantine {}: {}", path.display(), e);
            }
        }
        debug!("Downloaded to {}", path.display());
        self.downloaded_path = Some(path.clone());
        Ok(path)
    }

    fn uninstall_existing_cask(&self) -> Result<()> {
        if !self.cask.is_installed(self.config()) {
            return Ok(());
        }
        let installed = match self.ctx.loader.load_installed(&self.cask.token) {
            Ok(cask) => cask,
            Err(e) => {
                debug!("Using current definition to uninstall {}: {}", self.cask.token, e);
                self.cask.clone()
            }
        };
        let options = InstallOptions {
            force: true,
            ..self.options
        };
        Installer::new(installed, self.ctx, options).uninstall()
    }

    // --- Stage ---

    /// Extracts the downloaded container into the staged path and saves the
    /// definition snapshot.
    pub fn stage(&mut self) -> Result<()> {
        debug!("Installer::stage for {}", self.cask.token);
        let result = self.stage_unchecked();
        if result.is_err() {
            self.purge_after_failure();
        }
        result
    }

    fn stage_unchecked(&mut self) -> Result<()> {
        self.ensure_caskroom_exists()?;
        let downloaded = match self.downloaded_path.clone() {
            Some(path) => path,
            None => self.fetch()?,
        };
        self.extract_primary_container(&downloaded)?;
        self.save_caskfile()
    }

    fn ensure_caskroom_exists(&self) -> Result<()> {
        let caskroom = self.config().caskroom_dir();
        if caskroom.exists() {
            return Ok(());
        }
        match fs::create_dir_all(&caskroom) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {}
            Err(e) => return Err(e.into()),
        }
        info!(
            "Creating Caskroom directory: {}\nWe'll set permissions properly so we won't need sudo in the future.",
            caskroom.display()
        );
        let user = helpers::current_user();
        let commands = [
            CommandSpec::new("/bin/mkdir").arg("-p").arg(&caskroom),
            CommandSpec::new("/bin/chmod").arg("g+rwx").arg(&caskroom),
            CommandSpec::new("/usr/sbin/chown").arg(user).arg(&caskroom),
            CommandSpec::new("/usr/bin/chgrp").arg("admin").arg(&caskroom),
        ];
        for command in commands {
            self.ctx.executor.run(&command.sudo(true).must_succeed(true))?;
        }
        Ok(())
    }

    fn extract_primary_container(&self, downloaded: &Path) -> Result<()> {
        let hint = self.cask.container.as_ref().and_then(|c| c.kind);
        let primary = self.ctx.detector.detect(downloaded, hint)?;
        debug!("Using container {:?} for {}", primary, downloaded.display());
        self.install_unpack_dependencies(&primary.dependencies())?;

        let staged = self.cask.staged_path(self.config());
        let basename = url_basename(&self.cask, downloaded);
        match self.cask.container.as_ref().and_then(|c| c.nested.as_deref()) {
            Some(nested) => {
                let tmp = tempfile::tempdir()?;
                primary.extract(tmp.path(), &basename)?;
                let nested_path = tmp.path().join(nested);
                if !helpers::path_occupied(&nested_path) {
                    return Err(CasketError::CaskError(format!(
                        "Nested container '{}' not found in {}.",
                        nested, basename
                    )));
                }
                let inner = self.ctx.detector.detect(&nested_path, None)?;
                self.install_unpack_dependencies(&inner.dependencies())?;
                let inner_name = nested_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.ctx
                    .detector
                    .extract_nestedly(inner.as_ref(), &staged, &inner_name)?;
            }
            None => {
                self.ctx
                    .detector
                    .extract_nestedly(primary.as_ref(), &staged, &basename)?;
            }
        }

        if self.options.quarantine {
            if let Err(e) = self.ctx.quarantine.propagate(downloaded, &staged) {
                warn!("Failed to propagate quarantine to {}: {}", staged.display(), e);
            }
        }
        Ok(())
    }

    fn install_unpack_dependencies(&self, formulae: &[String]) -> Result<()> {
        let missing: Vec<&String> = formulae
            .iter()
            .filter(|f| !self.ctx.formulae.is_installed(f))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        info!(
            "Installing dependencies needed to unpack {}: {}",
            self.cask.token,
            missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        );
        for formula in missing {
            self.ctx.formulae.install(formula)?;
        }
        Ok(())
    }

    /// Writes the definition snapshot under a fresh timestamp and drops the
    /// previous one.
    fn save_caskfile(&self) -> Result<()> {
        let previous = self.cask.metadata_timestamped_path(self.config());
        let savedir = self
            .cask
            .metadata_versioned_path(self.config())
            .join(caskroom::new_timestamp())
            .join(caskroom::SNAPSHOT_SUBDIR);
        fs::create_dir_all(&savedir)?;
        let file = savedir.join(caskroom::snapshot_file_name(&self.cask.token));
        fs::write(&file, self.cask.source_text()?)?;
        debug!("Saved cask definition to {}", file.display());

        if let Some(previous) = previous {
            if !savedir.starts_with(&previous) {
                helpers::remove_native(&previous)?;
            }
        }
        Ok(())
    }

    // --- Artifacts ---

    /// Installs artifacts in declared order. On failure the ones already
    /// installed are reverted newest first and the versioned files purged.
    pub fn install_artifacts(&self) -> Result<()> {
        let ctx = self.artifact_context();
        let options = self.phase_options(false);
        debug!(
            "Installing {} artifact(s) for {}",
            self.cask.artifacts.len(),
            self.cask.token
        );

        let mut installed: Vec<&Artifact> = Vec::new();
        for artifact in &self.cask.artifacts {
            if !artifact.has_install_phase() {
                continue;
            }
            if matches!(artifact, Artifact::Binary(_)) && !self.options.binaries {
                continue;
            }
            debug!("Installing {} artifact", artifact.stanza());
            if let Err(e) = artifacts::install_phase(artifact, &ctx, options) {
                for done in installed.iter().rev() {
                    if !done.has_uninstall_phase() {
                        continue;
                    }
                    debug!("Reverting {} artifact", done.stanza());
                    if let Err(undo) = artifacts::uninstall_phase(done, &ctx, options) {
                        error!(
                            "Failed to revert {} artifact of {}: {}",
                            done.stanza(),
                            self.cask.token,
                            undo
                        );
                    }
                }
                self.purge_after_failure();
                return Err(e);
            }
            installed.push(artifact);
        }
        Ok(())
    }

    /// Uninstalls artifacts in declared order. `clear` tolerates artifacts
    /// that are already gone.
    pub fn uninstall_artifacts(&self, clear: bool) -> Result<()> {
        let ctx = self.artifact_context();
        let options = self.phase_options(clear);
        for artifact in &self.cask.artifacts {
            if !artifact.has_uninstall_phase() {
                continue;
            }
            debug!("Uninstalling {} artifact", artifact.stanza());
            artifacts::uninstall_phase(artifact, &ctx, options)?;
        }
        Ok(())
    }

    // --- Accessibility ---

    fn bundle_identifier(&self) -> Option<String> {
        let ctx = self.artifact_context();
        self.cask.artifacts.iter().find_map(|artifact| match artifact {
            Artifact::App(_) => {
                let (spec, dest) = artifact.as_moved()?;
                let target = moved::target_path(spec, dest, &ctx).ok()?;
                accessibility::bundle_identifier(&target)
            }
            _ => None,
        })
    }

    pub fn enable_accessibility_access(&self) -> Result<()> {
        if !self.cask.accessibility_access {
            return Ok(());
        }
        info!("Enabling accessibility access");
        let Some(bundle_id) = self.bundle_identifier() else {
            warn!("Could not determine the bundle identifier of {}", self.cask.token);
            return Ok(());
        };
        let result = accessibility::enable(
            self.ctx.system.as_ref(),
            self.ctx.executor.as_ref(),
            &bundle_id,
        );
        if result.is_err() {
            self.purge_after_failure();
        }
        result
    }

    pub fn disable_accessibility_access(&self) -> Result<()> {
        if !self.cask.accessibility_access {
            return Ok(());
        }
        info!("Disabling accessibility access");
        let Some(bundle_id) = self.bundle_identifier() else {
            return Ok(());
        };
        accessibility::disable(
            self.ctx.system.as_ref(),
            self.ctx.executor.as_ref(),
            &bundle_id,
        )
    }

    // --- Uninstall and zap ---

    /// Removes the installed artifacts and this version's Caskroom files.
    /// `self` should hold the definition the cask was installed from.
    pub fn uninstall(&self) -> Result<()> {
        if !self.cask.is_installed(self.config()) && !self.options.force {
            return Err(CasketError::CaskNotInstalled(self.cask.token.clone()));
        }
        info!("Uninstalling Cask {}", self.cask.token);
        self.disable_accessibility_access()?;
        self.uninstall_artifacts(true)?;
        self.purge_versioned_files()?;
        if self.options.force {
            self.purge_caskroom_path()?;
        }
        Ok(())
    }

    /// Uninstalls, runs every `zap` stanza, then removes all staged
    /// versions.
    pub fn zap(&self) -> Result<()> {
        info!("Implied \"casket uninstall {}\"", self.cask.token);
        self.uninstall_artifacts(false)?;

        let zaps: Vec<_> = self
            .cask
            .artifacts
            .iter()
            .filter_map(|a| match a {
                Artifact::Zap(directives) => Some(directives),
                _ => None,
            })
            .collect();
        if zaps.is_empty() {
            warn!("No zap stanza present for Cask '{}'", self.cask.token);
        } else {
            info!("Dispatching zap stanza");
            let ctx = self.artifact_context();
            for directives in zaps {
                artifacts::zap_phase(directives, &ctx, self.phase_options(false))?;
            }
        }

        info!("Removing all staged versions of Cask '{}'", self.cask.token);
        self.purge_caskroom_path()
    }

    /// Deletes the staged files and metadata of this version. The token
    /// directory is kept during upgrades.
    pub fn purge_versioned_files(&self) -> Result<()> {
        let config = self.config();
        info!(
            "Purging files for version {} of Cask {}",
            self.cask.version_label(),
            self.cask.token
        );
        let helper = self.fs();

        let staged = self.cask.staged_path(config);
        if helpers::path_occupied(&staged) {
            helper.gain_permissions_remove(&staged)?;
        }

        let versioned = self.cask.metadata_versioned_path(config);
        if versioned.is_dir() {
            for entry in fs::read_dir(&versioned)?.flatten() {
                let name = entry.file_name();
                if PERSISTENT_METADATA_SUBDIRS
                    .iter()
                    .any(|keep| name.as_os_str() == *keep)
                {
                    continue;
                }
                helper.gain_permissions_remove(&entry.path())?;
            }
        }
        helpers::rmdir_if_possible(&versioned);

        if !self.options.upgrade {
            helpers::rmdir_if_possible(&self.cask.metadata_master_container_path(config));
            helpers::rmdir_if_possible(&self.cask.caskroom_path(config));
        }
        Ok(())
    }

    /// Deletes every staged version of the cask.
    pub fn purge_caskroom_path(&self) -> Result<()> {
        debug!("Purging all staged versions of Cask {}", self.cask.token);
        let path = self.cask.caskroom_path(self.config());
        if !helpers::path_occupied(&path) {
            return Ok(());
        }
        self.fs().gain_permissions_remove(&path)
    }

    fn purge_after_failure(&self) {
        if let Err(e) = self.purge_versioned_files() {
            error!(
                "Failed to purge versioned files of {}: {}",
                self.cask.token, e
            );
        }
    }

    // --- Upgrade support ---

    fn backup_paths(&self) -> (PathBuf, PathBuf) {
        let config = self.config();
        (
            caskroom::backup_path(&self.cask.staged_path(config)),
            caskroom::backup_path(&self.cask.metadata_versioned_path(config)),
        )
    }

    /// Moves the old version's artifacts back into staging and renames its
    /// versioned directories out of the way.
    pub fn start_upgrade(&self) -> Result<()> {
        self.uninstall_artifacts(false)?;
        let config = self.config();
        let (staged_backup, metadata_backup) = self.backup_paths();
        debug!("Backing up {} to {}", self.cask.token, staged_backup.display());
        fs::rename(self.cask.staged_path(config), &staged_backup)?;
        fs::rename(self.cask.metadata_versioned_path(config), &metadata_backup)?;
        Ok(())
    }

    /// Puts the backed up directories back. Both backups must exist.
    pub fn restore_backup(&self) -> Result<()> {
        let config = self.config();
        let (staged_backup, metadata_backup) = self.backup_paths();
        if !staged_backup.is_dir() || !metadata_backup.is_dir() {
            return Err(CasketError::CaskError(format!(
                "Cannot restore {}: backup at '{}' is incomplete.",
                self.cask.token,
                staged_backup.display()
            )));
        }
        let staged = self.cask.staged_path(config);
        let versioned = self.cask.metadata_versioned_path(config);
        for path in [&staged, &versioned] {
            if helpers::path_occupied(path) {
                self.fs().gain_permissions_remove(path)?;
            }
        }
        fs::rename(&staged_backup, &staged)?;
        fs::rename(&metadata_backup, &versioned)?;
        Ok(())
    }

    pub fn revert_upgrade(&self) -> Result<()> {
        warn!("Reverting upgrade for Cask {}", self.cask.token);
        self.restore_backup()?;
        self.install_artifacts()?;
        self.enable_accessibility_access()
    }

    /// Deletes the backups once the new version is in place.
    pub fn finalize_upgrade(&self) -> Result<()> {
        info!(
            "Purging files for version {} of Cask {}",
            self.cask.version_label(),
            self.cask.token
        );
        let (staged_backup, metadata_backup) = self.backup_paths();
        let helper = self.fs();
        if helpers::path_occupied(&staged_backup) {
            helper.gain_permissions_remove(&staged_backup)?;
        }
        if metadata_backup.is_dir() {
            helper.gain_permissions_remove(&metadata_backup)?;
        }
        Ok(())
    }
}

/// File name of the container as the url names it.
fn url_basename(cask: &Cask, downloaded: &Path) -> String {
    cask.url
        .as_ref()
        .and_then(|spec| url::Url::parse(&spec.url).ok())
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            downloaded
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| cask.token.clone())
        })
}
