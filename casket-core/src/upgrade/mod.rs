// casket-core/src/upgrade/mod.rs
//! Replacing an installed cask with its current definition.
//!
//! The old version is moved aside before the new one is staged; any failure
//! after that point puts the old version back.
use casket_common::caskroom;
use casket_common::error::{CasketError, Result};
use casket_common::model::Cask;
use tracing::{debug, error, info, warn};

use crate::install::{InstallContext, InstallOptions, Installer};

/// Current definitions of the casks that need upgrading.
///
/// With no tokens every installed cask is considered and `greedy` decides
/// whether `auto_updates` and `latest` casks count. Named casks are always
/// checked greedily and must be installed unless `force` is set.
pub fn outdated_casks(
    ctx: &InstallContext,
    tokens: &[String],
    greedy: bool,
    force: bool,
) -> Result<Vec<Cask>> {
    let config = &ctx.config;
    if tokens.is_empty() {
        let mut outdated = Vec::new();
        for token in caskroom::installed_tokens(config) {
            match ctx.loader.load(&token) {
                Ok(cask) if cask.is_outdated(config, greedy) => outdated.push(cask),
                Ok(_) => {}
                Err(e) => warn!("Skipping {}: {}", token, e),
            }
        }
        return Ok(outdated);
    }

    let mut outdated = Vec::new();
    for token in tokens {
        let cask = ctx.loader.load(token)?;
        if !cask.is_installed(config) && !force {
            return Err(CasketError::CaskNotInstalled(cask.token));
        }
        if cask.is_outdated(config, true) {
            outdated.push(cask);
        }
    }
    Ok(outdated)
}

/// Upgrades `old` (the installed definition) to `new`.
pub fn upgrade_cask(
    old: Cask,
    new: Cask,
    ctx: &InstallContext,
    options: InstallOptions,
) -> Result<()> {
    info!(
        "Upgrading {} {} -> {}",
        old.token,
        old.version_label(),
        new.version_label()
    );
    let old_installer = Installer::new(
        old,
        ctx,
        InstallOptions {
            binaries: options.binaries,
            verbose: options.verbose,
            force: options.force,
            upgrade: true,
            ..Default::default()
        },
    );
    let mut new_installer = Installer::new(
        new,
        ctx,
        InstallOptions {
            upgrade: true,
            reinstall: false,
            installed_as_dependency: false,
            ..options
        },
    );

    let mut started_upgrade = false;
    let mut new_artifacts_installed = false;
    let result = (|| {
        new_installer.check_conflicts()?;
        new_installer.print_caveats();
        new_installer.fetch()?;

        old_installer.start_upgrade()?;
        started_upgrade = true;

        new_installer.stage()?;
        new_installer.install_artifacts()?;
        new_artifacts_installed = true;
        new_installer.enable_accessibility_access()?;

        old_installer.finalize_upgrade()
    })();

    let Err(e) = result else {
        info!("{}", new_installer.summary());
        return Ok(());
    };

    debug!(
        "Upgrade of {} failed (started: {}, new artifacts: {})",
        new_installer.cask().token,
        started_upgrade,
        new_artifacts_installed
    );
    if new_artifacts_installed {
        if let Err(undo) = new_installer.uninstall_artifacts(true) {
            error!("Failed to remove new artifacts: {}", undo);
        }
    }
    if started_upgrade {
        if let Err(purge) = new_installer.purge_versioned_files() {
            error!("Failed to purge new version: {}", purge);
        }
        if let Err(revert) = old_installer.revert_upgrade() {
            error!("Failed to revert upgrade: {}", revert);
        }
    }
    Err(e)
}
