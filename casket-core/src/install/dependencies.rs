// casket-core/src/install/dependencies.rs
//! `depends_on` checks run before a cask is downloaded.
use std::sync::Arc;

use casket_common::dependency::CaskDependencies;
use casket_common::error::{CasketError, Result};
use casket_common::model::Cask;
use tracing::{debug, info};

use super::{InstallOptions, Installer};

impl Installer<'_> {
    /// Checks macOS release, architecture and X11, then installs missing
    /// formula and cask dependencies.
    pub(super) fn satisfy_dependencies(&self) -> Result<()> {
        if self.cask.depends_on.is_empty() {
            return Ok(());
        }
        info!("Satisfying dependencies");
        self.macos_dependencies()?;
        self.arch_dependencies()?;
        self.x11_dependencies()?;
        self.formula_dependencies()?;
        if !self.options.skip_cask_deps && !self.options.installed_as_dependency {
            self.cask_dependencies()?;
        }
        Ok(())
    }

    fn macos_dependencies(&self) -> Result<()> {
        let Some(requirement) = &self.cask.depends_on.macos else {
            return Ok(());
        };
        let running = self.ctx.system.macos_version();
        if running.as_ref().is_some_and(|r| requirement.is_satisfied_by(r)) {
            return Ok(());
        }
        let running = running
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Err(CasketError::CaskError(format!(
            "Cask {} depends on macOS release {}, but you are running release {}.",
            self.cask.token,
            requirement.describe(),
            running
        )))
    }

    fn arch_dependencies(&self) -> Result<()> {
        let required = &self.cask.depends_on.arch;
        if required.is_empty() {
            return Ok(());
        }
        let current = self.ctx.system.hardware_arch();
        if required.iter().any(|arch| arch.matches(&current)) {
            return Ok(());
        }
        let listed: Vec<String> = required.iter().map(ToString::to_string).collect();
        Err(CasketError::CaskError(format!(
            "Cask {} depends on hardware architecture being one of [{}], but you are running {}",
            self.cask.token,
            listed.join(", "),
            current
        )))
    }

    fn x11_dependencies(&self) -> Result<()> {
        if self.cask.depends_on.x11 && !self.ctx.system.x11_installed() {
            return Err(CasketError::CaskX11Dependency(self.cask.token.clone()));
        }
        Ok(())
    }

    fn formula_dependencies(&self) -> Result<()> {
        let formulae = &self.cask.depends_on.formula;
        if formulae.is_empty() {
            return Ok(());
        }
        let missing: Vec<&str> = formulae
            .iter()
            .map(String::as_str)
            .filter(|f| !self.ctx.formulae.is_installed(f))
            .collect();
        if missing.is_empty() {
            info!("All Formula dependencies satisfied.");
            return Ok(());
        }
        info!("Installing Formula dependencies: {}", missing.join(", "));
        for formula in missing {
            self.ctx.formulae.install(formula)?;
        }
        Ok(())
    }

    /// Installs the cask dependency closure, deepest first.
    fn cask_dependencies(&self) -> Result<()> {
        let dependencies = CaskDependencies::new(&self.cask, self.ctx.loader.as_ref())?;
        if dependencies.is_empty() {
            return Ok(());
        }
        let config = &self.ctx.config;
        let missing: Vec<Arc<Cask>> = dependencies
            .casks()
            .iter()
            .filter(|c| !c.is_installed(config))
            .cloned()
            .collect();
        if missing.is_empty() {
            info!("All Cask dependencies satisfied.");
            return Ok(());
        }
        let tokens: Vec<&str> = missing.iter().map(|c| c.token.as_str()).collect();
        info!("Installing Cask dependencies: {}", tokens.join(", "));

        let options = InstallOptions {
            binaries: self.options.binaries,
            verbose: self.options.verbose,
            quarantine: self.options.quarantine,
            installed_as_dependency: true,
            ..Default::default()
        };
        for dependency in missing {
            debug!("Installing dependency {} of {}", dependency.token, self.cask.token);
            Installer::new(Cask::clone(&dependency), self.ctx, options).install()?;
        }
        Ok(())
    }
}
