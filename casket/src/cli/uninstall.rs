// casket/src/cli/uninstall.rs
use casket_common::config::Config;
use casket_common::error::Result;
use casket_core::install::{InstallContext, InstallOptions, Installer};
use clap::Args;
use colored::Colorize;

use crate::cli::runner;

#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// The tokens of the casks to uninstall
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Uninstall even if the cask does not look installed, and remove every
    /// staged version
    #[arg(long)]
    pub force: bool,
}

impl UninstallArgs {
    pub fn run(&self, config: Config, verbose: bool) -> Result<()> {
        let ctx = InstallContext::host(config);
        let options = InstallOptions {
            force: self.force,
            verbose,
            ..InstallOptions::from_config(&ctx.config)
        };

        runner::run_each(&self.names, "Uninstalling", |name| {
            let installer = Installer::for_installed(name, &ctx, options)?;
            installer.uninstall()?;
            println!("✓ Uninstalled {}", installer.cask().token.green());
            Ok(())
        })
    }
}
