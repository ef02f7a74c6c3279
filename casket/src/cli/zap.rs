// casket/src/cli/zap.rs
use casket_common::config::Config;
use casket_common::error::Result;
use casket_core::install::{InstallContext, InstallOptions, Installer};
use clap::Args;
use colored::Colorize;

use crate::cli::runner;

/// Uninstalls casks and removes the user data their zap stanzas list. Data
/// shared with other casks may be lost.
#[derive(Args, Debug)]
pub struct ZapArgs {
    #[arg(required = true)]
    pub names: Vec<String>,

    #[arg(long)]
    pub force: bool,
}

impl ZapArgs {
    pub fn run(&self, config: Config, verbose: bool) -> Result<()> {
        let ctx = InstallContext::host(config);
        let options = InstallOptions {
            force: self.force,
            verbose,
            ..InstallOptions::from_config(&ctx.config)
        };

        runner::run_each(&self.names, "Zapping", |name| {
            let installer = Installer::for_installed(name, &ctx, options)?;
            installer.zap()?;
            println!("✓ Zap complete for {}", installer.cask().token.green());
            Ok(())
        })
    }
}
