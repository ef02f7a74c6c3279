// casket/src/cli/upgrade.rs
use casket_common::config::Config;
use casket_common::error::Result;
use casket_core::install::{InstallContext, InstallOptions};
use casket_core::upgrade::{outdated_casks, upgrade_cask};
use clap::Args;
use colored::Colorize;
use tracing::{debug, info};

use crate::cli::runner;
use crate::cli::StagingFlags;

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Casks to upgrade; every outdated cask when empty
    #[arg()]
    pub names: Vec<String>,

    /// Also upgrade casks with `auto_updates` or `version :latest`
    #[arg(long)]
    pub greedy: bool,

    /// List what would be upgraded without changing anything
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    flags: StagingFlags,
}

impl UpgradeArgs {
    pub fn run(&self, mut config: Config, verbose: bool) -> Result<()> {
        self.flags.apply(&mut config);
        let ctx = InstallContext::host(config);
        let options = self.flags.options(&ctx, verbose);

        let outdated = outdated_casks(&ctx, &self.names, self.greedy, self.flags.force)?;
        if outdated.is_empty() {
            info!("No casks to upgrade");
            return Ok(());
        }

        let lines: Vec<String> = outdated
            .iter()
            .map(|cask| {
                let installed = cask
                    .installed_version(&ctx.config)
                    .unwrap_or_else(|| "none".to_string());
                format!("{} {} -> {}", cask.token, installed, cask.version_label())
            })
            .collect();
        let verb = if self.dry_run { "Would upgrade" } else { "Upgrading" };
        println!(
            "{} {} {} outdated package{}:\n{}",
            "==>".bold().blue(),
            verb,
            outdated.len(),
            if outdated.len() == 1 { "" } else { "s" },
            lines.join("\n")
        );
        if self.dry_run {
            return Ok(());
        }

        let tokens: Vec<String> = outdated.iter().map(|c| c.token.clone()).collect();
        runner::run_each(&tokens, "Upgrading", |token| {
            let Some(new) = outdated.iter().find(|c| c.token == token).cloned() else {
                return Ok(());
            };
            let old = match ctx.loader.load_installed(&new.token) {
                Ok(old) => old,
                Err(e) => {
                    debug!("No install snapshot for {}: {}", new.token, e);
                    new.clone()
                }
            };
            upgrade_cask(old, new, &ctx, options)
        })
    }
}
