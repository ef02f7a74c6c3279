// casket/src/cli/reinstall.rs
use casket_common::config::Config;
use casket_common::error::Result;
use casket_core::install::{InstallContext, InstallOptions, Installer};
use clap::Args;

use crate::cli::runner;
use crate::cli::StagingFlags;

#[derive(Debug, Args)]
pub struct ReinstallArgs {
    #[arg(required = true)]
    names: Vec<String>,

    #[arg(long)]
    skip_cask_deps: bool,

    #[command(flatten)]
    flags: StagingFlags,
}

impl ReinstallArgs {
    pub fn run(&self, mut config: Config, verbose: bool) -> Result<()> {
        self.flags.apply(&mut config);
        let ctx = InstallContext::host(config);
        let options = InstallOptions {
            reinstall: true,
            skip_cask_deps: self.skip_cask_deps,
            ..self.flags.options(&ctx, verbose)
        };

        runner::run_each(&self.names, "Reinstalling", |name| {
            let cask = ctx.loader.load(name)?;
            Installer::new(cask, &ctx, options).install()
        })
    }
}
