// casket/src/cli/install.rs
use casket_common::config::Config;
use casket_common::error::Result;
use casket_core::install::{InstallContext, InstallOptions, Installer};
use clap::Args;
use tracing::instrument;

use crate::cli::runner;
use crate::cli::StagingFlags;

#[derive(Debug, Args)]
pub struct InstallArgs {
    #[arg(required = true)]
    names: Vec<String>,

    /// Do not install casks listed in depends_on
    #[arg(long)]
    skip_cask_deps: bool,

    #[command(flatten)]
    flags: StagingFlags,
}

impl InstallArgs {
    #[instrument(skip(self, config), fields(targets = ?self.names))]
    pub fn run(&self, mut config: Config, verbose: bool) -> Result<()> {
        self.flags.apply(&mut config);
        let ctx = InstallContext::host(config);
        let options = InstallOptions {
            skip_cask_deps: self.skip_cask_deps,
            ..self.flags.options(&ctx, verbose)
        };

        runner::run_each(&self.names, "Installing", |name| {
            let cask = ctx.loader.load(name)?;
            Installer::new(cask, &ctx, options).install()
        })
    }
}
