// casket/src/cli/fetch.rs
use casket_common::config::Config;
use casket_common::error::Result;
use casket_core::install::{InstallContext, InstallOptions, Installer};
use clap::Args;

use crate::cli::runner;

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Download again even if a verified copy is cached
    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub no_quarantine: bool,
}

impl FetchArgs {
    pub fn run(&self, mut config: Config) -> Result<()> {
        if self.no_quarantine {
            config.quarantine = false;
        }
        let ctx = InstallContext::host(config);
        let options = InstallOptions::from_config(&ctx.config);

        runner::run_each(&self.names, "Fetching", |name| {
            let cask = ctx.loader.load(name)?;
            let path = Installer::new(cask, &ctx, options).download(self.force)?;
            println!("{}", path.display());
            Ok(())
        })
    }
}
