// casket/src/cli/audit.rs
use casket_common::caskroom;
use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_core::audit::{core_formula_names, AuditOptions, AuditStatus, Auditor};
use casket_core::install::InstallContext;
use clap::Args;
use colored::Colorize;

use crate::cli::runner;

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Casks to audit; every installed cask when empty
    #[arg()]
    pub names: Vec<String>,

    /// Download and verify each container
    #[arg(long)]
    pub download: bool,

    /// Warn when a token matches a core formula name
    #[arg(long)]
    pub token_conflicts: bool,

    /// Skip comparing the definition with its previous committed revision
    #[arg(long)]
    pub no_history: bool,
}

impl AuditArgs {
    pub fn run(&self, config: Config) -> Result<()> {
        let ctx = InstallContext::host(config);
        let options = AuditOptions {
            download: self.download,
            token_conflicts: self.token_conflicts,
            check_history: !self.no_history,
        };
        let formula_names = if self.token_conflicts {
            core_formula_names(&ctx.config)
        } else {
            Default::default()
        };
        let tokens = if self.names.is_empty() {
            caskroom::installed_tokens(&ctx.config)
        } else {
            self.names.clone()
        };

        runner::run_each(&tokens, "Auditing", |name| {
            let cask = ctx.loader.load(name)?;
            let result = Auditor::new(&cask, &ctx, options)
                .with_formula_names(formula_names.clone())
                .run();
            let summary = result.summary();
            match result.status() {
                AuditStatus::Passed => println!("{}", summary.green()),
                AuditStatus::Warned => println!("{}", summary.yellow()),
                AuditStatus::Failed => {
                    println!("{}", summary.red());
                    return Err(CasketError::CaskError(format!(
                        "audit for {} failed",
                        cask.token
                    )));
                }
            }
            Ok(())
        })
    }
}
