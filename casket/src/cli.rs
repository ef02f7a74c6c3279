// casket/src/cli.rs
//! Defines the command-line argument structure using clap.
use casket_common::config::Config;
use casket_common::error::Result;
use casket_core::install::{InstallContext, InstallOptions};
use clap::{ArgAction, Args, Parser, Subcommand};

pub mod audit;
pub mod fetch;
pub mod install;
pub mod reinstall;
pub mod runner;
pub mod uninstall;
pub mod upgrade;
pub mod zap;

use crate::cli::audit::AuditArgs;
use crate::cli::fetch::FetchArgs;
use crate::cli::install::InstallArgs;
use crate::cli::reinstall::ReinstallArgs;
use crate::cli::uninstall::UninstallArgs;
use crate::cli::upgrade::UpgradeArgs;
use crate::cli::zap::ZapArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "casket", bin_name = "casket")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install casks
    Install(InstallArgs),
    /// Uninstall casks
    Uninstall(UninstallArgs),
    /// Uninstall and install casks again
    Reinstall(ReinstallArgs),
    /// Upgrade outdated casks
    Upgrade(UpgradeArgs),
    /// Uninstall casks and remove the files listed in their zap stanzas
    Zap(ZapArgs),
    /// Download cask containers without installing
    Fetch(FetchArgs),
    /// Check cask definitions for problems
    Audit(AuditArgs),
}

impl Command {
    pub fn run(&self, config: Config, verbose: bool) -> Result<()> {
        match self {
            Self::Install(command) => command.run(config, verbose),
            Self::Uninstall(command) => command.run(config, verbose),
            Self::Reinstall(command) => command.run(config, verbose),
            Self::Upgrade(command) => command.run(config, verbose),
            Self::Zap(command) => command.run(config, verbose),
            Self::Fetch(command) => command.run(config),
            Self::Audit(command) => command.run(config),
        }
    }
}

/// Flags shared by the commands that stage casks.
#[derive(Args, Debug, Clone, Copy)]
pub struct StagingFlags {
    /// Skip checks that would otherwise refuse the operation
    #[arg(long)]
    pub force: bool,

    /// Refuse casks without a checksum
    #[arg(long)]
    pub require_sha: bool,

    /// Link binary artifacts (default unless disabled in HOMEBREW_CASK_OPTS)
    #[arg(long, overrides_with = "no_binaries")]
    pub binaries: bool,

    /// Do not link binary artifacts
    #[arg(long)]
    pub no_binaries: bool,

    /// Do not mark downloads as quarantined
    #[arg(long)]
    pub no_quarantine: bool,
}

impl StagingFlags {
    /// Applies the flags on top of the configured defaults.
    pub fn apply(&self, config: &mut Config) {
        if self.require_sha {
            config.require_sha = true;
        }
        if self.binaries {
            config.binaries = true;
        }
        if self.no_binaries {
            config.binaries = false;
        }
        if self.no_quarantine {
            config.quarantine = false;
        }
    }

    pub fn options(&self, ctx: &InstallContext, verbose: bool) -> InstallOptions {
        InstallOptions {
            force: self.force,
            verbose,
            ..InstallOptions::from_config(&ctx.config)
        }
    }
}
