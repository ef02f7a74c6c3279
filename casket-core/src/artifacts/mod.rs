// casket-core/src/artifacts/mod.rs
//! Install and uninstall phases of each artifact stanza.
//!
//! Dispatch is an exhaustive `match` on [`Artifact`]; stanzas without a
//! phase (see [`Artifact::has_install_phase`] and
//! [`Artifact::has_uninstall_phase`]) are no-ops here.
pub mod binary;
pub mod flight;
pub mod installer;
pub mod moved;
pub mod pkg;
pub mod pkg_receipt;
pub mod uninstall;

use std::path::{Path, PathBuf};

use casket_common::config::Config;
use casket_common::error::Result;
use casket_common::model::artifact::UninstallDirectives;
use casket_common::model::{Artifact, Cask};

use crate::exec::CommandExecutor;
use crate::helpers::FsHelper;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseOptions {
    /// Overwrite occupied targets and keep going past failed directives.
    pub force: bool,
    pub verbose: bool,
    /// Tolerate artifacts that are already gone.
    pub skip: bool,
    pub upgrade: bool,
}

/// Collaborators shared by every artifact of one cask.
#[derive(Clone, Copy)]
pub struct ArtifactContext<'a> {
    pub config: &'a Config,
    pub executor: &'a dyn CommandExecutor,
    pub cask: &'a Cask,
}

impl<'a> ArtifactContext<'a> {
    pub fn new(config: &'a Config, executor: &'a dyn CommandExecutor, cask: &'a Cask) -> Self {
        Self {
            config,
            executor,
            cask,
        }
    }

    pub fn staged_path(&self) -> PathBuf {
        self.cask.staged_path(self.config)
    }

    pub fn fs(&self) -> FsHelper<'a> {
        FsHelper::new(self.executor)
    }

    /// Resolves a stanza path relative to the staged directory.
    pub fn staged(&self, relative: &str) -> PathBuf {
        self.staged_path().join(relative)
    }
}

pub fn install_phase(artifact: &Artifact, ctx: &ArtifactContext<'_>, options: PhaseOptions) -> Result<()> {
    match artifact {
        Artifact::App(_)
        | Artifact::Suite(_)
        | Artifact::Colorpicker(_)
        | Artifact::Dictionary(_)
        | Artifact::Font(_)
        | Artifact::InputMethod(_)
        | Artifact::InternetPlugin(_)
        | Artifact::AudioUnitPlugin(_)
        | Artifact::VstPlugin(_)
        | Artifact::Vst3Plugin(_)
        | Artifact::Prefpane(_)
        | Artifact::Qlplugin(_)
        | Artifact::ScreenSaver(_)
        | Artifact::Service(_)
        | Artifact::Artifact(_) => moved::install(artifact, ctx, options),
        Artifact::Binary(spec) => binary::link(spec, ctx, options),
        Artifact::Pkg(spec) => pkg::install(spec, ctx, options),
        Artifact::Installer(spec) => installer::install(spec, ctx, options),
        Artifact::PreflightBlock(block) | Artifact::PostflightBlock(block) => {
            flight::run(artifact.stanza(), &block.install, ctx)
        }
        Artifact::StageOnly(_) | Artifact::Uninstall(_) | Artifact::Zap(_) => Ok(()),
    }
}

pub fn uninstall_phase(
    artifact: &Artifact,
    ctx: &ArtifactContext<'_>,
    options: PhaseOptions,
) -> Result<()> {
    match artifact {
        Artifact::App(_)
        | Artifact::Suite(_)
        | Artifact::Colorpicker(_)
        | Artifact::Dictionary(_)
        | Artifact::Font(_)
        | Artifact::InputMethod(_)
        | Artifact::InternetPlugin(_)
        | Artifact::AudioUnitPlugin(_)
        | Artifact::VstPlugin(_)
        | Artifact::Vst3Plugin(_)
        | Artifact::Prefpane(_)
        | Artifact::Qlplugin(_)
        | Artifact::ScreenSaver(_)
        | Artifact::Service(_)
        | Artifact::Artifact(_) => moved::move_back(artifact, ctx, options),
        Artifact::Binary(spec) => binary::unlink(spec, ctx),
        Artifact::Uninstall(directives) => {
            uninstall::run(uninstall::Stanza::Uninstall, directives, ctx, options)
        }
        Artifact::PreflightBlock(block) | Artifact::PostflightBlock(block) => {
            flight::run(artifact.stanza(), &block.uninstall, ctx)
        }
        Artifact::Pkg(_) | Artifact::Installer(_) | Artifact::StageOnly(_) | Artifact::Zap(_) => {
            Ok(())
        }
    }
}

/// Runs a `zap` stanza's directives.
pub fn zap_phase(
    directives: &UninstallDirectives,
    ctx: &ArtifactContext<'_>,
    options: PhaseOptions,
) -> Result<()> {
    uninstall::run(uninstall::Stanza::Zap, directives, ctx, options)
}

/// "a" or "an" for an English artifact name.
pub(crate) fn english_article(name: &str) -> &'static str {
    match name.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

/// Joins quoted items the way a sentence lists them: `'a', 'b' and 'c'`.
pub(crate) fn to_sentence(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

/// Last path component as a string.
pub(crate) fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
