// casket-core/src/audit/mod.rs
//! Static and optional live checks of a cask definition.
//!
//! Every check runs even when earlier ones found problems. A check that
//! fails outright is recorded as an audit error.
pub mod history;

use std::collections::HashSet;
use std::fmt;
use std::fs;

use casket_common::config::Config;
use casket_common::error::Result;
use casket_common::model::{Artifact, Cask, Checksum, Version};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::install::InstallContext;

/// SHA-256 of zero bytes.
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

lazy_static! {
    static ref SHA256_HEX: Regex = Regex::new(r"^[0-9a-f]{64}$").unwrap();
    static ref GITHUB_RELEASE: Regex =
        Regex::new(r"github\.com/([^/]+)/([^/]+)/releases/download/(\S+)").unwrap();
    static ref SOURCEFORGE: Regex = Regex::new(r"sourceforge\.net/(\S+)").unwrap();
    static ref SOURCEFORGE_VALID: [Regex; 2] = [
        Regex::new(r"^https://sourceforge\.net/projects/[^/]+/files/latest/download$").unwrap(),
        Regex::new(r"^https://downloads\.sourceforge\.net/[^/]").unwrap(),
    ];
    static ref SOURCEFORGE_RESERVED: Regex =
        Regex::new(r"^https://downloads\.sourceforge\.net/(project|sourceforge)/").unwrap();
    static ref OSDN_VALID: Regex = Regex::new(r"^https?://([^/]+\.)?dl\.osdn\.jp/").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditOptions {
    /// Download the container and verify its checksum.
    pub download: bool,
    /// Warn when the token is also a core formula name.
    pub token_conflicts: bool,
    /// Compare with the previous committed revision of the cask file.
    pub check_history: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Passed,
    Warned,
    Failed,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditStatus::Passed => "passed",
            AuditStatus::Warned => "warning",
            AuditStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditResult {
    pub token: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl AuditResult {
    pub fn status(&self) -> AuditStatus {
        if !self.errors.is_empty() {
            AuditStatus::Failed
        } else if !self.warnings.is_empty() {
            AuditStatus::Warned
        } else {
            AuditStatus::Passed
        }
    }

    pub fn success(&self) -> bool {
        self.status() == AuditStatus::Passed
    }

    /// Multi-line report: a status line, then one line per finding.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("audit for {}: {}", self.token, self.status())];
        lines.extend(self.errors.iter().map(|e| format!(" - error: {e}")));
        lines.extend(self.warnings.iter().map(|w| format!(" - warning: {w}")));
        lines.join("\n")
    }
}

pub struct Auditor<'a> {
    cask: &'a Cask,
    ctx: &'a InstallContext,
    options: AuditOptions,
    formula_names: HashSet<String>,
    result: AuditResult,
}

impl<'a> Auditor<'a> {
    pub fn new(cask: &'a Cask, ctx: &'a InstallContext, options: AuditOptions) -> Self {
        Self {
            cask,
            ctx,
            options,
            formula_names: HashSet::new(),
            result: AuditResult {
                token: cask.token.clone(),
                ..Default::default()
            },
        }
    }

    /// Formula names the token is checked against when `token_conflicts`
    /// is set.
    pub fn with_formula_names(mut self, names: HashSet<String>) -> Self {
        self.formula_names = names;
        self
    }

    fn add_error(&mut self, message: impl Into<String>) {
        self.result.errors.push(message.into());
    }

    fn add_warning(&mut self, message: impl Into<String>) {
        self.result.warnings.push(message.into());
    }

    pub fn run(mut self) -> AuditResult {
        let checks: [(&str, fn(&mut Self) -> Result<()>); 15] = [
            ("required stanzas", Self::check_required_stanzas),
            ("version", Self::check_version),
            ("sha256", Self::check_sha256),
            ("url", Self::check_download_url_format),
            ("generic artifacts", Self::check_generic_artifacts),
            ("token conflicts", Self::check_token_conflicts),
            ("cask dependencies", Self::check_cask_dependencies),
            ("download", Self::check_download),
            ("pre/postflight", Self::check_single_pre_postflight),
            ("uninstall/zap", Self::check_single_uninstall_zap),
            ("untrusted pkg", Self::check_untrusted_pkg),
            ("appcast", Self::check_hosting_with_appcast),
            ("latest with appcast", Self::check_latest_with_appcast),
            ("uninstall stanza", Self::check_stanza_requires_uninstall),
            ("history", Self::check_version_and_checksum),
        ];
        for (name, check) in checks {
            debug!("Auditing {} of {}", name, self.cask.token);
            if let Err(e) = check(&mut self) {
                let message = format!("exception while auditing {}: {}", self.cask.token, e);
                self.add_error(message);
            }
        }
        self.result
    }

    fn check_required_stanzas(&mut self) -> Result<()> {
        let cask = self.cask;
        for (stanza, present) in [
            ("version", cask.version.is_some()),
            ("sha256", cask.sha256.is_some()),
            ("url", cask.url.is_some()),
            ("homepage", cask.homepage.is_some()),
        ] {
            if !present {
                self.add_error(format!("a {stanza} stanza is required"));
            }
        }
        if cask.name.is_empty() {
            self.add_error("at least one name stanza is required");
        }
        if !cask.artifacts.iter().any(Artifact::is_activatable) {
            self.add_error("at least one activatable artifact stanza is required");
        }
        Ok(())
    }

    fn check_version(&mut self) -> Result<()> {
        let cask = self.cask;
        let Some(Version::Literal(raw)) = &cask.version else {
            return Ok(());
        };
        if raw == "latest" {
            self.add_error("you should use version :latest instead of version 'latest'");
        }
        if raw.contains('/') {
            self.add_error("version should not contain '/'");
        }
        Ok(())
    }

    fn check_sha256(&mut self) -> Result<()> {
        let cask = self.cask;
        let Some(sha256) = &cask.sha256 else {
            return Ok(());
        };
        if cask.is_latest() && !sha256.is_no_check() {
            self.add_error("you should use sha256 :no_check when version is :latest");
        }
        if let Checksum::Hex(hex) = sha256 {
            if !SHA256_HEX.is_match(hex) {
                self.add_error("sha256 string must be of 64 hexadecimal characters");
            }
            if hex == EMPTY_SHA256 {
                self.add_error(format!(
                    "cannot use the sha256 for an empty string in sha256: {EMPTY_SHA256}"
                ));
            }
        }
        Ok(())
    }

    fn check_download_url_format(&mut self) -> Result<()> {
        let url = url_of(self.cask);
        if url.is_empty() {
            return Ok(());
        }
        let bad_sourceforge = url.contains("sourceforge")
            && !(SOURCEFORGE_VALID.iter().any(|re| re.is_match(url))
                && !SOURCEFORGE_RESERVED.is_match(url));
        let bad_osdn = url.contains("osd") && !OSDN_VALID.is_match(url);
        if bad_sourceforge {
            self.add_warning("SourceForge URL format incorrect");
        } else if bad_osdn {
            self.add_warning("OSDN URL format incorrect");
        }
        Ok(())
    }

    fn check_generic_artifacts(&mut self) -> Result<()> {
        let config = &self.ctx.config;
        let relative: Vec<String> = self
            .cask
            .artifacts
            .iter()
            .filter_map(|a| match a {
                Artifact::Artifact(spec) => Some(spec),
                _ => None,
            })
            .filter(|spec| {
                !spec
                    .target
                    .as_deref()
                    .is_some_and(|t| config.expand_home(t).is_absolute())
            })
            .map(|spec| spec.source.clone())
            .collect();
        for source in relative {
            self.add_error(format!(
                "target must be absolute path for Generic Artifact {source}"
            ));
        }
        Ok(())
    }

    fn check_token_conflicts(&mut self) -> Result<()> {
        if !self.options.token_conflicts {
            return Ok(());
        }
        if self.formula_names.contains(&self.cask.token) {
            self.add_warning(format!(
                "possible duplicate, cask token conflicts with core formula '{}'",
                self.cask.token
            ));
        }
        Ok(())
    }

    fn check_cask_dependencies(&mut self) -> Result<()> {
        let cask = self.cask;
        for token in &cask.depends_on.cask {
            if let Err(e) = self.ctx.loader.load(token) {
                self.add_error(format!("depends_on cask '{token}' cannot be loaded: {e}"));
            }
        }
        Ok(())
    }

    fn check_download(&mut self) -> Result<()> {
        if !self.options.download || self.cask.url.is_none() {
            return Ok(());
        }
        if let Err(e) = self.ctx.downloader.perform(self.cask, false) {
            self.add_error(format!("download not possible: {e}"));
        }
        Ok(())
    }

    fn check_single_pre_postflight(&mut self) -> Result<()> {
        let cask = self.cask;
        let artifacts = &cask.artifacts;
        let preflight = artifacts
            .iter()
            .filter(|a| matches!(a, Artifact::PreflightBlock(b) if !b.install.is_empty()))
            .count();
        let postflight = artifacts
            .iter()
            .filter(|a| matches!(a, Artifact::PostflightBlock(b) if !b.install.is_empty()))
            .count();
        if preflight > 1 {
            self.add_warning("only a single preflight stanza is allowed");
        }
        if postflight > 1 {
            self.add_warning("only a single postflight stanza is allowed");
        }
        Ok(())
    }

    fn check_single_uninstall_zap(&mut self) -> Result<()> {
        let cask = self.cask;
        let artifacts = &cask.artifacts;
        let count = |pred: fn(&Artifact) -> bool| artifacts.iter().filter(|a| pred(a)).count();

        if count(|a| matches!(a, Artifact::Uninstall(_))) > 1 {
            self.add_warning("only a single uninstall stanza is allowed");
        }
        if count(|a| matches!(a, Artifact::PreflightBlock(b) if !b.uninstall.is_empty())) > 1 {
            self.add_warning("only a single uninstall_preflight stanza is allowed");
        }
        if count(|a| matches!(a, Artifact::PostflightBlock(b) if !b.uninstall.is_empty())) > 1 {
            self.add_warning("only a single uninstall_postflight stanza is allowed");
        }
        if count(|a| matches!(a, Artifact::Zap(_))) > 1 {
            self.add_warning("only a single zap stanza is allowed");
        }
        Ok(())
    }

    fn check_untrusted_pkg(&mut self) -> Result<()> {
        let official = self
            .cask
            .tap()
            .is_some_and(|tap| tap.to_ascii_lowercase().starts_with("homebrew/"));
        if !official {
            return Ok(());
        }
        let untrusted = self
            .cask
            .artifacts
            .iter()
            .any(|a| matches!(a, Artifact::Pkg(spec) if spec.allow_untrusted));
        if untrusted {
            self.add_warning("allow_untrusted is not permitted in official Homebrew Cask taps");
        }
        Ok(())
    }

    fn check_hosting_with_appcast(&mut self) -> Result<()> {
        if self.cask.appcast.is_some() || self.cask.is_latest() {
            return Ok(());
        }
        let url = url_of(self.cask);
        if GITHUB_RELEASE.is_match(url) {
            self.add_warning("Download uses GitHub releases, please add an appcast.");
        } else if SOURCEFORGE.is_match(url) {
            self.add_warning("Download is hosted on SourceForge, please add an appcast.");
        }
        Ok(())
    }

    fn check_latest_with_appcast(&mut self) -> Result<()> {
        if self.cask.is_latest() && self.cask.appcast.is_some() {
            self.add_warning("Casks with an appcast should not use version :latest");
        }
        Ok(())
    }

    fn check_stanza_requires_uninstall(&mut self) -> Result<()> {
        let cask = self.cask;
        let artifacts = &cask.artifacts;
        let needs_uninstall = artifacts
            .iter()
            .any(|a| matches!(a, Artifact::Pkg(_) | Artifact::Installer(_)));
        let has_uninstall = artifacts.iter().any(|a| matches!(a, Artifact::Uninstall(_)));
        if needs_uninstall && !has_uninstall {
            self.add_warning("installer and pkg stanzas require an uninstall stanza");
        }
        Ok(())
    }

    /// Flags a checksum change that kept the version of the previous
    /// committed revision.
    fn check_version_and_checksum(&mut self) -> Result<()> {
        if !self.options.check_history {
            return Ok(());
        }
        let cask = self.cask;
        let Some(path) = cask.sourcefile_path() else {
            return Ok(());
        };
        let current = cask.source_text()?;
        let Some(previous_text) = history::previous_revision(path, &current)? else {
            debug!("No previous revision of {}", path.display());
            return Ok(());
        };
        match Cask::from_json(&previous_text) {
            Ok(previous) => {
                if previous.version == cask.version && previous.sha256 != cask.sha256 {
                    self.add_error("only sha256 changed");
                }
            }
            Err(e) => self.add_warning(format!(
                "Skipped version and checksum comparison. Reading previous version failed: {e}"
            )),
        }
        Ok(())
    }
}

fn url_of(cask: &Cask) -> &str {
    cask.url.as_ref().map(|u| u.url.as_str()).unwrap_or_default()
}

/// Formula names from the `homebrew/core` tap, used for token conflict
/// checks.
pub fn core_formula_names(config: &Config) -> HashSet<String> {
    let Some(tap) = config.tap_path("homebrew/core") else {
        return HashSet::new();
    };
    let Ok(entries) = fs::read_dir(tap.join("Formula")) else {
        return HashSet::new();
    };
    entries
        .flatten()
        .filter_map(|e| {
            e.path()
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_lists() {
        let mut result = AuditResult {
            token: "foo".into(),
            ..Default::default()
        };
        assert_eq!(result.status(), AuditStatus::Passed);
        assert!(result.success());
        result.warnings.push("w".into());
        assert_eq!(result.status(), AuditStatus::Warned);
        assert!(!result.success());
        result.errors.push("e".into());
        assert_eq!(result.status(), AuditStatus::Failed);
        assert_eq!(
            result.summary(),
            "audit for foo: failed\n - error: e\n - warning: w"
        );
    }
}
