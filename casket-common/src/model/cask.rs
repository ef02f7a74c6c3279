// ===== casket-common/src/model/cask.rs =====
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use super::artifact::Artifact;
use super::depends_on::DependsOn;
use super::one_or_many;
use super::version::{Checksum, Version};
use crate::caskroom;
use crate::config::Config;
use crate::error::{CasketError, Result};

/// The `url` stanza: the locator plus fetch options. A plain string is
/// shorthand for `{url}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaskUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub using: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UrlFields {
    url: String,
    #[serde(default)]
    using: Option<String>,
    #[serde(default)]
    verified: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
    #[serde(default)]
    referer: Option<String>,
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "one_or_many")]
    header: Vec<String>,
    #[serde(default)]
    data: BTreeMap<String, String>,
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    branch: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawUrl {
    Simple(String),
    WithSpec(UrlFields),
}

impl<'de> Deserialize<'de> for CaskUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match RawUrl::deserialize(deserializer)? {
            RawUrl::Simple(url) => CaskUrl {
                url,
                ..Default::default()
            },
            RawUrl::WithSpec(f) => CaskUrl {
                url: f.url,
                using: f.using,
                verified: f.verified,
                user_agent: f.user_agent,
                referer: f.referer,
                cookies: f.cookies,
                header: f.header,
                data: f.data,
                revision: f.revision,
                tag: f.tag,
                branch: f.branch,
            },
        })
    }
}

/// Appcast metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appcast {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub must_contain: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    Directory,
    Zip,
    Tar,
    Gzip,
    Bzip2,
    Xz,
    Dmg,
    Pkg,
    Rar,
    SevenZip,
    Naked,
}

/// The `container` stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Container {
    /// Path of an inner container, relative to the extracted outer one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ContainerType>,
}

/// Represents conflicts with other casks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictsWith {
    #[serde(default, deserialize_with = "one_or_many")]
    pub cask: Vec<String>,
}

/// Where a cask definition was loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaskSource {
    /// Exact text the cask was parsed from; saved as the install snapshot.
    pub text: String,
    pub path: Option<PathBuf>,
    /// `user/repo` of the tap the cask came from, if any.
    pub tap: Option<String>,
}

/// A cask definition. Built once by the loader and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Cask {
    pub token: String,

    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Checksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<CaskUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appcast: Option<Appcast>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,

    #[serde(default, skip_serializing_if = "DependsOn::is_empty")]
    pub depends_on: DependsOn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts_with: Option<ConflictsWith>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveats: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub accessibility_access: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_updates: bool,

    #[serde(skip)]
    pub source: Option<CaskSource>,
}

impl Cask {
    /// Parses a cask definition and applies the load-time rules.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut cask: Cask = serde_json::from_str(text)?;
        cask.normalize()?;
        cask.source = Some(CaskSource {
            text: text.to_string(),
            path: None,
            tap: None,
        });
        Ok(cask)
    }

    fn normalize(&mut self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(CasketError::CaskInvalid(
                self.token.clone(),
                "token must not be empty".to_string(),
            ));
        }
        if !is_path_component(&self.token) {
            return Err(self.invalid("token must not contain '/' or be '.' or '..'"));
        }
        if let Some(Version::Literal(raw)) = &self.version {
            if !is_path_component(raw) {
                return Err(self.invalid(&format!(
                    "version '{raw}' must not contain '/' or be '.' or '..'"
                )));
            }
        }

        // Declaration order is install order; drop exact repeats only.
        let mut unique: Vec<Artifact> = Vec::with_capacity(self.artifacts.len());
        for artifact in self.artifacts.drain(..) {
            if !unique.contains(&artifact) {
                unique.push(artifact);
            }
        }
        self.artifacts = unique;

        let stage_only = self
            .artifacts
            .iter()
            .filter_map(|a| match a {
                Artifact::StageOnly(flag) => Some(*flag),
                _ => None,
            })
            .collect::<Vec<_>>();
        if stage_only.contains(&false) {
            return Err(self.invalid("'stage_only' accepts only a single argument: true"));
        }
        if !stage_only.is_empty() && self.artifacts.iter().any(Artifact::is_activatable) {
            return Err(self.invalid("'stage_only' must be the only activatable artifact"));
        }

        for artifact in &self.artifacts {
            if let Artifact::Artifact(spec) = artifact {
                if spec.target.is_none() {
                    return Err(self.invalid(&format!(
                        "target required for Generic Artifact '{}'",
                        spec.source
                    )));
                }
            }
            if let Artifact::PreflightBlock(block) | Artifact::PostflightBlock(block) = artifact {
                if block.install.is_empty() && block.uninstall.is_empty() {
                    return Err(self.invalid(&format!("empty '{}' block", artifact.stanza())));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, msg: &str) -> CasketError {
        CasketError::CaskInvalid(self.token.clone(), msg.to_string())
    }

    /// Serialised definition to snapshot at install time.
    pub fn source_text(&self) -> Result<String> {
        match &self.source {
            Some(source) if !source.text.is_empty() => Ok(source.text.clone()),
            _ => Ok(serde_json::to_string_pretty(self)?),
        }
    }

    pub fn tap(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.tap.as_deref())
    }

    pub fn sourcefile_path(&self) -> Option<&std::path::Path> {
        self.source.as_ref().and_then(|s| s.path.as_deref())
    }

    /// Get a friendly name for display purposes
    pub fn display_name(&self) -> String {
        self.name.first().cloned().unwrap_or_else(|| self.token.clone())
    }

    /// Version as used in paths. A missing version is treated like `latest`.
    pub fn version_label(&self) -> String {
        self.version
            .as_ref()
            .map_or_else(|| "latest".to_string(), ToString::to_string)
    }

    pub fn is_latest(&self) -> bool {
        self.version.as_ref().is_some_and(Version::is_latest)
    }

    // --- Derived locations ---

    pub fn caskroom_path(&self, config: &Config) -> PathBuf {
        config.caskroom_dir().join(&self.token)
    }

    pub fn staged_path(&self, config: &Config) -> PathBuf {
        self.caskroom_path(config).join(self.version_label())
    }

    pub fn metadata_master_container_path(&self, config: &Config) -> PathBuf {
        caskroom::metadata_master_container_path(config, &self.token)
    }

    pub fn metadata_versioned_path(&self, config: &Config) -> PathBuf {
        self.metadata_master_container_path(config)
            .join(self.version_label())
    }

    /// Newest existing snapshot directory for the current version.
    pub fn metadata_timestamped_path(&self, config: &Config) -> Option<PathBuf> {
        caskroom::latest_timestamp_dir(&self.metadata_versioned_path(config))
    }

    // --- Installed state ---

    pub fn installed_versions(&self, config: &Config) -> Vec<String> {
        caskroom::installed_versions(config, &self.token)
    }

    pub fn is_installed(&self, config: &Config) -> bool {
        !self.installed_versions(config).is_empty()
    }

    pub fn installed_version(&self, config: &Config) -> Option<String> {
        self.installed_versions(config).pop()
    }

    pub fn installed_caskfile(&self, config: &Config) -> Option<PathBuf> {
        caskroom::installed_caskfile(config, &self.token)
    }

    /// Installed versions that differ from this definition's version.
    pub fn outdated_versions(&self, config: &Config, greedy: bool) -> Vec<String> {
        let installed = self.installed_versions(config);
        if installed.is_empty() {
            return Vec::new();
        }
        if (self.auto_updates || self.is_latest()) && !greedy {
            return Vec::new();
        }
        if self.is_latest() {
            return installed;
        }
        let current = self.version_label();
        if installed.last() == Some(&current) {
            return Vec::new();
        }
        installed.into_iter().filter(|v| *v != current).collect()
    }

    pub fn is_outdated(&self, config: &Config, greedy: bool) -> bool {
        !self.outdated_versions(config, greedy).is_empty()
    }

    /// Caveats with `{{token}}`, `{{version}}`, `{{staged_path}}` and
    /// `{{appdir}}` filled in.
    pub fn caveats_text(&self, config: &Config) -> Option<String> {
        let raw = self.caveats.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        Some(
            raw.replace("{{token}}", &self.token)
                .replace("{{version}}", &self.version_label())
                .replace("{{staged_path}}", &self.staged_path(config).to_string_lossy())
                .replace("{{appdir}}", &config.appdir().to_string_lossy()),
        )
    }
}

impl std::fmt::Display for Cask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.token)
    }
}

/// Tokens and versions name single Caskroom directories.
fn is_path_component(name: &str) -> bool {
    !name.contains('/') && name != "." && name != ".."
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::model::artifact::MovedSpec;

    const CAFFEINE: &str = r#"{
        "token": "local-caffeine",
        "name": "Caffeine",
        "version": "1.2.3",
        "sha256": "67cdb8a02803ef37fdbf7e0be205863172e41a561ca446cd84f0d7ab35a99d94",
        "url": "file:///tmp/caffeine.zip",
        "homepage": "https://example.com/caffeine",
        "artifacts": [{"app": "Caffeine.app"}, {"app": "Caffeine.app"}]
    }"#;

    #[test]
    fn parses_and_dedups_artifacts() {
        let cask = Cask::from_json(CAFFEINE).unwrap();
        assert_eq!(cask.token, "local-caffeine");
        assert_eq!(cask.name, vec!["Caffeine".to_string()]);
        assert_eq!(
            cask.artifacts,
            vec![Artifact::App(MovedSpec {
                source: "Caffeine.app".into(),
                target: None
            })]
        );
        assert_eq!(cask.source.as_ref().unwrap().text, CAFFEINE);
    }

    #[test]
    fn derived_paths_follow_token_and_version() {
        let cask = Cask::from_json(CAFFEINE).unwrap();
        let config = Config::with_root(Path::new("/r"));
        assert_eq!(
            cask.staged_path(&config),
            PathBuf::from("/r/Caskroom/local-caffeine/1.2.3")
        );
        assert_eq!(
            cask.metadata_versioned_path(&config),
            PathBuf::from("/r/Caskroom/local-caffeine/.metadata/1.2.3")
        );
    }

    #[test]
    fn version_must_name_a_single_directory() {
        for version in ["..", ".", "1/../../x", "1.0/beta"] {
            let json = format!(r#"{{"token": "t", "version": "{version}"}}"#);
            let err = Cask::from_json(&json).unwrap_err();
            assert!(
                matches!(err, CasketError::CaskInvalid(ref t, _) if t == "t"),
                "{version} was accepted"
            );
        }
        assert!(Cask::from_json(r#"{"token": "t", "version": "1.0..2"}"#).is_ok());
        assert!(Cask::from_json(r#"{"token": "t", "version": ":latest"}"#).is_ok());
    }

    #[test]
    fn token_must_name_a_single_directory() {
        for token in ["..", ".", "a/b"] {
            let json = format!(r#"{{"token": "{token}", "version": "1"}}"#);
            assert!(
                matches!(Cask::from_json(&json), Err(CasketError::CaskInvalid(..))),
                "{token} was accepted"
            );
        }
    }

    #[test]
    fn stage_only_must_be_exclusive() {
        let err = Cask::from_json(
            r#"{"token": "t", "artifacts": [{"stage_only": true}, {"app": "A.app"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CasketError::CaskInvalid(..)));

        let ok = Cask::from_json(
            r#"{"token": "t", "artifacts": [{"stage_only": true}, {"zap": {"trash": "~/x"}}]}"#,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn duplicate_singleton_stanza_is_a_load_error() {
        let res = Cask::from_json(
            r#"{"token": "t", "container": {"type": "zip"}, "container": {"type": "dmg"}}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn generic_artifact_requires_target() {
        let res = Cask::from_json(r#"{"token": "t", "artifacts": [{"artifact": "thing"}]}"#);
        assert!(matches!(res, Err(CasketError::CaskInvalid(..))));
    }

    #[test]
    fn caveats_substitute_placeholders() {
        let mut cask = Cask::from_json(CAFFEINE).unwrap();
        cask.caveats = Some("{{token}} {{version}} lives in {{appdir}}".into());
        let config = Config::with_root(Path::new("/r"));
        assert_eq!(
            cask.caveats_text(&config).unwrap(),
            "local-caffeine 1.2.3 lives in /r/Applications"
        );
    }
}
