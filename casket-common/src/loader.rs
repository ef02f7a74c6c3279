// casket-common/src/loader.rs
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::caskroom;
use crate::config::Config;
use crate::error::{CasketError, Result};
use crate::model::cask::{Cask, CaskSource};

/// Produces cask definitions for the installer, resolver and auditor.
pub trait CaskLoader {
    /// Loads the current definition. `reference` may be a token, a
    /// `user/repo/token` name, a path to a `.json` file, a URL or literal
    /// JSON text.
    fn load(&self, reference: &str) -> Result<Cask>;

    /// Loads the snapshot saved when `token` was last installed.
    fn load_installed(&self, token: &str) -> Result<Cask>;
}

/// Loads casks from the taps directory, files, URLs or literal text.
#[derive(Debug, Clone)]
pub struct TapLoader {
    config: Config,
}

impl TapLoader {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn from_text(&self, reference: &str, text: &str) -> Result<Cask> {
        Cask::from_json(text).map_err(|e| match e {
            CasketError::CaskInvalid(..) => e,
            other => CasketError::CaskUnreadable(reference.to_string(), other.to_string()),
        })
    }

    fn from_file(&self, path: &Path, tap: Option<String>) -> Result<Cask> {
        let reference = path.display().to_string();
        let text = fs::read_to_string(path)
            .map_err(|e| CasketError::CaskUnreadable(reference.clone(), e.to_string()))?;
        let mut cask = self.from_text(&reference, &text)?;
        if let Some(file_token) = path.file_stem().and_then(|s| s.to_str()) {
            if file_token != cask.token {
                return Err(CasketError::CaskTokenMismatch {
                    token: cask.token,
                    file_token: file_token.to_string(),
                });
            }
        }
        cask.source = Some(CaskSource {
            text,
            path: Some(path.to_path_buf()),
            tap,
        });
        Ok(cask)
    }

    fn from_url(&self, url: &str) -> Result<Cask> {
        debug!("Loading cask from {}", url);
        let response = reqwest::blocking::get(url)?;
        if !response.status().is_success() {
            return Err(CasketError::CaskUnavailable(
                url.to_string(),
                format!("HTTP status {}", response.status()),
            ));
        }
        let text = response.text()?;
        self.from_text(url, &text)
    }

    /// `(tap name, file)` for a token in a specific tap.
    fn tap_file(&self, tap: &str, token: &str) -> Option<(String, PathBuf)> {
        let path = self
            .config
            .tap_path(tap)?
            .join("Casks")
            .join(caskroom::snapshot_file_name(token));
        path.is_file().then(|| (tap.to_string(), path))
    }

    /// Searches every tap; `homebrew/cask` wins when several define the token.
    fn find_in_taps(&self, token: &str) -> Option<(String, PathBuf)> {
        if let Some(found) = self.tap_file("homebrew/cask", token) {
            return Some(found);
        }
        let taps_dir = self.config.taps_dir();
        let mut users: Vec<PathBuf> = fs::read_dir(&taps_dir)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        users.sort();
        for user_dir in users {
            let mut repos: Vec<PathBuf> = match fs::read_dir(&user_dir) {
                Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
                Err(_) => continue,
            };
            repos.sort();
            for repo_dir in repos {
                let candidate = repo_dir
                    .join("Casks")
                    .join(caskroom::snapshot_file_name(token));
                if candidate.is_file() {
                    let user = user_dir.file_name().and_then(|s| s.to_str()).unwrap_or_default();
                    let repo = repo_dir.file_name().and_then(|s| s.to_str()).unwrap_or_default();
                    let repo = repo.strip_prefix("homebrew-").unwrap_or(repo);
                    return Some((format!("{user}/{repo}"), candidate));
                }
            }
        }
        None
    }
}

impl CaskLoader for TapLoader {
    fn load(&self, reference: &str) -> Result<Cask> {
        let trimmed = reference.trim();
        if trimmed.starts_with('{') {
            return self.from_text("(literal)", trimmed);
        }
        if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
            return self.from_url(trimmed);
        }
        let as_path = Path::new(trimmed);
        if trimmed.ends_with(".json") {
            if as_path.is_file() {
                return self.from_file(as_path, None);
            }
            return Err(CasketError::CaskUnavailable(
                trimmed.to_string(),
                format!("file {} does not exist", as_path.display()),
            ));
        }

        let found = match trimmed.rsplit_once('/') {
            Some((tap, token)) => self.tap_file(tap, token),
            None => self.find_in_taps(trimmed),
        };
        match found {
            Some((tap, path)) => {
                debug!("Loading cask {} from tap {}", trimmed, tap);
                self.from_file(&path, Some(tap))
            }
            None => Err(CasketError::CaskUnavailable(
                trimmed.to_string(),
                "No Cask with this name exists.".to_string(),
            )),
        }
    }

    fn load_installed(&self, token: &str) -> Result<Cask> {
        let path = caskroom::installed_caskfile(&self.config, token)
            .ok_or_else(|| CasketError::CaskNotInstalled(token.to_string()))?;
        debug!("Loading installed caskfile {}", path.display());
        self.from_file(&path, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_cask(dir: &Path, token: &str, body_token: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(format!("{token}.json"));
        fs::write(
            &path,
            format!(r#"{{"token": "{body_token}", "version": "1.0", "artifacts": [{{"app": "A.app"}}]}}"#),
        )
        .unwrap();
        path
    }

    #[test]
    fn loads_by_token_from_taps() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let casks = config.taps_dir().join("acme/homebrew-tools/Casks");
        write_cask(&casks, "widget", "widget");

        let loader = TapLoader::new(&config);
        let cask = loader.load("widget").unwrap();
        assert_eq!(cask.token, "widget");
        assert_eq!(cask.tap(), Some("acme/tools"));

        let qualified = loader.load("acme/tools/widget").unwrap();
        assert_eq!(qualified.token, "widget");
    }

    #[test]
    fn missing_token_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = TapLoader::new(&Config::with_root(tmp.path()));
        assert!(loader.load("nothing-here").unwrap_err().is_unavailable());
    }

    #[test]
    fn file_name_must_match_token() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_cask(tmp.path(), "wrong-name", "widget");
        let loader = TapLoader::new(&Config::with_root(tmp.path()));
        let err = loader.load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, CasketError::CaskTokenMismatch { .. }));
    }

    #[test]
    fn invalid_json_is_unreadable() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = TapLoader::new(&Config::with_root(tmp.path()));
        let err = loader.load("{\"token\": 5}").unwrap_err();
        assert!(matches!(err, CasketError::CaskUnreadable(..)));
    }
}
