// casket-net/src/http.rs
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_common::model::cask::CaskUrl;
use casket_common::model::{Cask, Checksum};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, COOKIE, REFERER, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, error, warn};
use url::Url;

use crate::validation::{validate_url, verify_checksum};
use crate::Downloader;

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = "casket cask manager (Rust)";

/// Strategies that need a version-control checkout rather than a download.
const VCS_STRATEGIES: &[&str] = &["git", "svn", "hg", "bzr", "cvs", "fossil"];

/// Compound extensions kept whole when naming cache entries.
const COMPOUND_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz"];

/// Downloads over HTTP(S) and copies `file://` locators, caching the result
/// under `<cache>/downloads`.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    cache_dir: PathBuf,
}

impl HttpDownloader {
    pub fn new(config: &Config) -> Self {
        Self {
            cache_dir: config.cache_dir().join("downloads"),
        }
    }

    /// Cache location for a cask's container: `<token>--<version><ext>`.
    pub fn cache_path(&self, cask: &Cask) -> PathBuf {
        let ext = cask
            .url
            .as_ref()
            .map(|u| extension_of(&u.url))
            .unwrap_or_default();
        self.cache_dir
            .join(format!("{}--{}{}", cask.token, cask.version_label(), ext))
    }

    fn download_error(cask: &Cask, url: &str, msg: impl Into<String>) -> CasketError {
        CasketError::Download(cask.token.clone(), url.to_string(), msg.into())
    }

    fn fetch_to(&self, cask: &Cask, spec: &CaskUrl, url: &Url, dest: &Path) -> Result<()> {
        let temp_name = format!(
            ".{}.download",
            dest.file_name().unwrap_or_default().to_string_lossy()
        );
        let temp_path = dest.with_file_name(temp_name);
        if temp_path.exists() {
            if let Err(e) = fs::remove_file(&temp_path) {
                warn!(
                    "Could not remove existing temporary file {}: {}",
                    temp_path.display(),
                    e
                );
            }
        }

        if url.scheme() == "file" {
            let source = url
                .to_file_path()
                .map_err(|_| Self::download_error(cask, url.as_str(), "invalid file URL"))?;
            debug!("Copying {} to {}", source.display(), temp_path.display());
            fs::copy(&source, &temp_path).map_err(|e| {
                Self::download_error(cask, url.as_str(), format!("{}: {e}", source.display()))
            })?;
        } else {
            let client = build_http_client(spec)?;
            let request = build_request(&client, spec, url)?;
            let mut response = request.send().map_err(|e| {
                debug!("HTTP request failed for {}: {}", url, e);
                Self::download_error(cask, url.as_str(), e.to_string())
            })?;
            let status = response.status();
            debug!("Received HTTP status: {} for {}", status, url);
            if !status.is_success() {
                error!("HTTP error {} for URL {}", status, url);
                let msg = match status {
                    StatusCode::NOT_FOUND => "Resource not found (404)".to_string(),
                    StatusCode::FORBIDDEN => "Access forbidden (403)".to_string(),
                    other => format!("HTTP error {other}"),
                };
                return Err(Self::download_error(cask, url.as_str(), msg));
            }
            let mut temp_file = File::create(&temp_path)?;
            io::copy(&mut response, &mut temp_file)
                .map_err(|e| Self::download_error(cask, url.as_str(), e.to_string()))?;
        }

        fs::rename(&temp_path, dest)?;
        debug!("Moved download to final location: {}", dest.display());
        Ok(())
    }
}

impl Downloader for HttpDownloader {
    fn perform(&self, cask: &Cask, force: bool) -> Result<PathBuf> {
        let spec = cask
            .url
            .as_ref()
            .ok_or_else(|| CasketError::CaskError(format!("Cask '{}' has no url.", cask.token)))?;
        if let Some(using) = spec.using.as_deref() {
            if VCS_STRATEGIES.contains(&using) {
                return Err(Self::download_error(
                    cask,
                    &spec.url,
                    format!("download strategy '{using}' is not supported"),
                ));
            }
        }
        let url = validate_url(&spec.url)?;
        let checksum = cask.sha256.clone().unwrap_or(Checksum::NoCheck);
        let cache_path = self.cache_path(cask);

        if cache_path.is_file() {
            if force {
                debug!("Discarding cached download {}", cache_path.display());
                fs::remove_file(&cache_path)?;
            } else {
                match verify_checksum(&cache_path, &checksum) {
                    Ok(()) => {
                        debug!("Using cached download: {}", cache_path.display());
                        return Ok(cache_path);
                    }
                    Err(e) => debug!("Cached download rejected ({}), downloading again", e),
                }
            }
        }

        fs::create_dir_all(&self.cache_dir)?;
        debug!("Downloading {} to {}", url, cache_path.display());
        self.fetch_to(cask, spec, &url, &cache_path)?;
        verify_checksum(&cache_path, &checksum)?;
        Ok(cache_path)
    }
}

fn extension_of(url: &str) -> String {
    let file_name = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .unwrap_or_default();
    if let Some(ext) = COMPOUND_EXTENSIONS.iter().find(|ext| file_name.ends_with(*ext)) {
        return (*ext).to_string();
    }
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}

fn build_http_client(spec: &CaskUrl) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let agent = spec.user_agent.as_deref().unwrap_or(USER_AGENT_STRING);
    headers.insert(USER_AGENT, header_value(agent)?);
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(CasketError::from)
}

fn build_request(client: &Client, spec: &CaskUrl, url: &Url) -> Result<RequestBuilder> {
    let mut request = if spec.using.as_deref() == Some("post") || !spec.data.is_empty() {
        client.post(url.clone()).form(&spec.data)
    } else {
        client.get(url.clone())
    };
    if let Some(referer) = &spec.referer {
        request = request.header(REFERER, header_value(referer)?);
    }
    if !spec.cookies.is_empty() {
        let cookie = spec
            .cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        request = request.header(COOKIE, header_value(&cookie)?);
    }
    for line in &spec.header {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            CasketError::Generic(format!("Invalid header '{line}', expected 'Name: value'"))
        })?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| CasketError::Generic(format!("Invalid header name in '{line}': {e}")))?;
        request = request.header(name, header_value(value.trim())?);
    }
    Ok(request)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| CasketError::Generic(format!("Invalid header value '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use casket_common::model::Version;

    fn file_cask(token: &str, source: &Path, sha: Checksum) -> Cask {
        Cask {
            token: token.to_string(),
            version: Some(Version::Literal("1.0".into())),
            sha256: Some(sha),
            url: Some(CaskUrl {
                url: Url::from_file_path(source).unwrap().to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn copies_file_urls_into_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("payload.tar.gz");
        fs::write(&source, b"payload").unwrap();
        let config = Config::with_root(&tmp.path().join("root"));
        let downloader = HttpDownloader::new(&config);
        let cask = file_cask("thing", &source, Checksum::NoCheck);

        let path = downloader.perform(&cask, false).unwrap();
        assert_eq!(path, config.cache_dir().join("downloads/thing--1.0.tar.gz"));
        assert_eq!(fs::read(&path).unwrap(), b"payload");
    }

    #[test]
    fn checksum_mismatch_is_reported_and_not_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("payload.zip");
        fs::write(&source, b"payload").unwrap();
        let config = Config::with_root(&tmp.path().join("root"));
        let downloader = HttpDownloader::new(&config);
        let cask = file_cask("thing", &source, Checksum::Hex("0".repeat(64)));

        let err = downloader.perform(&cask, false).unwrap_err();
        assert!(matches!(err, CasketError::ChecksumMismatch { .. }));
        assert!(!downloader.cache_path(&cask).exists());
    }

    #[test]
    fn vcs_strategies_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let downloader = HttpDownloader::new(&Config::with_root(tmp.path()));
        let mut cask = file_cask("thing", &tmp.path().join("x"), Checksum::NoCheck);
        if let Some(url) = cask.url.as_mut() {
            url.using = Some("git".into());
        }
        assert!(matches!(
            downloader.perform(&cask, false),
            Err(CasketError::Download(..))
        ));
    }

    #[test]
    fn cache_extension_keeps_compound_suffixes() {
        assert_eq!(extension_of("https://x.test/a/b-1.0.tar.xz?dl=1"), ".tar.xz");
        assert_eq!(extension_of("https://x.test/app.dmg"), ".dmg");
        assert_eq!(extension_of("https://x.test/download"), "");
    }
}
