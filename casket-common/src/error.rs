use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CasketError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Git Error: {0}")]
    Git(#[from] Arc<git2::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    // --- Loading ---
    #[error("Cask '{0}' is unavailable: {1}")]
    CaskUnavailable(String, String),

    #[error("Cask '{0}' is unreadable: {1}")]
    CaskUnreadable(String, String),

    #[error("Cask '{token}' was loaded from a file named '{file_token}'.")]
    CaskTokenMismatch { token: String, file_token: String },

    #[error("Cask '{0}' definition is invalid: {1}")]
    CaskInvalid(String, String),

    // --- Dependency graph ---
    #[error("Cask '{0}' depends on itself.")]
    CaskSelfReferencingDependency(String),

    #[error("Cask '{0}' includes cyclic dependencies on other Casks: {1}")]
    CaskCyclicDependency(String, String),

    // --- Preconditions ---
    #[error("Cask '{0}' is already installed.")]
    CaskAlreadyInstalled(String),

    #[error("Cask '{0}' is not installed.")]
    CaskNotInstalled(String),

    #[error("Cask '{0}' conflicts with '{1}'.")]
    CaskConflict(String, String),

    #[error("Cask '{0}' does not have a sha256 checksum defined and was not installed. This means you have the --require-sha option set, perhaps in your HOMEBREW_CASK_OPTS.")]
    CaskNoShasum(String),

    #[error("Cask '{0}' requires XQuartz.")]
    CaskX11Dependency(String),

    // --- Fetch / verify ---
    #[error("DownloadError: Failed to download '{0}' from '{1}': {2}")]
    Download(String, String, String),

    #[error("Download failed on Cask '{0}' with message: {1}")]
    CaskDownloadFailed(String, Arc<CasketError>),

    #[error("SHA256 mismatch\nExpected: {expected}\n  Actual: {actual}\n    File: {}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // --- Commands and containers ---
    #[error("Command failed: {command}\nexit status: {status}\n{stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("{0}")]
    CaskError(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl CasketError {
    /// Whether this is one of the loader's "cannot find/read that cask" errors.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CasketError::CaskUnavailable(..))
    }
}

impl From<std::io::Error> for CasketError {
    fn from(err: std::io::Error) -> Self {
        CasketError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for CasketError {
    fn from(err: reqwest::Error) -> Self {
        CasketError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for CasketError {
    fn from(err: serde_json::Error) -> Self {
        CasketError::Json(Arc::new(err))
    }
}

impl From<git2::Error> for CasketError {
    fn from(err: git2::Error) -> Self {
        CasketError::Git(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CasketError>;
