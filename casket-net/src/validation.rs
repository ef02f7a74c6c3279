// casket-net/src/validation.rs
use std::fs::{self, File};
use std::io;
use std::path::Path;

use casket_common::error::{CasketError, Result};
use casket_common::model::Checksum;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_of(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let bytes_copied = io::copy(&mut file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    debug!("Calculated SHA256: {} ({} bytes read)", actual, bytes_copied);
    Ok(actual)
}

/// Verifies `path` against `expected`. `:no_check` always passes.
///
/// A file that fails verification is deleted so the next attempt downloads
/// it again.
pub fn verify_checksum(path: &Path, expected: &Checksum) -> Result<()> {
    let expected = match expected {
        Checksum::NoCheck => {
            debug!("Skipping checksum verification for {}", path.display());
            return Ok(());
        }
        Checksum::Hex(hex) => hex,
    };
    debug!("Verifying checksum for: {}", path.display());
    let actual = sha256_of(path)?;
    debug!("Expected SHA256:   {}", expected);
    if actual.eq_ignore_ascii_case(expected) {
        return Ok(());
    }
    if let Err(e) = fs::remove_file(path) {
        warn!(
            "Failed to remove file with bad checksum {}: {}",
            path.display(),
            e
        );
    }
    Err(CasketError::ChecksumMismatch {
        path: path.to_path_buf(),
        expected: expected.clone(),
        actual,
    })
}

/// Parses a download locator. Only `https`, `http` and `file` are fetchable.
pub fn validate_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| CasketError::Generic(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" | "http" | "file" => Ok(url),
        other => Err(CasketError::Generic(format!(
            "Invalid URL scheme for '{url_str}': '{other}' is not supported"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn matching_checksum_passes_case_insensitively() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("empty");
        fs::write(&file, b"").unwrap();
        verify_checksum(&file, &Checksum::Hex(EMPTY_SHA.to_uppercase())).unwrap();
        assert!(file.exists());
    }

    #[test]
    fn mismatch_reports_both_digests_and_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("payload");
        fs::write(&file, b"").unwrap();
        let expected = "0".repeat(64);
        match verify_checksum(&file, &Checksum::Hex(expected.clone())) {
            Err(CasketError::ChecksumMismatch {
                expected: e,
                actual,
                ..
            }) => {
                assert_eq!(e, expected);
                assert_eq!(actual, EMPTY_SHA);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!file.exists());
    }

    #[test]
    fn no_check_skips_hashing() {
        verify_checksum(Path::new("/does/not/exist"), &Checksum::NoCheck).unwrap();
    }

    #[test]
    fn url_schemes() {
        assert!(validate_url("https://example.com/a.zip").is_ok());
        assert!(validate_url("file:///tmp/a.zip").is_ok());
        assert!(validate_url("ftp://example.com/a.zip").is_err());
        assert!(validate_url("not a url").is_err());
    }
}
