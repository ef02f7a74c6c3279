// casket-core/src/macos/quarantine.rs
use std::path::Path;

use casket_common::error::Result;
use casket_common::model::Cask;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub const QUARANTINE_ATTRIBUTE: &str = "com.apple.quarantine";
const AGENT_NAME: &str = "casket";

/// Gatekeeper quarantine for downloads and the files staged from them.
pub trait Quarantine {
    /// Marks a freshly downloaded container.
    fn cask(&self, cask: &Cask, download: &Path) -> Result<()>;

    /// Copies the download's quarantine onto everything staged below `to`.
    fn propagate(&self, from: &Path, to: &Path) -> Result<()>;
}

/// Does nothing; used with `--no-quarantine` and off macOS.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoQuarantine;

impl Quarantine for NoQuarantine {
    fn cask(&self, _cask: &Cask, _download: &Path) -> Result<()> {
        Ok(())
    }

    fn propagate(&self, _from: &Path, _to: &Path) -> Result<()> {
        Ok(())
    }
}

/// Reads and writes the `com.apple.quarantine` extended attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct XattrQuarantine;

// Current time as hex seconds since the epoch.
fn timestamp_hex() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{secs:x}")
}

/// `flags;timestamp;agent;uuid` with the "downloaded, check pending" flags.
fn quarantine_value() -> String {
    let uuid = Uuid::new_v4().as_hyphenated().to_string().to_uppercase();
    format!("0081;{};{AGENT_NAME};{uuid}", timestamp_hex())
}

impl Quarantine for XattrQuarantine {
    fn cask(&self, cask: &Cask, download: &Path) -> Result<()> {
        if !cfg!(target_os = "macos") {
            debug!("Not on macOS, skipping quarantine for {}", download.display());
            return Ok(());
        }
        if xattr::get(download, QUARANTINE_ATTRIBUTE)?.is_some() {
            debug!("{} is already quarantined", download.display());
            return Ok(());
        }
        let value = quarantine_value();
        debug!(
            "Quarantining download of {} at {}: value='{}'",
            cask.token,
            download.display(),
            value
        );
        xattr::set(download, QUARANTINE_ATTRIBUTE, value.as_bytes())?;
        Ok(())
    }

    fn propagate(&self, from: &Path, to: &Path) -> Result<()> {
        if !cfg!(target_os = "macos") {
            return Ok(());
        }
        let Some(value) = xattr::get(from, QUARANTINE_ATTRIBUTE)? else {
            debug!("{} carries no quarantine, nothing to propagate", from.display());
            return Ok(());
        };
        debug!("Propagating quarantine from {} to {}", from.display(), to.display());
        for entry in WalkDir::new(to).follow_links(false).into_iter().flatten() {
            if entry.path_is_symlink() {
                continue;
            }
            if let Err(e) = xattr::set(entry.path(), QUARANTINE_ATTRIBUTE, &value) {
                warn!(
                    "Failed to set quarantine attribute on {}: {}",
                    entry.path().display(),
                    e
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_has_four_fields_with_download_flags() {
        let value = quarantine_value();
        let fields: Vec<&str> = value.split(';').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0], "0081");
        assert_eq!(fields[2], AGENT_NAME);
        assert!(Uuid::parse_str(fields[3]).is_ok());
    }
}
