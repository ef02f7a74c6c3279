// casket-core/src/macos/accessibility.rs
//! Accessibility (TCC) grants for casks that declare `accessibility_access`.
use std::path::Path;

use casket_common::error::Result;
use casket_common::model::depends_on::MacOsVersion;
use plist::Value as PlistValue;
use tracing::{debug, warn};

use super::system::SystemInfo;
use crate::exec::{CommandExecutor, CommandSpec};

const TCC_DB: &str = "/Library/Application Support/com.apple.TCC/TCC.db";

/// Last release whose TCC database may be edited directly.
fn last_editable_release() -> Option<MacOsVersion> {
    MacOsVersion::parse("el_capitan")
}

fn tcc_editable(system: &dyn SystemInfo) -> bool {
    match (system.macos_version(), last_editable_release()) {
        (Some(running), Some(limit)) => running <= limit,
        _ => false,
    }
}

/// Reads `CFBundleIdentifier` from an app bundle's `Info.plist`.
pub fn bundle_identifier(app_path: &Path) -> Option<String> {
    let info_plist_path = app_path.join("Contents/Info.plist");
    if !info_plist_path.is_file() {
        debug!("Info.plist not found at {}", info_plist_path.display());
        return None;
    }
    match PlistValue::from_file(&info_plist_path) {
        Ok(PlistValue::Dictionary(dict)) => dict
            .get("CFBundleIdentifier")
            .and_then(PlistValue::as_string)
            .map(String::from),
        Ok(_) => {
            warn!("Info.plist at {} is not a dictionary", info_plist_path.display());
            None
        }
        Err(e) => {
            warn!("Failed to parse Info.plist at {}: {}", info_plist_path.display(), e);
            None
        }
    }
}

pub fn enable(
    system: &dyn SystemInfo,
    executor: &dyn CommandExecutor,
    bundle_id: &str,
) -> Result<()> {
    if !tcc_editable(system) {
        warn!(
            "Accessibility access cannot be enabled automatically on this version of macOS. \
             See System Preferences to enable it manually."
        );
        return Ok(());
    }
    executor.run(
        &CommandSpec::new("/usr/bin/sqlite3")
            .arg(TCC_DB)
            .arg(format!(
                "INSERT OR REPLACE INTO access VALUES('kTCCServiceAccessibility','{bundle_id}',0,1,1,NULL,NULL);"
            ))
            .sudo(true)
            .must_succeed(true),
    )?;
    Ok(())
}

pub fn disable(
    system: &dyn SystemInfo,
    executor: &dyn CommandExecutor,
    bundle_id: &str,
) -> Result<()> {
    if !tcc_editable(system) {
        warn!(
            "Accessibility access cannot be disabled automatically on this version of macOS. \
             See System Preferences to disable it manually."
        );
        return Ok(());
    }
    executor.run(
        &CommandSpec::new("/usr/bin/sqlite3")
            .arg(TCC_DB)
            .arg(format!("DELETE FROM access WHERE client='{bundle_id}';"))
            .sudo(true)
            .must_succeed(true),
    )?;
    Ok(())
}
