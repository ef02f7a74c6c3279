// casket-core/src/unpack/dmg.rs
//! Disk images, mounted with `hdiutil` and copied out with `ditto`.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use casket_common::error::{CasketError, Result};
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::UnpackStrategy;
use crate::exec::{CommandExecutor, CommandSpec};

const HDIUTIL: &str = "/usr/bin/hdiutil";
const DITTO: &str = "/usr/bin/ditto";

#[derive(Deserialize)]
struct AttachOutput {
    #[serde(rename = "system-entities", default)]
    system_entities: Vec<SystemEntity>,
}

#[derive(Deserialize)]
struct SystemEntity {
    #[serde(rename = "mount-point")]
    mount_point: Option<PathBuf>,
}

pub struct DmgStrategy {
    path: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl DmgStrategy {
    pub fn new(path: PathBuf, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { path, executor }
    }

    fn mount(&self, mount_root: &Path) -> Result<Vec<PathBuf>> {
        debug!("Mounting DMG: {}", self.path.display());
        // Images with a licence agreement prompt on stdin; "qy" quits and agrees.
        let output = self.executor.run(
            &CommandSpec::new(HDIUTIL)
                .arg("attach")
                .args(["-plist", "-nobrowse", "-readonly", "-mountrandom"])
                .arg(mount_root)
                .arg(&self.path)
                .input("qy\n")
                .must_succeed(true),
        )?;
        let mounts = parse_mount_points(&output.stdout)?;
        if mounts.is_empty() {
            error!("No mount point in hdiutil output for {}", self.path.display());
            return Err(CasketError::Generic(format!(
                "Failed to determine mount point for '{}'",
                self.path.display()
            )));
        }
        Ok(mounts)
    }

    fn detach(&self, mount: &Path) {
        debug!("Unmounting DMG from: {}", mount.display());
        let plain = CommandSpec::new(HDIUTIL).arg("detach").arg(mount);
        let detached = matches!(self.executor.execute(&plain), Ok(out) if out.success());
        if detached {
            return;
        }
        let forced = CommandSpec::new(HDIUTIL)
            .args(["detach", "-force"])
            .arg(mount);
        match self.executor.execute(&forced) {
            Ok(out) if out.success() => {}
            Ok(out) => warn!("Failed to detach {}: {}", mount.display(), out.stderr.trim()),
            Err(e) => warn!("Failed to detach {}: {}", mount.display(), e),
        }
    }
}

impl std::fmt::Debug for DmgStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmgStrategy").field("path", &self.path).finish()
    }
}

fn parse_mount_points(stdout: &str) -> Result<Vec<PathBuf>> {
    let parsed: AttachOutput = plist::from_bytes(stdout.as_bytes()).map_err(|e| {
        CasketError::Generic(format!("Failed to parse hdiutil output: {e}"))
    })?;
    Ok(parsed
        .system_entities
        .into_iter()
        .filter_map(|e| e.mount_point)
        .collect())
}

impl UnpackStrategy for DmgStrategy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &'static str {
        "dmg"
    }

    fn extract(&self, to: &Path, _basename: &str) -> Result<()> {
        std::fs::create_dir_all(to)?;
        let mount_root = tempfile::tempdir()?;
        let mounts = self.mount(mount_root.path())?;

        let mut result = Ok(());
        for mount in &mounts {
            if result.is_ok() {
                debug!("Copying contents of {} to {}", mount.display(), to.display());
                result = self
                    .executor
                    .run(
                        &CommandSpec::new(DITTO)
                            .args(["--rsrc", "--extattr"])
                            .arg(mount)
                            .arg(to)
                            .must_succeed(true),
                    )
                    .map(|_| ());
            }
            self.detach(mount);
        }
        result
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::exec::CommandOutput;

    const ATTACH: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>system-entities</key>
  <array>
    <dict>
      <key>content-hint</key>
      <string>GUID_partition_scheme</string>
    </dict>
    <dict>
      <key>content-hint</key>
      <string>Apple_HFS</string>
      <key>mount-point</key>
      <string>/private/tmp/dmg.Ab12Cd</string>
    </dict>
  </array>
</dict>
</plist>"#;

    #[derive(Default)]
    struct Hdiutil {
        ditto_fails: bool,
        calls: Mutex<Vec<String>>,
    }

    impl CommandExecutor for Hdiutil {
        fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.display());
            if spec.runs("hdiutil") && spec.args[0] == "attach" {
                assert_eq!(spec.input.as_deref(), Some("qy\n"));
                return Ok(CommandOutput::ok(ATTACH));
            }
            if spec.runs("ditto") && self.ditto_fails {
                return Ok(CommandOutput::failed(1, "no space"));
            }
            Ok(CommandOutput::ok(""))
        }
    }

    #[test]
    fn parses_mount_point_from_plist() {
        assert_eq!(
            parse_mount_points(ATTACH).unwrap(),
            vec![PathBuf::from("/private/tmp/dmg.Ab12Cd")]
        );
    }

    #[test]
    fn detaches_even_when_copy_fails() {
        let exec = Arc::new(Hdiutil {
            ditto_fails: true,
            ..Default::default()
        });
        let tmp = tempfile::tempdir().unwrap();
        let strategy = DmgStrategy::new(tmp.path().join("a.dmg"), exec.clone());
        assert!(strategy.extract(&tmp.path().join("to"), "a.dmg").is_err());

        let calls = exec.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.contains("ditto")));
        assert_eq!(
            calls.last().map(String::as_str),
            Some("/usr/bin/hdiutil detach /private/tmp/dmg.Ab12Cd")
        );
    }
}
