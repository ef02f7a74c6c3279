// casket-core/tests/common/mod.rs
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use casket_common::config::Config;
use casket_common::error::{CasketError, Result};
use casket_common::loader::TapLoader;
use casket_common::model::depends_on::{CpuKind, HardwareArch, MacOsVersion};
use casket_common::model::Cask;
use casket_core::exec::{CommandExecutor, CommandOutput, CommandSpec};
use casket_core::formula::FormulaManager;
use casket_core::install::InstallContext;
use casket_core::macos::{NoQuarantine, SystemInfo};
use casket_core::unpack::DefaultDetector;
use casket_net::Downloader;
use tempfile::TempDir;

/// Records every command and reports success without running anything,
/// except for commands with an argument containing a `fail_when` needle.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<CommandSpec>>,
    pub failing: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn fail_when(&self, needle: &str) {
        self.failing.lock().unwrap().push(needle.to_string());
    }

    /// Arguments of every recorded call to `executable`.
    pub fn args_of(&self, executable: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.executable == executable)
            .map(|c| c.args.clone())
            .collect()
    }

    /// Commands handed to `/bin/sh -c`, in order.
    pub fn shell_commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.executable == "/bin/sh")
            .filter_map(|c| c.args.get(1).cloned())
            .collect()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let failing = self.failing.lock().unwrap();
        if let Some(needle) = failing
            .iter()
            .find(|n| spec.args.iter().any(|a| a.contains(n.as_str())))
        {
            return Err(CasketError::CaskError(format!(
                "{} failed on '{}'",
                spec.executable, needle
            )));
        }
        Ok(CommandOutput::ok(""))
    }
}

/// Serves containers from a local directory, keyed by token.
pub struct LocalDownloader {
    pub containers: PathBuf,
    pub calls: AtomicUsize,
    pub fail: Mutex<Vec<String>>,
}

impl LocalDownloader {
    pub fn fail_for(&self, token: &str) {
        self.fail.lock().unwrap().push(token.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Downloader for LocalDownloader {
    fn perform(&self, cask: &Cask, _force: bool) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = cask.url.as_ref().map(|u| u.url.clone()).unwrap_or_default();
        if self.fail.lock().unwrap().contains(&cask.token) {
            return Err(CasketError::Download(
                cask.token.clone(),
                url,
                "connection refused".to_string(),
            ));
        }
        Ok(self.containers.join(&cask.token))
    }
}

pub struct AllFormulae;

impl FormulaManager for AllFormulae {
    fn is_installed(&self, _name: &str) -> bool {
        true
    }

    fn install(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn opt_prefix(&self, name: &str) -> PathBuf {
        PathBuf::from("/opt").join(name)
    }
}

pub struct FakeSystem {
    pub macos: Option<&'static str>,
}

impl SystemInfo for FakeSystem {
    fn macos_version(&self) -> Option<MacOsVersion> {
        self.macos.and_then(MacOsVersion::parse)
    }

    fn hardware_arch(&self) -> HardwareArch {
        HardwareArch {
            kind: CpuKind::Intel,
            bits: 64,
        }
    }

    fn x11_installed(&self) -> bool {
        false
    }
}

/// A throwaway prefix with a `homebrew/cask` tap and a directory of
/// containers.
pub struct Fixture {
    pub tmp: TempDir,
    pub executor: Arc<RecordingExecutor>,
    pub downloader: Arc<LocalDownloader>,
    pub ctx: InstallContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_macos(Some("14"))
    }

    pub fn with_macos(macos: Option<&'static str>) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let executor = Arc::new(RecordingExecutor::default());
        let downloader = Arc::new(LocalDownloader {
            containers: tmp.path().join("containers"),
            calls: AtomicUsize::new(0),
            fail: Mutex::new(Vec::new()),
        });
        let formulae: Arc<dyn FormulaManager> = Arc::new(AllFormulae);
        let ctx = InstallContext {
            loader: Arc::new(TapLoader::new(&config)),
            downloader: downloader.clone(),
            detector: Arc::new(DefaultDetector::new(executor.clone(), formulae.clone())),
            quarantine: Arc::new(NoQuarantine),
            system: Arc::new(FakeSystem { macos }),
            executor: executor.clone(),
            formulae,
            config,
        };
        Self {
            tmp,
            executor,
            downloader,
            ctx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn tap_dir(&self) -> PathBuf {
        self.config()
            .tap_path("homebrew/cask")
            .unwrap()
            .join("Casks")
    }

    /// Writes a cask definition into the tap.
    pub fn add_cask(&self, token: &str, json: &str) {
        let dir = self.tap_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{token}.json")), json).unwrap();
    }

    /// Creates the container directory for `token` holding empty app
    /// bundles.
    pub fn add_container(&self, token: &str, apps: &[&str]) -> PathBuf {
        let dir = self.downloader.containers.join(token);
        for app in apps {
            let contents = dir.join(app).join("Contents");
            fs::create_dir_all(&contents).unwrap();
            fs::write(contents.join("Info.plist"), app.as_bytes()).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// A cask with one app, a checksum and a url.
    pub fn add_app_cask(&self, token: &str, version: &str, app: &str) {
        self.add_cask(token, &app_cask_json(token, version, app, "[]"));
        self.add_container(token, &[app]);
    }

    pub fn load(&self, token: &str) -> Cask {
        self.ctx.loader.load(token).unwrap()
    }

    pub fn appdir(&self) -> &Path {
        self.config().appdir()
    }

    pub fn caskroom(&self, token: &str) -> PathBuf {
        self.config().caskroom_dir().join(token)
    }
}

pub const SHA: &str = "67cdb8a02803ef37fdbf7e0be205863172e41a561ca446cd84f0d7ab35a99d94";

pub fn app_cask_json(token: &str, version: &str, app: &str, deps: &str) -> String {
    format!(
        r#"{{
  "token": "{token}",
  "name": "{token}",
  "homepage": "https://example.com/{token}",
  "version": "{version}",
  "sha256": "{SHA}",
  "url": "https://example.com/{token}-{version}.zip",
  "depends_on": {{"cask": {deps}}},
  "artifacts": [{{"app": "{app}"}}]
}}"#
    )
}

/// An `Info.plist` declaring `bundle_id`.
pub fn info_plist_xml(bundle_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>CFBundleIdentifier</key>
  <string>{bundle_id}</string>
</dict>
</plist>
"#
    )
}

/// Every regular file and directory below `root`, sorted.
pub fn tree(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .flatten()
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}
