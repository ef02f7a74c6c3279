// casket-core/src/artifacts/uninstall.rs
//! `uninstall` and `zap` directives.
//!
//! Directives run in a fixed order. Without `force` the first failure
//! aborts the stanza; with `force` each failure is logged and the remaining
//! directives still run.
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use casket_common::error::{CasketError, Result};
use casket_common::model::artifact::{ScriptSpec, UninstallDirectives};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use super::pkg_receipt::PkgReceipt;
use super::{ArtifactContext, PhaseOptions};
use crate::exec::CommandSpec;
use crate::helpers;

const LAUNCHCTL: &str = "/bin/launchctl";
const OSASCRIPT: &str = "/usr/bin/osascript";
const QUIT_TIMEOUT: Duration = Duration::from_secs(10);
const QUIT_POLL: Duration = Duration::from_millis(500);

lazy_static! {
    static ref SIGNAL_NAME: Regex = Regex::new(r"^(?:SIG)?([A-Z0-9]+)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stanza {
    Uninstall,
    Zap,
}

impl Stanza {
    fn name(self) -> &'static str {
        match self {
            Stanza::Uninstall => "uninstall",
            Stanza::Zap => "zap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    EarlyScript,
    Launchctl,
    Quit,
    Signal,
    LoginItem,
    Kext,
    Script,
    Pkgutil,
    Delete,
    Trash,
    Rmdir,
}

const ORDER: [Directive; 11] = [
    Directive::EarlyScript,
    Directive::Launchctl,
    Directive::Quit,
    Directive::Signal,
    Directive::LoginItem,
    Directive::Kext,
    Directive::Script,
    Directive::Pkgutil,
    Directive::Delete,
    Directive::Trash,
    Directive::Rmdir,
];

impl Directive {
    fn key(self) -> &'static str {
        match self {
            Directive::EarlyScript => "early_script",
            Directive::Launchctl => "launchctl",
            Directive::Quit => "quit",
            Directive::Signal => "signal",
            Directive::LoginItem => "login_item",
            Directive::Kext => "kext",
            Directive::Script => "script",
            Directive::Pkgutil => "pkgutil",
            Directive::Delete => "delete",
            Directive::Trash => "trash",
            Directive::Rmdir => "rmdir",
        }
    }

    fn is_present(self, d: &UninstallDirectives) -> bool {
        match self {
            Directive::EarlyScript => d.early_script.is_some(),
            Directive::Launchctl => !d.launchctl.is_empty(),
            Directive::Quit => !d.quit.is_empty(),
            Directive::Signal => !d.signal.is_empty(),
            Directive::LoginItem => !d.login_item.is_empty(),
            Directive::Kext => !d.kext.is_empty(),
            Directive::Script => d.script.is_some(),
            Directive::Pkgutil => !d.pkgutil.is_empty(),
            Directive::Delete => !d.delete.is_empty(),
            Directive::Trash => !d.trash.is_empty(),
            Directive::Rmdir => !d.rmdir.is_empty(),
        }
    }
}

pub fn run(
    stanza: Stanza,
    directives: &UninstallDirectives,
    ctx: &ArtifactContext<'_>,
    options: PhaseOptions,
) -> Result<()> {
    let runner = Runner {
        stanza,
        directives,
        ctx,
        options,
    };
    for directive in ORDER {
        if !directive.is_present(directives) {
            continue;
        }
        debug!(
            "[{}] Running {} {}",
            ctx.cask.token,
            stanza.name(),
            directive.key()
        );
        if let Err(e) = runner.apply(directive) {
            if !options.force {
                return Err(e);
            }
            warn!(
                "{} {} failed for {}: {}",
                stanza.name(),
                directive.key(),
                ctx.cask.token,
                e
            );
        }
    }
    Ok(())
}

struct Runner<'r, 'a> {
    stanza: Stanza,
    directives: &'r UninstallDirectives,
    ctx: &'r ArtifactContext<'a>,
    options: PhaseOptions,
}

impl Runner<'_, '_> {
    fn apply(&self, directive: Directive) -> Result<()> {
        let d = self.directives;
        match directive {
            Directive::EarlyScript => self.script(d.early_script.as_ref(), directive),
            Directive::Launchctl => self.each(directive, &d.launchctl, |s| self.launchctl(s)),
            Directive::Quit => self.each(directive, &d.quit, |id| self.quit(id)),
            Directive::Signal => {
                self.each(directive, &d.signal, |(signal, id)| self.signal(signal, id))
            }
            Directive::LoginItem => self.each(directive, &d.login_item, |n| self.login_item(n)),
            Directive::Kext => self.each(directive, &d.kext, |k| self.kext(k)),
            Directive::Script => self.script(d.script.as_ref(), directive),
            Directive::Pkgutil => self.each(directive, &d.pkgutil, |r| self.pkgutil(r)),
            Directive::Delete => self.delete(&d.delete),
            Directive::Trash => self.trash(&d.trash),
            Directive::Rmdir => self.rmdir(&d.rmdir),
        }
    }

    /// Applies `op` to every entry of a list directive. With `force` a
    /// failing entry is logged and the rest still run.
    fn each<'i, T: 'i>(
        &self,
        directive: Directive,
        items: impl IntoIterator<Item = &'i T>,
        mut op: impl FnMut(&'i T) -> Result<()>,
    ) -> Result<()> {
        for item in items {
            if let Err(e) = op(item) {
                if !self.options.force {
                    return Err(e);
                }
                warn!(
                    "{} {} failed for {}: {}",
                    self.stanza.name(),
                    directive.key(),
                    self.ctx.cask.token,
                    e
                );
            }
        }
        Ok(())
    }

    fn launchctl(&self, service: &str) -> Result<()> {
        info!("Removing launchctl service {}", service);
        let executor = self.ctx.executor;
        for sudo in [false, true] {
            let status = executor.execute(
                &CommandSpec::new(LAUNCHCTL)
                    .args(["list", service])
                    .sudo(sudo),
            )?;
            if status.stdout.starts_with('{') {
                executor.run(
                    &CommandSpec::new(LAUNCHCTL)
                        .args(["remove", service])
                        .sudo(sudo)
                        .must_succeed(true),
                )?;
            }

            let base = if sudo {
                PathBuf::from("/")
            } else {
                self.ctx.config.home.clone()
            };
            for dir in ["Library/LaunchAgents", "Library/LaunchDaemons"] {
                let plist = base.join(dir).join(format!("{service}.plist"));
                if plist.exists() {
                    executor.run(
                        &CommandSpec::new("/bin/rm")
                            .args(["-f", "--"])
                            .arg(&plist)
                            .sudo(sudo)
                            .must_succeed(true),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Pids from `launchctl list` whose label belongs to `bundle_id`.
    fn running_pids(&self, bundle_id: &str) -> Result<Vec<u32>> {
        let pattern = Regex::new(&format!(
            r"^(?:application\.)?{}(?:\.\d+){{0,2}}$",
            regex::escape(bundle_id)
        ))
        .map_err(|e| CasketError::Generic(format!("Invalid bundle id '{bundle_id}': {e}")))?;
        let output = self
            .ctx
            .executor
            .run(&CommandSpec::new(LAUNCHCTL).arg("list").must_succeed(true))?;
        Ok(output
            .stdout
            .lines()
            .filter_map(|line| {
                let mut fields = line.split('\t');
                let pid = fields.next()?.trim().parse::<u32>().ok()?;
                let label = fields.nth(1)?.trim();
                (pid != 0 && pattern.is_match(label)).then_some(pid)
            })
            .collect())
    }

    fn quit(&self, bundle_id: &str) -> Result<()> {
        if self.running_pids(bundle_id)?.is_empty() {
            debug!("Application '{}' is not running", bundle_id);
            return Ok(());
        }
        info!("Quitting application ID {}", bundle_id);
        let deadline = Instant::now() + QUIT_TIMEOUT;
        let script = format!("tell application id \"{bundle_id}\" to quit");
        loop {
            let quit = self
                .ctx
                .executor
                .execute(&CommandSpec::new(OSASCRIPT).args(["-e", script.as_str()]).sudo(true))?;
            if quit.success() && self.running_pids(bundle_id)?.is_empty() {
                info!("Application '{}' quit successfully.", bundle_id);
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("Application '{}' did not quit.", bundle_id);
                return Ok(());
            }
            thread::sleep(QUIT_POLL);
        }
    }

    fn signal(&self, signal: &str, bundle_id: &str) -> Result<()> {
        let name = SIGNAL_NAME
            .captures(&signal.to_uppercase())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| CasketError::CaskError(format!("Invalid signal '{signal}'.")))?;
        let pids = self.running_pids(bundle_id)?;
        if pids.is_empty() {
            return Ok(());
        }
        info!("Signalling '{}' to application ID '{}'", name, bundle_id);
        self.ctx.executor.run(
            &CommandSpec::new("/bin/kill")
                .arg(format!("-{name}"))
                .args(pids.iter().map(u32::to_string))
                .must_succeed(true),
        )?;
        Ok(())
    }

    fn login_item(&self, name: &str) -> Result<()> {
        info!("Removing login item {}", name);
        self.ctx.executor.run(
            &CommandSpec::new(OSASCRIPT)
                .arg("-e")
                .arg(format!(
                    "tell application \"System Events\" to delete every login item whose name is \"{name}\""
                ))
                .must_succeed(true),
        )?;
        Ok(())
    }

    fn kext(&self, kext: &str) -> Result<()> {
        info!("Unloading kernel extension {}", kext);
        let executor = self.ctx.executor;
        let loaded = executor.run(
            &CommandSpec::new("/usr/sbin/kextstat")
                .args(["-l", "-b", kext])
                .sudo(true)
                .must_succeed(true),
        )?;
        if loaded.stdout.trim().len() > 1 {
            executor.run(
                &CommandSpec::new("/sbin/kextunload")
                    .args(["-b", kext])
                    .sudo(true)
                    .must_succeed(true),
            )?;
        }
        let found = executor.run(
            &CommandSpec::new("/usr/sbin/kextfind")
                .args(["-b", kext])
                .sudo(true)
                .must_succeed(true),
        )?;
        for path in found.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            info!("Removing kernel extension {}", path);
            executor.run(
                &CommandSpec::new("/bin/rm")
                    .args(["-rf", path])
                    .sudo(true)
                    .must_succeed(true),
            )?;
        }
        Ok(())
    }

    fn script(&self, script: Option<&ScriptSpec>, directive: Directive) -> Result<()> {
        let Some(script) = script else {
            return Ok(());
        };
        info!("Running {} script {}", self.stanza.name(), script.executable);
        let path = if script.executable.starts_with('~') || Path::new(&script.executable).is_absolute()
        {
            self.ctx.config.expand_home(&script.executable)
        } else {
            self.ctx.staged(&script.executable)
        };
        if !path.exists() {
            let message = format!(
                "{} {} {} does not exist",
                self.stanza.name(),
                directive.key(),
                script.executable
            );
            if !self.options.force {
                return Err(CasketError::CaskError(format!("{message}.")));
            }
            warn!("{}, skipping.", message);
            return Ok(());
        }

        let executor = self.ctx.executor;
        executor.execute(&CommandSpec::new("/bin/chmod").args(["--", "+x"]).arg(&path))?;
        let mut command = CommandSpec::new(&path)
            .args(&script.args)
            .sudo(script.sudo)
            .must_succeed(script.must_succeed);
        if let Some(input) = &script.input {
            command = command.input(input.clone());
        }
        executor.run(&command)?;
        Ok(())
    }

    fn pkgutil(&self, regex: &str) -> Result<()> {
        info!("Uninstalling packages matching {}", regex);
        for receipt in PkgReceipt::all_matching(regex, self.ctx.executor, self.ctx.config)? {
            info!("{}", receipt.package_id);
            receipt.uninstall()?;
        }
        Ok(())
    }

    /// Expands each declared path, skipping relative and protected ones.
    fn resolved_paths(&self, action: &str, paths: &[String]) -> Vec<(String, Vec<PathBuf>)> {
        let mut out = Vec::new();
        for path in paths {
            let resolved = self.ctx.config.expand_home(path);
            if resolved.is_relative() || helpers::has_parent_component(&resolved) {
                warn!("Skipping {} for relative path '{}'.", action, path);
                continue;
            }
            if helpers::is_undeletable(&resolved, self.ctx.config) {
                warn!("Skipping {} for undeletable path '{}'.", action, path);
                continue;
            }
            let matches: Vec<PathBuf> = match glob::glob(&resolved.to_string_lossy()) {
                Ok(paths) => paths.flatten().collect(),
                Err(e) => {
                    warn!("Invalid {} pattern '{}': {}", action, path, e);
                    continue;
                }
            };
            out.push((path.clone(), matches));
        }
        out
    }

    fn delete(&self, paths: &[String]) -> Result<()> {
        info!("Removing files:");
        for (path, resolved) in self.resolved_paths("delete", paths) {
            info!("{}", path);
            if resolved.is_empty() {
                continue;
            }
            let input = resolved
                .iter()
                .map(|p| p.to_string_lossy())
                .collect::<Vec<_>>()
                .join("\0");
            self.ctx.executor.run(
                &CommandSpec::new("/usr/bin/xargs")
                    .args(["-0", "--", "/bin/rm", "-r", "-f", "--"])
                    .input(input)
                    .sudo(true)
                    .must_succeed(true),
            )?;
        }
        Ok(())
    }

    fn trash(&self, paths: &[String]) -> Result<()> {
        info!("Trashing files:");
        for (path, resolved) in self.resolved_paths("trash", paths) {
            info!("{}", path);
            if resolved.is_empty() {
                continue;
            }
            trash::delete_all(&resolved).map_err(|e| {
                CasketError::CaskError(format!("Failed to trash '{path}': {e}"))
            })?;
        }
        Ok(())
    }

    fn rmdir(&self, paths: &[String]) -> Result<()> {
        info!("Removing directories if empty:");
        let executor = self.ctx.executor;
        for (path, resolved) in self.resolved_paths("rmdir", paths) {
            info!("{}", path);
            for dir in resolved.into_iter().filter(|p| p.is_dir()) {
                let ds_store = dir.join(".DS_Store");
                if ds_store.exists() {
                    executor.run(
                        &CommandSpec::new("/bin/rm")
                            .args(["-f", "--"])
                            .arg(&ds_store)
                            .sudo(true)
                            .must_succeed(true),
                    )?;
                }
                executor.execute(&CommandSpec::new("/bin/rmdir").arg("--").arg(&dir).sudo(true))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use casket_common::config::Config;
    use casket_common::model::Cask;

    use super::*;
    use crate::exec::{CommandExecutor, CommandOutput};

    #[derive(Default)]
    struct Recorder {
        launchctl_list: String,
        broken_service: Option<String>,
        calls: RefCell<Vec<CommandSpec>>,
    }

    impl CommandExecutor for Recorder {
        fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.borrow_mut().push(spec.clone());
            if spec.runs("launchctl") && spec.args == ["list"] {
                return Ok(CommandOutput::ok(self.launchctl_list.clone()));
            }
            if let Some(broken) = &self.broken_service {
                if spec.runs("launchctl") && spec.args.contains(broken) {
                    return Err(CasketError::CaskError(format!("launchctl failed for {broken}")));
                }
            }
            if spec.runs("xargs") {
                for p in spec.input.as_deref().unwrap_or_default().split('\0') {
                    helpers::remove_native(Path::new(p))?;
                }
            }
            Ok(CommandOutput::ok(""))
        }
    }

    fn cask() -> Cask {
        Cask::from_json(r#"{"token": "cleanup", "version": "1"}"#).unwrap()
    }

    #[test]
    fn directives_run_in_fixed_order() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let cask = cask();
        let doomed = tmp.path().join("leftovers");
        fs::create_dir_all(doomed.join("a")).unwrap();

        let directives = UninstallDirectives {
            delete: vec![format!("{}/*", doomed.display())],
            launchctl: vec!["com.example.agent".into()],
            login_item: vec!["Example".into()],
            kext: vec!["com.example.kext".into()],
            ..Default::default()
        };
        let recorder = Recorder::default();
        let ctx = ArtifactContext::new(&config, &recorder, &cask);
        run(Stanza::Uninstall, &directives, &ctx, PhaseOptions::default()).unwrap();

        let programs: Vec<String> = recorder
            .calls
            .borrow()
            .iter()
            .map(|c| c.executable.clone())
            .collect();
        let first = |name: &str| programs.iter().position(|p| p == name).unwrap();
        assert!(first(LAUNCHCTL) < first(OSASCRIPT));
        assert!(first(OSASCRIPT) < first("/usr/sbin/kextstat"));
        assert!(first("/usr/sbin/kextstat") < first("/usr/bin/xargs"));
        assert!(!doomed.join("a").exists());
        assert!(doomed.exists());
    }

    #[test]
    fn missing_script_fails_unless_forced() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let cask = cask();
        let directives = UninstallDirectives {
            script: Some(ScriptSpec {
                executable: "uninstall.sh".into(),
                args: vec![],
                sudo: false,
                must_succeed: true,
                input: None,
            }),
            login_item: vec!["After".into()],
            ..Default::default()
        };
        let recorder = Recorder::default();
        let ctx = ArtifactContext::new(&config, &recorder, &cask);

        let err = run(Stanza::Uninstall, &directives, &ctx, PhaseOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "uninstall script uninstall.sh does not exist.");

        let force = PhaseOptions {
            force: true,
            ..Default::default()
        };
        run(Stanza::Uninstall, &directives, &ctx, force).unwrap();
        assert!(recorder.calls.borrow().iter().any(|c| c.runs("osascript")));
    }

    #[test]
    fn relative_and_protected_paths_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let cask = cask();
        let directives = UninstallDirectives {
            delete: vec!["relative/path".into(), "/Library".into(), "/tmp/../etc".into()],
            ..Default::default()
        };
        let recorder = Recorder::default();
        let ctx = ArtifactContext::new(&config, &recorder, &cask);
        run(Stanza::Zap, &directives, &ctx, PhaseOptions::default()).unwrap();
        assert!(recorder.calls.borrow().is_empty());
    }

    #[test]
    fn signal_targets_matching_processes_only() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let cask = cask();
        let recorder = Recorder {
            launchctl_list: "PID\tStatus\tLabel\n\
                             123\t0\tapplication.com.example.app.4567.8901\n\
                             -\t0\tcom.example.app.helper\n\
                             456\t0\tcom.example.application\n"
                .to_string(),
            ..Default::default()
        };
        let directives = UninstallDirectives {
            signal: vec![("TERM".into(), "com.example.app".into())],
            ..Default::default()
        };
        let ctx = ArtifactContext::new(&config, &recorder, &cask);
        run(Stanza::Uninstall, &directives, &ctx, PhaseOptions::default()).unwrap();

        let calls = recorder.calls.borrow();
        let kill = calls.iter().find(|c| c.runs("kill")).unwrap();
        assert_eq!(kill.args, vec!["-TERM".to_string(), "123".to_string()]);
    }

    #[test]
    fn forced_list_directive_continues_past_failing_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let cask = cask();
        let recorder = Recorder {
            broken_service: Some("com.example.first".into()),
            ..Default::default()
        };
        let directives = UninstallDirectives {
            launchctl: vec!["com.example.first".into(), "com.example.second".into()],
            ..Default::default()
        };
        let ctx = ArtifactContext::new(&config, &recorder, &cask);
        let lists_second = |r: &Recorder| {
            r.calls
                .borrow()
                .iter()
                .any(|c| c.runs("launchctl") && c.args.iter().any(|a| a == "com.example.second"))
        };

        run(Stanza::Uninstall, &directives, &ctx, PhaseOptions::default()).unwrap_err();
        assert!(!lists_second(&recorder));

        let force = PhaseOptions {
            force: true,
            ..Default::default()
        };
        run(Stanza::Uninstall, &directives, &ctx, force).unwrap();
        assert!(lists_second(&recorder));
    }
}
