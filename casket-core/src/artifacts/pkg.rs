// casket-core/src/artifacts/pkg.rs
//! `pkg` stanzas, run through the macOS `installer` tool.
use std::path::Path;

use casket_common::error::{CasketError, Result};
use casket_common::model::artifact::PkgSpec;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{to_sentence, ArtifactContext, PhaseOptions};
use crate::exec::CommandSpec;
use crate::helpers::current_user;

const INSTALLER: &str = "/usr/sbin/installer";

/// `.pkg` files anywhere below `staged`, relative to it.
fn staged_pkgs(staged: &Path) -> Vec<String> {
    let mut found: Vec<String> = WalkDir::new(staged)
        .into_iter()
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "pkg"))
        .filter_map(|e| {
            e.path()
                .strip_prefix(staged)
                .ok()
                .map(|p| format!("'{}'", p.display()))
        })
        .collect();
    found.sort();
    found
}

/// Writes the choice changes to a plist file `installer` can apply.
fn choices_file(spec: &PkgSpec) -> Result<Option<NamedTempFile>> {
    if spec.choices.is_empty() {
        return Ok(None);
    }
    let file = tempfile::Builder::new()
        .prefix("choices")
        .suffix(".xml")
        .tempfile()?;
    plist::to_file_xml(file.path(), &spec.choices)
        .map_err(|e| CasketError::Generic(format!("Failed to write pkg choices: {e}")))?;
    debug!("Wrote pkg choices to {}", file.path().display());
    Ok(Some(file))
}

pub fn install(spec: &PkgSpec, ctx: &ArtifactContext<'_>, options: PhaseOptions) -> Result<()> {
    info!(
        "Running installer for {}; your password may be necessary.",
        ctx.cask.token
    );
    let staged = ctx.staged_path();
    let path = ctx.staged(&spec.path);
    if !path.exists() {
        let others = staged_pkgs(&staged);
        let mut message = format!("Could not find PKG source file '{}'", spec.path);
        if !others.is_empty() {
            message.push_str(&format!(", found {} instead", to_sentence(&others)));
        }
        message.push('.');
        return Err(CasketError::CaskError(message));
    }

    let mut command = CommandSpec::new(INSTALLER)
        .arg("-pkg")
        .arg(&path)
        .args(["-target", "/"]);
    if options.verbose {
        command = command.arg("-verboseR");
    }
    if spec.allow_untrusted {
        command = command.arg("-allowUntrusted");
    }
    // Kept alive until the installer has run.
    let choices = choices_file(spec)?;
    if let Some(file) = &choices {
        command = command.arg("-applyChoiceChangesXML").arg(file.path());
    }
    let user = current_user();
    command = command
        .env("LOGNAME", user.as_str())
        .env("USER", user.as_str())
        .env("USERNAME", user.as_str());

    ctx.executor
        .run(&command.sudo(true).must_succeed(true))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use casket_common::config::Config;
    use casket_common::model::artifact::PkgChoice;
    use casket_common::model::Cask;

    use super::*;
    use crate::exec::{CommandExecutor, CommandOutput};

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<CommandSpec>>,
        choices: RefCell<Option<String>>,
    }

    impl CommandExecutor for Recorder {
        fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            if let Some(pos) = spec.args.iter().position(|a| a == "-applyChoiceChangesXML") {
                *self.choices.borrow_mut() = fs::read_to_string(&spec.args[pos + 1]).ok();
            }
            self.calls.borrow_mut().push(spec.clone());
            Ok(CommandOutput::ok(""))
        }
    }

    fn cask() -> Cask {
        Cask::from_json(r#"{"token": "pkg-cask", "version": "1"}"#).unwrap()
    }

    #[test]
    fn runs_installer_with_flags_and_choices() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let cask = cask();
        let staged = cask.staged_path(&config);
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("Setup.pkg"), b"").unwrap();

        let spec = PkgSpec {
            path: "Setup.pkg".into(),
            allow_untrusted: true,
            choices: vec![PkgChoice {
                choice_identifier: "choice1".into(),
                choice_attribute: "selected".into(),
                attribute_setting: 1,
            }],
        };
        let recorder = Recorder::default();
        let ctx = ArtifactContext::new(&config, &recorder, &cask);
        let options = PhaseOptions {
            verbose: true,
            ..Default::default()
        };
        install(&spec, &ctx, options).unwrap();

        let calls = recorder.calls.borrow();
        let call = &calls[0];
        assert!(call.sudo);
        assert_eq!(call.executable, INSTALLER);
        assert_eq!(call.args[0], "-pkg");
        assert!(call.args.contains(&"-verboseR".to_string()));
        assert!(call.args.contains(&"-allowUntrusted".to_string()));
        assert!(call.env.iter().any(|(k, _)| k == "USERNAME"));
        let choices = recorder.choices.borrow().clone().unwrap();
        assert!(choices.contains("<key>choiceIdentifier</key>"));
        assert!(choices.contains("<string>choice1</string>"));
    }

    #[test]
    fn missing_pkg_lists_alternatives() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let cask = cask();
        let staged = cask.staged_path(&config);
        fs::create_dir_all(staged.join("sub")).unwrap();
        fs::write(staged.join("a.pkg"), b"").unwrap();
        fs::write(staged.join("sub/b.pkg"), b"").unwrap();

        let spec = PkgSpec {
            path: "Missing.pkg".into(),
            allow_untrusted: false,
            choices: vec![],
        };
        let recorder = Recorder::default();
        let ctx = ArtifactContext::new(&config, &recorder, &cask);
        let err = install(&spec, &ctx, PhaseOptions::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not find PKG source file 'Missing.pkg', found 'a.pkg' and 'sub/b.pkg' instead."
        );
        assert!(recorder.calls.borrow().is_empty());
    }
}
