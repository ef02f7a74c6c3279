// casket-core/src/artifacts/installer.rs
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use casket_common::error::{CasketError, Result};
use casket_common::model::artifact::{InstallerSpec, ScriptSpec};
use tracing::info;

use super::{ArtifactContext, PhaseOptions};
use crate::exec::CommandSpec;

pub fn install(spec: &InstallerSpec, ctx: &ArtifactContext<'_>, _options: PhaseOptions) -> Result<()> {
    match spec {
        InstallerSpec::Manual(path) => {
            info!(
                "To complete the installation of Cask {}, you must also\nrun the installer at:\n  {}",
                ctx.cask.token,
                ctx.staged(path).display()
            );
            Ok(())
        }
        InstallerSpec::Script(script) => run_script(script, ctx),
    }
}

fn run_script(script: &ScriptSpec, ctx: &ArtifactContext<'_>) -> Result<()> {
    info!("Running installer script '{}'", script.executable);
    let executable = ctx.staged(&script.executable);
    if !executable.exists() {
        return Err(CasketError::CaskError(format!(
            "installer script {} does not exist.",
            executable.display()
        )));
    }
    #[cfg(unix)]
    {
        let mut permissions = fs::metadata(&executable)?.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        fs::set_permissions(&executable, permissions)?;
    }
    #[cfg(not(unix))]
    let _ = fs::metadata(&executable)?;

    let mut command = CommandSpec::new(&executable)
        .args(&script.args)
        .sudo(script.sudo)
        .must_succeed(script.must_succeed);
    if let Some(input) = &script.input {
        command = command.input(input.clone());
    }
    ctx.executor.run(&command)?;
    Ok(())
}
