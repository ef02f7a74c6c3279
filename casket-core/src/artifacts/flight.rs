// casket-core/src/artifacts/flight.rs
//! `preflight` and `postflight` blocks.
//!
//! Each command is handed to `/bin/sh -c` with `STAGED_PATH`, `APPDIR` and
//! `CASK_TOKEN` exported, so blocks can refer to `"$STAGED_PATH/Foo.app"`.
use casket_common::error::Result;
use tracing::debug;

use super::ArtifactContext;
use crate::exec::CommandSpec;

pub fn run(stanza: &str, commands: &[String], ctx: &ArtifactContext<'_>) -> Result<()> {
    let staged = ctx.staged_path();
    for command in commands {
        debug!("[{}] Running {} command: {}", ctx.cask.token, stanza, command);
        ctx.executor.run(
            &CommandSpec::new("/bin/sh")
                .arg("-c")
                .arg(command)
                .env("STAGED_PATH", staged.to_string_lossy())
                .env("APPDIR", ctx.config.appdir().to_string_lossy())
                .env("CASK_TOKEN", ctx.cask.token.as_str())
                .must_succeed(true),
        )?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use casket_common::config::Config;
    use casket_common::model::Cask;

    use super::*;
    use crate::exec::SystemCommand;

    #[test]
    fn commands_see_staged_path() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let cask = Cask::from_json(r#"{"token": "flighty", "version": "1"}"#).unwrap();
        fs::create_dir_all(cask.staged_path(&config)).unwrap();
        let ctx = ArtifactContext::new(&config, &SystemCommand, &cask);

        run(
            "preflight",
            &["echo \"$CASK_TOKEN\" > \"$STAGED_PATH/marker\"".to_string()],
            &ctx,
        )
        .unwrap();
        assert_eq!(
            fs::read_to_string(cask.staged_path(&config).join("marker")).unwrap(),
            "flighty\n"
        );
        assert!(run("postflight", &["exit 4".to_string()], &ctx).is_err());
    }
}
