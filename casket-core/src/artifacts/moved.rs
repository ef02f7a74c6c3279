// casket-core/src/artifacts/moved.rs
//! Artifacts moved from the staged directory into a target directory, such
//! as `app`, `font` or the generic `artifact` stanza.
use std::path::{Path, PathBuf};

use casket_common::error::{CasketError, Result};
use casket_common::model::artifact::{MoveDestination, MovedSpec};
use casket_common::model::Artifact;
use tracing::{debug, info, warn};

use super::{basename, english_article, ArtifactContext, PhaseOptions};
use crate::helpers::{self, path_occupied};

/// Where the artifact's source ends up once installed.
pub fn target_path(
    spec: &MovedSpec,
    destination: MoveDestination,
    ctx: &ArtifactContext<'_>,
) -> Result<PathBuf> {
    let explicit = spec.target.as_deref().map(|t| ctx.config.expand_home(t));
    match (destination, explicit) {
        (_, Some(target)) if target.is_absolute() => Ok(target),
        (MoveDestination::Category(category), Some(target)) => {
            Ok(ctx.config.target_dir(category).join(target))
        }
        (MoveDestination::Category(category), None) => Ok(ctx
            .config
            .target_dir(category)
            .join(basename(Path::new(&spec.source)))),
        (MoveDestination::Explicit, _) => Err(CasketError::CaskInvalid(
            ctx.cask.token.clone(),
            format!(
                "target must be an absolute path for Generic Artifact '{}'",
                spec.source
            ),
        )),
    }
}

fn resolve(artifact: &Artifact, ctx: &ArtifactContext<'_>) -> Result<(PathBuf, PathBuf)> {
    let (spec, destination) = artifact.as_moved().ok_or_else(|| {
        CasketError::Generic(format!("'{}' is not a moved artifact", artifact.stanza()))
    })?;
    let source = ctx.staged(&spec.source);
    let target = target_path(spec, destination, ctx)?;
    Ok((source, target))
}

fn already_there(english: &str, path: &Path) -> String {
    format!(
        "It seems there is already {} {} at '{}'",
        english_article(english),
        english,
        path.display()
    )
}

pub fn install(artifact: &Artifact, ctx: &ArtifactContext<'_>, options: PhaseOptions) -> Result<()> {
    let (source, target) = resolve(artifact, ctx)?;
    let english = artifact.english_name();
    let fs = ctx.fs();

    if path_occupied(&target) {
        let message = already_there(english, &target);
        if !options.force {
            return Err(CasketError::CaskError(format!("{message}.")));
        }
        warn!("{}; overwriting.", message);
        fs.delete(&target, ctx.config)?;
    }
    if !path_occupied(&source) {
        return Err(CasketError::CaskError(format!(
            "It seems the {} source '{}' is not there.",
            english,
            source.display()
        )));
    }

    info!(
        "Moving {} '{}' to '{}'",
        english,
        basename(&source),
        target.display()
    );
    fs.move_path(&source, &target)?;
    debug!("[{}] Installed {} at {}", ctx.cask.token, english, target.display());
    Ok(())
}

/// Moves an installed artifact back into the staged directory.
pub fn move_back(
    artifact: &Artifact,
    ctx: &ArtifactContext<'_>,
    options: PhaseOptions,
) -> Result<()> {
    let (source, target) = resolve(artifact, ctx)?;
    let english = artifact.english_name();
    let fs = ctx.fs();

    if path_occupied(&source) {
        let message = already_there(english, &source);
        if !options.force {
            return Err(CasketError::CaskError(format!("{message}.")));
        }
        warn!("{}; overwriting.", message);
        fs.gain_permissions_remove(&source)?;
    }
    if !path_occupied(&target) {
        if options.skip || options.force {
            debug!(
                "[{}] {} already gone from {}",
                ctx.cask.token,
                english,
                target.display()
            );
            return Ok(());
        }
        return Err(CasketError::CaskError(format!(
            "It seems the {} is not there: '{}'",
            english,
            target.display()
        )));
    }
    if helpers::is_undeletable(&target, ctx.config) {
        return Err(CasketError::CaskError(format!(
            "Cannot remove undeletable path '{}'.",
            target.display()
        )));
    }

    info!(
        "Moving {} '{}' back to '{}'",
        english,
        basename(&target),
        source.display()
    );
    fs.move_path(&target, &source)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use casket_common::config::Config;
    use casket_common::model::Cask;

    use super::*;
    use crate::exec::{CommandExecutor, CommandOutput, CommandSpec};

    struct NoCommands;

    impl CommandExecutor for NoCommands {
        fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            Err(CasketError::Generic(format!("unexpected {}", spec.display())))
        }
    }

    fn setup() -> (tempfile::TempDir, Config, Cask) {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_root(tmp.path());
        let cask = Cask::from_json(
            r#"{"token": "local-caffeine", "version": "1.2.3", "artifacts": [{"app": "Caffeine.app"}]}"#,
        )
        .unwrap();
        let staged = cask.staged_path(&config);
        fs::create_dir_all(staged.join("Caffeine.app/Contents")).unwrap();
        (tmp, config, cask)
    }

    #[test]
    fn install_and_move_back() {
        let (_tmp, config, cask) = setup();
        let ctx = ArtifactContext::new(&config, &NoCommands, &cask);
        let app = &cask.artifacts[0];
        let target = config.appdir().join("Caffeine.app");

        install(app, &ctx, PhaseOptions::default()).unwrap();
        assert!(target.join("Contents").is_dir());
        assert!(!ctx.staged("Caffeine.app").exists());

        move_back(app, &ctx, PhaseOptions::default()).unwrap();
        assert!(!target.exists());
        assert!(ctx.staged("Caffeine.app/Contents").is_dir());
    }

    #[test]
    fn occupied_target_requires_force() {
        let (_tmp, config, cask) = setup();
        let ctx = ArtifactContext::new(&config, &NoCommands, &cask);
        let target = config.appdir().join("Caffeine.app");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("old"), b"").unwrap();

        let err = install(&cask.artifacts[0], &ctx, PhaseOptions::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("It seems there is already an App at '{}'.", target.display())
        );

        let force = PhaseOptions {
            force: true,
            ..Default::default()
        };
        install(&cask.artifacts[0], &ctx, force).unwrap();
        assert!(target.join("Contents").is_dir());
        assert!(!target.join("old").exists());
    }

    #[test]
    fn missing_target_on_move_back_honours_skip() {
        let (_tmp, config, cask) = setup();
        fs::remove_dir_all(cask.staged_path(&config).join("Caffeine.app")).unwrap();
        let ctx = ArtifactContext::new(&config, &NoCommands, &cask);

        let err = move_back(&cask.artifacts[0], &ctx, PhaseOptions::default()).unwrap_err();
        assert!(err.to_string().starts_with("It seems the App is not there"));
        let skip = PhaseOptions {
            skip: true,
            ..Default::default()
        };
        move_back(&cask.artifacts[0], &ctx, skip).unwrap();
    }

    #[test]
    fn relative_and_explicit_targets() {
        let (_tmp, config, cask) = setup();
        let ctx = ArtifactContext::new(&config, &NoCommands, &cask);
        let renamed = MovedSpec {
            source: "Foo.app".into(),
            target: Some("Bar.app".into()),
        };
        assert_eq!(
            target_path(&renamed, MoveDestination::Category(casket_common::config::TargetCategory::App), &ctx)
                .unwrap(),
            config.appdir().join("Bar.app")
        );
        let generic = MovedSpec {
            source: "x".into(),
            target: Some("relative".into()),
        };
        assert!(target_path(&generic, MoveDestination::Explicit, &ctx).is_err());
    }
}
