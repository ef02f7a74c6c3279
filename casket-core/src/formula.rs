// casket-core/src/formula.rs
//! Formula dependencies, delegated to the `brew` executable.
use std::path::PathBuf;
use std::sync::Arc;

use casket_common::config::Config;
use casket_common::error::Result;
use tracing::debug;

use crate::exec::{CommandExecutor, CommandSpec};

pub trait FormulaManager {
    fn is_installed(&self, name: &str) -> bool;
    fn install(&self, name: &str) -> Result<()>;
    /// Install prefix of an installed formula, e.g. `<prefix>/opt/unar`.
    fn opt_prefix(&self, name: &str) -> PathBuf;
}

pub struct BrewFormulae {
    config: Config,
    executor: Arc<dyn CommandExecutor>,
}

impl BrewFormulae {
    pub fn new(config: &Config, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            config: config.clone(),
            executor,
        }
    }
}

impl FormulaManager for BrewFormulae {
    fn is_installed(&self, name: &str) -> bool {
        self.opt_prefix(name).exists()
    }

    fn install(&self, name: &str) -> Result<()> {
        debug!("Installing formula dependency {}", name);
        self.executor.run(
            &CommandSpec::new(self.config.prefix().join("bin/brew"))
                .args(["install", "--formula", name])
                .must_succeed(true),
        )?;
        Ok(())
    }

    fn opt_prefix(&self, name: &str) -> PathBuf {
        self.config.opt_dir().join(name)
    }
}
