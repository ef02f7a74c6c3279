// casket-core/src/unpack/command.rs
//! Formats extracted by tools installed as formula dependencies.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use casket_common::error::Result;

use super::UnpackStrategy;
use crate::exec::{CommandExecutor, CommandSpec};
use crate::formula::FormulaManager;

pub struct RarStrategy {
    path: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    formulae: Arc<dyn FormulaManager>,
}

impl RarStrategy {
    pub fn new(
        path: PathBuf,
        executor: Arc<dyn CommandExecutor>,
        formulae: Arc<dyn FormulaManager>,
    ) -> Self {
        Self {
            path,
            executor,
            formulae,
        }
    }
}

impl UnpackStrategy for RarStrategy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &'static str {
        "rar"
    }

    fn extract(&self, to: &Path, _basename: &str) -> Result<()> {
        fs::create_dir_all(to)?;
        let unar = self.formulae.opt_prefix("unar").join("bin/unar");
        self.executor.run(
            &CommandSpec::new(unar)
                .args(["-force-overwrite", "-quiet", "-no-directory", "-output-directory"])
                .arg(to)
                .arg(&self.path)
                .must_succeed(true),
        )?;
        Ok(())
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["unar".to_string()]
    }
}

pub struct SevenZipStrategy {
    path: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    formulae: Arc<dyn FormulaManager>,
}

impl SevenZipStrategy {
    pub fn new(
        path: PathBuf,
        executor: Arc<dyn CommandExecutor>,
        formulae: Arc<dyn FormulaManager>,
    ) -> Self {
        Self {
            path,
            executor,
            formulae,
        }
    }
}

impl UnpackStrategy for SevenZipStrategy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &'static str {
        "7z"
    }

    fn extract(&self, to: &Path, _basename: &str) -> Result<()> {
        fs::create_dir_all(to)?;
        let seven_zip = self.formulae.opt_prefix("p7zip").join("bin/7zr");
        self.executor.run(
            &CommandSpec::new(seven_zip)
                .args(["x", "-y", "-bd", "-bso0"])
                .arg(&self.path)
                .arg(format!("-o{}", to.display()))
                .must_succeed(true),
        )?;
        Ok(())
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["p7zip".to_string()]
    }
}
