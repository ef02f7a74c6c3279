// casket-core/src/exec.rs
//! External command execution.
//!
//! Every privileged operation in the crate goes through a
//! [`CommandExecutor`]; `sudo` is only ever added here.
use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use casket_common::error::{CasketError, Result};
use tracing::{debug, error};

const SUDO: &str = "/usr/bin/sudo";
const ENV: &str = "/usr/bin/env";

/// A command to run, with its privilege level and failure policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub executable: String,
    pub args: Vec<String>,
    pub sudo: bool,
    /// Written to the child's stdin, which is then closed.
    pub input: Option<String>,
    pub must_succeed: bool,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(executable: impl AsRef<OsStr>) -> Self {
        Self {
            executable: executable.as_ref().to_string_lossy().into_owned(),
            args: Vec::new(),
            sudo: false,
            input: None,
            must_succeed: false,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string_lossy().into_owned()));
        self
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn must_succeed(mut self, must_succeed: bool) -> Self {
        self.must_succeed = must_succeed;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 3);
        if self.sudo {
            parts.push("sudo".to_string());
        }
        parts.push(self.executable.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Whether this spec runs `executable` (ignoring arguments).
    pub fn runs(&self, executable: &str) -> bool {
        self.executable == executable
            || Path::new(&self.executable).file_name() == Some(OsStr::new(executable))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// A successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: Some(0),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: Some(status),
        }
    }
}

pub trait CommandExecutor {
    /// Runs the command and reports its output whatever the exit status.
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Runs the command, failing on a non-zero exit when `must_succeed`.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.execute(spec)?;
        if spec.must_succeed && !output.success() {
            error!("Command failed: {}", spec.display());
            return Err(CasketError::CommandFailed {
                command: spec.display(),
                status: output
                    .status
                    .map_or_else(|| "signal".to_string(), |s| s.to_string()),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Runs commands on the host with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommand;

impl CommandExecutor for SystemCommand {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Executing: {}", spec.display());
        let mut command = if spec.sudo {
            let mut c = Command::new(SUDO);
            c.arg("-E").arg("--");
            if !spec.env.is_empty() {
                // sudo may scrub the environment; pass it explicitly.
                c.arg(ENV);
                c.args(spec.env.iter().map(|(k, v)| format!("{k}={v}")));
            }
            c.arg(&spec.executable);
            c
        } else {
            Command::new(&spec.executable)
        };
        command.args(&spec.args);
        command.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        command.stdin(if spec.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn()?;
        if let Some(input) = &spec.input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes())?;
            }
        }
        let output = child.wait_with_output()?;
        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        };
        if !result.success() {
            debug!(
                "Command '{}' exited with {:?}: {}",
                spec.display(),
                result.status,
                result.stderr.trim()
            );
        }
        Ok(result)
    }
}
