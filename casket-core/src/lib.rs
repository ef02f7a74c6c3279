// casket-core/src/lib.rs
pub mod artifacts;
pub mod audit;
pub mod exec;
pub mod formula;
pub mod helpers;
pub mod install;
pub mod macos;
pub mod unpack;
pub mod upgrade;

// Re-export key types for the CLI crate
pub use audit::{AuditOptions, AuditResult, AuditStatus, Auditor};
pub use exec::{CommandExecutor, CommandOutput, CommandSpec, SystemCommand};
pub use install::{InstallContext, InstallOptions, Installer};
pub use upgrade::{outdated_casks, upgrade_cask};
