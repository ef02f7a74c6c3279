// casket-core/src/macos/mod.rs
pub mod accessibility;
pub mod quarantine;
pub mod system;

pub use quarantine::{NoQuarantine, Quarantine, XattrQuarantine};
pub use system::{HostSystem, SystemInfo};
