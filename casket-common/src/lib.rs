// casket-common/src/lib.rs
pub mod caskroom;
pub mod config;
pub mod dependency;
pub mod error;
pub mod loader;
pub mod model;

// Re-export key types
pub use config::Config;
pub use dependency::CaskDependencies;
pub use error::{CasketError, Result};
pub use loader::{CaskLoader, TapLoader};
pub use model::{Artifact, Cask, Checksum, Version};
