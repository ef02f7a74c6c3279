// casket-common/src/dependency/mod.rs
pub mod resolver;

pub use resolver::CaskDependencies;
