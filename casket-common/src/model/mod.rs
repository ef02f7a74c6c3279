// src/model/mod.rs
pub mod artifact;
pub mod cask;
pub mod depends_on;
pub mod version;

use serde::{Deserialize, Deserializer};

// Re-export
pub use artifact::Artifact;
pub use cask::Cask;
pub use version::{Checksum, Version};

/// Accepts either a single value or a list of values.
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(item) => vec![item],
        OneOrMany::Many(items) => items,
    })
}
