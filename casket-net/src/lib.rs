// casket-net/src/lib.rs
pub mod http;
pub mod validation;

use std::path::PathBuf;

use casket_common::error::Result;
use casket_common::model::Cask;

pub use http::HttpDownloader;
pub use validation::{sha256_of, validate_url, verify_checksum};

/// Produces a verified local copy of a cask's container.
pub trait Downloader {
    /// Downloads (or reuses the cached copy of) the container described by
    /// `cask.url` and verifies it against `cask.sha256`. `force` discards any
    /// cached copy first.
    fn perform(&self, cask: &Cask, force: bool) -> Result<PathBuf>;
}
