// casket-common/src/model/version.rs
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const LATEST_SENTINEL: &str = ":latest";
pub const NO_CHECK_SENTINEL: &str = ":no_check";

/// A cask version: either a literal string or the `:latest` sentinel.
///
/// The literal string `"latest"` stays a `Literal`; the auditor flags it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Latest,
    Literal(String),
}

impl Version {
    pub fn is_latest(&self) -> bool {
        matches!(self, Version::Latest)
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Version::Latest => None,
            Version::Literal(s) => Some(s),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Latest => f.write_str("latest"),
            Version::Literal(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        if s == LATEST_SENTINEL {
            Version::Latest
        } else {
            Version::Literal(s.to_string())
        }
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Version::Latest => serializer.serialize_str(LATEST_SENTINEL),
            Version::Literal(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Version::from(raw.as_str()))
    }
}

/// The `sha256` stanza: a hex digest or the `:no_check` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Checksum {
    NoCheck,
    Hex(String),
}

impl Checksum {
    pub fn is_no_check(&self) -> bool {
        matches!(self, Checksum::NoCheck)
    }

    pub fn as_hex(&self) -> Option<&str> {
        match self {
            Checksum::NoCheck => None,
            Checksum::Hex(s) => Some(s),
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::NoCheck => f.write_str("no_check"),
            Checksum::Hex(s) => f.write_str(s),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChecksum {
    Text(String),
    Flag { no_check: bool },
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Checksum::NoCheck => serializer.serialize_str(NO_CHECK_SENTINEL),
            Checksum::Hex(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawChecksum::deserialize(deserializer)? {
            RawChecksum::Text(s) if s == NO_CHECK_SENTINEL => Ok(Checksum::NoCheck),
            RawChecksum::Text(s) => Ok(Checksum::Hex(s)),
            RawChecksum::Flag { no_check: true } => Ok(Checksum::NoCheck),
            RawChecksum::Flag { no_check: false } => Err(serde::de::Error::custom(
                "sha256 'no_check' must be true when given as a flag",
            )),
        }
    }
}
