// casket-common/src/model/depends_on.rs
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::one_or_many;

const MACOS_RELEASES: &[(&str, &str)] = &[
    ("yosemite", "10.10"),
    ("el_capitan", "10.11"),
    ("sierra", "10.12"),
    ("high_sierra", "10.13"),
    ("mojave", "10.14"),
    ("catalina", "10.15"),
    ("big_sur", "11"),
    ("monterey", "12"),
    ("ventura", "13"),
    ("sonoma", "14"),
    ("sequoia", "15"),
    ("tahoe", "26"),
];

/// A dotted macOS release number, e.g. `10.15` or `14`.
#[derive(Debug, Clone, Eq)]
pub struct MacOsVersion(Vec<u32>);

impl MacOsVersion {
    /// Parses `10.15`, `:catalina` or `catalina`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let symbol = s.strip_prefix(':').unwrap_or(s);
        let numeric = MACOS_RELEASES
            .iter()
            .find(|(name, _)| *name == symbol)
            .map_or(s, |(_, number)| number);
        let parts = numeric
            .split('.')
            .map(|p| p.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(Self(parts))
    }

    fn padded(&self) -> [u32; 3] {
        let mut out = [0; 3];
        for (slot, part) in out.iter_mut().zip(&self.0) {
            *slot = *part;
        }
        out
    }
}

impl PartialEq for MacOsVersion {
    fn eq(&self, other: &Self) -> bool {
        self.padded() == other.padded()
    }
}

impl PartialOrd for MacOsVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MacOsVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.padded().cmp(&other.padded())
    }
}

impl fmt::Display for MacOsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl ComparisonOp {
    fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Eq => "==",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Gt => ">",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacOsRequirement {
    Comparison {
        op: ComparisonOp,
        release: MacOsVersion,
    },
    AnyOf(Vec<MacOsVersion>),
    Exactly(MacOsVersion),
}

impl MacOsRequirement {
    pub fn is_satisfied_by(&self, running: &MacOsVersion) -> bool {
        match self {
            MacOsRequirement::Comparison { op, release } => match op {
                ComparisonOp::Lt => running < release,
                ComparisonOp::Le => running <= release,
                ComparisonOp::Eq => running == release,
                ComparisonOp::Ge => running >= release,
                ComparisonOp::Gt => running > release,
            },
            MacOsRequirement::AnyOf(releases) => releases.contains(running),
            MacOsRequirement::Exactly(release) => running == release,
        }
    }

    /// Human description used in the unsatisfied-requirement message.
    pub fn describe(&self) -> String {
        match self {
            MacOsRequirement::Comparison { op, release } => {
                format!("{} {}", op.symbol(), release)
            }
            MacOsRequirement::AnyOf(releases) => {
                let list: Vec<String> = releases.iter().map(ToString::to_string).collect();
                format!("being one of [{}]", list.join(", "))
            }
            MacOsRequirement::Exactly(release) => release.to_string(),
        }
    }

    fn parse_one(s: &str) -> Result<Self, String> {
        let s = s.trim();
        for (prefix, op) in [
            ("<=", ComparisonOp::Le),
            (">=", ComparisonOp::Ge),
            ("==", ComparisonOp::Eq),
            ("<", ComparisonOp::Lt),
            (">", ComparisonOp::Gt),
        ] {
            if let Some(rest) = s.strip_prefix(prefix) {
                let release = MacOsVersion::parse(rest)
                    .ok_or_else(|| format!("unknown macOS release '{}'", rest.trim()))?;
                return Ok(MacOsRequirement::Comparison { op, release });
            }
        }
        MacOsVersion::parse(s)
            .map(MacOsRequirement::Exactly)
            .ok_or_else(|| format!("unknown macOS release '{s}'"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMacOs {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for MacOsRequirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawMacOs::deserialize(deserializer)? {
            RawMacOs::One(s) => MacOsRequirement::parse_one(&s).map_err(serde::de::Error::custom),
            RawMacOs::Many(list) => list
                .iter()
                .map(|s| {
                    MacOsVersion::parse(s)
                        .ok_or_else(|| serde::de::Error::custom(format!("unknown macOS release '{s}'")))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(MacOsRequirement::AnyOf),
        }
    }
}

impl Serialize for MacOsRequirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MacOsRequirement::AnyOf(releases) => {
                let list: Vec<String> = releases.iter().map(ToString::to_string).collect();
                list.serialize(serializer)
            }
            other => serializer.serialize_str(&other.describe()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuKind {
    Intel,
    Arm,
}

/// The running machine's architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareArch {
    pub kind: CpuKind,
    pub bits: u32,
}

impl fmt::Display for HardwareArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            CpuKind::Intel => "intel",
            CpuKind::Arm => "arm",
        };
        write!(f, "{{type: :{kind}, bits: {}}}", self.bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchRequirement {
    #[serde(rename = "type")]
    pub kind: CpuKind,
    pub bits: Option<u32>,
}

impl ArchRequirement {
    pub fn matches(&self, arch: &HardwareArch) -> bool {
        self.kind == arch.kind && self.bits.is_none_or(|bits| bits == arch.bits)
    }

    fn from_name(name: &str) -> Option<Self> {
        let (kind, bits) = match name.trim_start_matches(':') {
            "x86_64" => (CpuKind::Intel, Some(64)),
            "i386" => (CpuKind::Intel, Some(32)),
            "intel" => (CpuKind::Intel, None),
            "arm64" => (CpuKind::Arm, Some(64)),
            "arm" => (CpuKind::Arm, None),
            _ => return None,
        };
        Some(Self { kind, bits })
    }
}

impl fmt::Display for ArchRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            CpuKind::Intel => "intel",
            CpuKind::Arm => "arm",
        };
        match self.bits {
            Some(bits) => write!(f, "{{type: :{kind}, bits: {bits}}}"),
            None => write!(f, "{{type: :{kind}}}"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawArch {
    Name(String),
    Spec {
        #[serde(rename = "type")]
        kind: CpuKind,
        #[serde(default)]
        bits: Option<u32>,
    },
}

impl<'de> Deserialize<'de> for ArchRequirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawArch::deserialize(deserializer)? {
            RawArch::Name(name) => ArchRequirement::from_name(&name).ok_or_else(|| {
                serde::de::Error::custom(format!("unknown architecture '{name}'"))
            }),
            RawArch::Spec { kind, bits } => Ok(ArchRequirement { kind, bits }),
        }
    }
}

/// The `depends_on` stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependsOn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macos: Option<MacOsRequirement>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub arch: Vec<ArchRequirement>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub x11: bool,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub formula: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub cask: Vec<String>,
}

impl DependsOn {
    pub fn is_empty(&self) -> bool {
        self.macos.is_none()
            && self.arch.is_empty()
            && !self.x11
            && self.formula.is_empty()
            && self.cask.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macos_comparison_accepts_symbols_and_numbers() {
        let req: MacOsRequirement = serde_json::from_str("\">= :catalina\"").unwrap();
        assert!(req.is_satisfied_by(&MacOsVersion::parse("11.2").unwrap()));
        assert!(req.is_satisfied_by(&MacOsVersion::parse("10.15").unwrap()));
        assert!(!req.is_satisfied_by(&MacOsVersion::parse("10.14.6").unwrap()));

        let req: MacOsRequirement = serde_json::from_str("[\"sonoma\", \"15\"]").unwrap();
        assert!(req.is_satisfied_by(&MacOsVersion::parse("14").unwrap()));
        assert!(!req.is_satisfied_by(&MacOsVersion::parse("13").unwrap()));

        let req: MacOsRequirement = serde_json::from_str("\":big_sur\"").unwrap();
        assert_eq!(req, MacOsRequirement::Exactly(MacOsVersion::parse("11.0").unwrap()));
        assert!(serde_json::from_str::<MacOsRequirement>("\">= :nonsense\"").is_err());
    }

    #[test]
    fn arch_requirements_match_kind_and_bits() {
        let deps: DependsOn =
            serde_json::from_str(r#"{"arch": ["x86_64", {"type": "arm"}]}"#).unwrap();
        let intel = HardwareArch { kind: CpuKind::Intel, bits: 64 };
        let arm = HardwareArch { kind: CpuKind::Arm, bits: 64 };
        let intel32 = HardwareArch { kind: CpuKind::Intel, bits: 32 };
        assert!(deps.arch.iter().any(|a| a.matches(&intel)));
        assert!(deps.arch.iter().any(|a| a.matches(&arm)));
        assert!(!deps.arch.iter().any(|a| a.matches(&intel32)));
    }

    #[test]
    fn single_strings_become_lists() {
        let deps: DependsOn = serde_json::from_str(r#"{"cask": "other", "formula": ["a", "b"]}"#).unwrap();
        assert_eq!(deps.cask, vec!["other".to_string()]);
        assert_eq!(deps.formula.len(), 2);
        assert!(!deps.is_empty());
    }
}
