// casket-common/src/model/artifact.rs
use serde::{Deserialize, Deserializer, Serialize};

use super::one_or_many;
use crate::config::TargetCategory;

/// Source (relative to the staged path) and optional explicit target of a
/// moved or linked artifact. A plain string is shorthand for `{source}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedSpec {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMoved {
    Source(String),
    Full {
        source: String,
        #[serde(default)]
        target: Option<String>,
    },
}

impl<'de> Deserialize<'de> for MovedSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawMoved::deserialize(deserializer)? {
            RawMoved::Source(source) => MovedSpec { source, target: None },
            RawMoved::Full { source, target } => MovedSpec { source, target },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkgChoice {
    pub choice_identifier: String,
    pub choice_attribute: String,
    pub attribute_setting: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PkgSpec {
    pub path: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub allow_untrusted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<PkgChoice>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPkg {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        allow_untrusted: bool,
        #[serde(default)]
        choices: Vec<PkgChoice>,
    },
}

impl<'de> Deserialize<'de> for PkgSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawPkg::deserialize(deserializer)? {
            RawPkg::Path(path) => PkgSpec {
                path,
                allow_untrusted: false,
                choices: Vec::new(),
            },
            RawPkg::Full {
                path,
                allow_untrusted,
                choices,
            } => PkgSpec {
                path,
                allow_untrusted,
                choices,
            },
        })
    }
}

/// An executable run by the `installer` artifact or an uninstall script
/// directive. A plain string is shorthand for `{executable}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptSpec {
    pub executable: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub sudo: bool,
    pub must_succeed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScript {
    Executable(String),
    Full {
        executable: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        sudo: bool,
        #[serde(default = "default_true")]
        must_succeed: bool,
        #[serde(default)]
        input: Option<String>,
    },
}

impl<'de> Deserialize<'de> for ScriptSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawScript::deserialize(deserializer)? {
            RawScript::Executable(executable) => ScriptSpec {
                executable,
                args: Vec::new(),
                sudo: false,
                must_succeed: true,
                input: None,
            },
            RawScript::Full {
                executable,
                args,
                sudo,
                must_succeed,
                input,
            } => ScriptSpec {
                executable,
                args,
                sudo,
                must_succeed,
                input,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallerSpec {
    /// Only tells the user to run an installer by hand.
    Manual(String),
    Script(ScriptSpec),
}

/// Removal directives shared by the `uninstall` and `zap` stanzas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UninstallDirectives {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_script: Option<ScriptSpec>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub launchctl: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub quit: Vec<String>,
    /// `[signal, bundle id]` pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signal: Vec<(String, String)>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub login_item: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub kext: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptSpec>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub pkgutil: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub trash: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub rmdir: Vec<String>,
}

/// Shell commands run by `preflight` / `postflight` blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlightBlock {
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub uninstall: Vec<String>,
}

/// One artifact stanza of a cask, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    App(MovedSpec),
    Suite(MovedSpec),
    Colorpicker(MovedSpec),
    Dictionary(MovedSpec),
    Font(MovedSpec),
    InputMethod(MovedSpec),
    InternetPlugin(MovedSpec),
    AudioUnitPlugin(MovedSpec),
    VstPlugin(MovedSpec),
    Vst3Plugin(MovedSpec),
    Prefpane(MovedSpec),
    Qlplugin(MovedSpec),
    ScreenSaver(MovedSpec),
    Service(MovedSpec),
    Binary(MovedSpec),
    Pkg(PkgSpec),
    Installer(InstallerSpec),
    StageOnly(bool),
    Uninstall(UninstallDirectives),
    Zap(UninstallDirectives),
    #[serde(rename = "preflight")]
    PreflightBlock(FlightBlock),
    #[serde(rename = "postflight")]
    PostflightBlock(FlightBlock),
    /// A generic artifact moved to an explicit absolute target.
    Artifact(MovedSpec),
}

/// Where a moved artifact goes by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDestination {
    Category(TargetCategory),
    /// The generic `artifact` stanza: the explicit target is required.
    Explicit,
}

impl Artifact {
    /// Stanza name as written in a cask file.
    pub fn stanza(&self) -> &'static str {
        match self {
            Artifact::App(_) => "app",
            Artifact::Suite(_) => "suite",
            Artifact::Colorpicker(_) => "colorpicker",
            Artifact::Dictionary(_) => "dictionary",
            Artifact::Font(_) => "font",
            Artifact::InputMethod(_) => "input_method",
            Artifact::InternetPlugin(_) => "internet_plugin",
            Artifact::AudioUnitPlugin(_) => "audio_unit_plugin",
            Artifact::VstPlugin(_) => "vst_plugin",
            Artifact::Vst3Plugin(_) => "vst3_plugin",
            Artifact::Prefpane(_) => "prefpane",
            Artifact::Qlplugin(_) => "qlplugin",
            Artifact::ScreenSaver(_) => "screen_saver",
            Artifact::Service(_) => "service",
            Artifact::Binary(_) => "binary",
            Artifact::Pkg(_) => "pkg",
            Artifact::Installer(_) => "installer",
            Artifact::StageOnly(_) => "stage_only",
            Artifact::Uninstall(_) => "uninstall",
            Artifact::Zap(_) => "zap",
            Artifact::PreflightBlock(_) => "preflight",
            Artifact::PostflightBlock(_) => "postflight",
            Artifact::Artifact(_) => "artifact",
        }
    }

    /// Human name used in progress and error messages.
    pub fn english_name(&self) -> &'static str {
        match self {
            Artifact::App(_) => "App",
            Artifact::Suite(_) => "Suite",
            Artifact::Colorpicker(_) => "Color Picker",
            Artifact::Dictionary(_) => "Dictionary",
            Artifact::Font(_) => "Font",
            Artifact::InputMethod(_) => "Input Method",
            Artifact::InternetPlugin(_) => "Internet Plugin",
            Artifact::AudioUnitPlugin(_) => "Audio Unit Plugin",
            Artifact::VstPlugin(_) => "VST Plugin",
            Artifact::Vst3Plugin(_) => "VST3 Plugin",
            Artifact::Prefpane(_) => "Preference Pane",
            Artifact::Qlplugin(_) => "QuickLook Plugin",
            Artifact::ScreenSaver(_) => "Screen Saver",
            Artifact::Service(_) => "Service",
            Artifact::Binary(_) => "Binary",
            Artifact::Pkg(_) => "Pkg",
            Artifact::Installer(_) => "Installer",
            Artifact::StageOnly(_) => "Stage Only",
            Artifact::Uninstall(_) => "Uninstall",
            Artifact::Zap(_) => "Zap",
            Artifact::PreflightBlock(_) => "Preflight Block",
            Artifact::PostflightBlock(_) => "Postflight Block",
            Artifact::Artifact(_) => "Generic Artifact",
        }
    }

    /// Moved-artifact view: the spec plus where it is moved by default.
    pub fn as_moved(&self) -> Option<(&MovedSpec, MoveDestination)> {
        use MoveDestination::{Category, Explicit};
        use TargetCategory as C;
        let (spec, dest) = match self {
            Artifact::App(s) | Artifact::Suite(s) => (s, Category(C::App)),
            Artifact::Colorpicker(s) => (s, Category(C::Colorpicker)),
            Artifact::Dictionary(s) => (s, Category(C::Dictionary)),
            Artifact::Font(s) => (s, Category(C::Font)),
            Artifact::InputMethod(s) => (s, Category(C::InputMethod)),
            Artifact::InternetPlugin(s) => (s, Category(C::InternetPlugin)),
            Artifact::AudioUnitPlugin(s) => (s, Category(C::AudioUnitPlugin)),
            Artifact::VstPlugin(s) => (s, Category(C::VstPlugin)),
            Artifact::Vst3Plugin(s) => (s, Category(C::Vst3Plugin)),
            Artifact::Prefpane(s) => (s, Category(C::Prefpane)),
            Artifact::Qlplugin(s) => (s, Category(C::Qlplugin)),
            Artifact::ScreenSaver(s) => (s, Category(C::ScreenSaver)),
            Artifact::Service(s) => (s, Category(C::Service)),
            Artifact::Artifact(s) => (s, Explicit),
            Artifact::Binary(_)
            | Artifact::Pkg(_)
            | Artifact::Installer(_)
            | Artifact::StageOnly(_)
            | Artifact::Uninstall(_)
            | Artifact::Zap(_)
            | Artifact::PreflightBlock(_)
            | Artifact::PostflightBlock(_) => return None,
        };
        Some((spec, dest))
    }

    pub fn has_install_phase(&self) -> bool {
        match self {
            Artifact::StageOnly(_) | Artifact::Uninstall(_) | Artifact::Zap(_) => false,
            Artifact::App(_)
            | Artifact::Suite(_)
            | Artifact::Colorpicker(_)
            | Artifact::Dictionary(_)
            | Artifact::Font(_)
            | Artifact::InputMethod(_)
            | Artifact::InternetPlugin(_)
            | Artifact::AudioUnitPlugin(_)
            | Artifact::VstPlugin(_)
            | Artifact::Vst3Plugin(_)
            | Artifact::Prefpane(_)
            | Artifact::Qlplugin(_)
            | Artifact::ScreenSaver(_)
            | Artifact::Service(_)
            | Artifact::Binary(_)
            | Artifact::Pkg(_)
            | Artifact::Installer(_)
            | Artifact::PreflightBlock(_)
            | Artifact::PostflightBlock(_)
            | Artifact::Artifact(_) => true,
        }
    }

    pub fn has_uninstall_phase(&self) -> bool {
        match self {
            Artifact::StageOnly(_) | Artifact::Zap(_) | Artifact::Pkg(_) | Artifact::Installer(_) => {
                false
            }
            Artifact::App(_)
            | Artifact::Suite(_)
            | Artifact::Colorpicker(_)
            | Artifact::Dictionary(_)
            | Artifact::Font(_)
            | Artifact::InputMethod(_)
            | Artifact::InternetPlugin(_)
            | Artifact::AudioUnitPlugin(_)
            | Artifact::VstPlugin(_)
            | Artifact::Vst3Plugin(_)
            | Artifact::Prefpane(_)
            | Artifact::Qlplugin(_)
            | Artifact::ScreenSaver(_)
            | Artifact::Service(_)
            | Artifact::Binary(_)
            | Artifact::Uninstall(_)
            | Artifact::PreflightBlock(_)
            | Artifact::PostflightBlock(_)
            | Artifact::Artifact(_) => true,
        }
    }

    /// Artifacts that put something onto the system. `stage_only` must not
    /// be combined with any of these.
    pub fn is_activatable(&self) -> bool {
        match self {
            Artifact::StageOnly(_)
            | Artifact::Uninstall(_)
            | Artifact::Zap(_)
            | Artifact::PreflightBlock(_)
            | Artifact::PostflightBlock(_) => false,
            _ => true,
        }
    }
}
