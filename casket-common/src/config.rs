// casket-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};

use directories::UserDirs;
use tracing::debug;

use super::error::{CasketError, Result};

// Fallback if HOMEBREW_PREFIX is not set or is empty.
const DEFAULT_FALLBACK_PREFIX: &str = "/opt/homebrew";

/// The categories of artifacts that are moved into a configurable directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetCategory {
    App,
    Colorpicker,
    Prefpane,
    Qlplugin,
    Dictionary,
    Font,
    Service,
    InputMethod,
    InternetPlugin,
    AudioUnitPlugin,
    VstPlugin,
    Vst3Plugin,
    ScreenSaver,
    Binary,
}

impl TargetCategory {
    pub const ALL: [TargetCategory; 14] = [
        TargetCategory::App,
        TargetCategory::Colorpicker,
        TargetCategory::Prefpane,
        TargetCategory::Qlplugin,
        TargetCategory::Dictionary,
        TargetCategory::Font,
        TargetCategory::Service,
        TargetCategory::InputMethod,
        TargetCategory::InternetPlugin,
        TargetCategory::AudioUnitPlugin,
        TargetCategory::VstPlugin,
        TargetCategory::Vst3Plugin,
        TargetCategory::ScreenSaver,
        TargetCategory::Binary,
    ];

    /// Option name as accepted in `HOMEBREW_CASK_OPTS`, e.g. `appdir`.
    pub fn option_name(self) -> &'static str {
        match self {
            TargetCategory::App => "appdir",
            TargetCategory::Colorpicker => "colorpickerdir",
            TargetCategory::Prefpane => "prefpanedir",
            TargetCategory::Qlplugin => "qlplugindir",
            TargetCategory::Dictionary => "dictionarydir",
            TargetCategory::Font => "fontdir",
            TargetCategory::Service => "servicedir",
            TargetCategory::InputMethod => "input_methoddir",
            TargetCategory::InternetPlugin => "internet_plugindir",
            TargetCategory::AudioUnitPlugin => "audio_unit_plugindir",
            TargetCategory::VstPlugin => "vst_plugindir",
            TargetCategory::Vst3Plugin => "vst3_plugindir",
            TargetCategory::ScreenSaver => "screen_saverdir",
            TargetCategory::Binary => "binarydir",
        }
    }

    fn from_option_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.option_name() == name)
    }

    fn default_under(self, prefix: &Path, home: &Path) -> PathBuf {
        let library = home.join("Library");
        match self {
            TargetCategory::App => {
                if cfg!(target_os = "macos") {
                    PathBuf::from("/Applications")
                } else {
                    home.join("Applications")
                }
            }
            TargetCategory::Colorpicker => library.join("ColorPickers"),
            TargetCategory::Prefpane => library.join("PreferencePanes"),
            TargetCategory::Qlplugin => library.join("QuickLook"),
            TargetCategory::Dictionary => library.join("Dictionaries"),
            TargetCategory::Font => library.join("Fonts"),
            TargetCategory::Service => library.join("Services"),
            TargetCategory::InputMethod => library.join("Input Methods"),
            TargetCategory::InternetPlugin => library.join("Internet Plug-Ins"),
            TargetCategory::AudioUnitPlugin => library.join("Audio/Plug-Ins/Components"),
            TargetCategory::VstPlugin => library.join("Audio/Plug-Ins/VST"),
            TargetCategory::Vst3Plugin => library.join("Audio/Plug-Ins/VST3"),
            TargetCategory::ScreenSaver => library.join("Screen Savers"),
            TargetCategory::Binary => prefix.join("bin"),
        }
    }
}

/// Per-category artifact target directories.
#[derive(Debug, Clone)]
pub struct TargetDirs {
    dirs: Vec<(TargetCategory, PathBuf)>,
}

impl TargetDirs {
    fn defaults(prefix: &Path, home: &Path) -> Self {
        Self {
            dirs: TargetCategory::ALL
                .into_iter()
                .map(|c| (c, c.default_under(prefix, home)))
                .collect(),
        }
    }

    pub fn get(&self, category: TargetCategory) -> &Path {
        self.dirs
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, p)| p.as_path())
            .unwrap_or_else(|| Path::new("/"))
    }

    pub fn set(&mut self, category: TargetCategory, path: PathBuf) {
        if let Some(entry) = self.dirs.iter_mut().find(|(c, _)| *c == category) {
            entry.1 = path;
        } else {
            self.dirs.push((category, path));
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub home: PathBuf,
    pub targets: TargetDirs,
    /// Defaults for the matching install flags; the CLI may override them.
    pub require_sha: bool,
    pub binaries: bool,
    pub quarantine: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading casket configuration");

        let prefix_str = env::var("HOMEBREW_PREFIX")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                debug!(
                    "HOMEBREW_PREFIX environment variable not set or empty, falling back to default: {}",
                    DEFAULT_FALLBACK_PREFIX
                );
                DEFAULT_FALLBACK_PREFIX.to_string()
            });
        let prefix = PathBuf::from(&prefix_str);
        let home = UserDirs::new().map_or_else(|| PathBuf::from("/"), |ud| ud.home_dir().to_path_buf());

        let mut config = Self::with_prefix_and_home(prefix, home);
        if let Ok(opts) = env::var("HOMEBREW_CASK_OPTS") {
            config.apply_cask_opts(&opts)?;
        }

        debug!("Effective prefix set to: {}", config.prefix.display());
        Ok(config)
    }

    /// A configuration where every directory lives below `root`.
    pub fn with_root(root: &Path) -> Self {
        let home = root.join("home");
        let mut config = Self::with_prefix_and_home(root.to_path_buf(), home.clone());
        config.targets.set(TargetCategory::App, root.join("Applications"));
        config
    }

    fn with_prefix_and_home(prefix: PathBuf, home: PathBuf) -> Self {
        let targets = TargetDirs::defaults(&prefix, &home);
        Self {
            prefix,
            home,
            targets,
            require_sha: false,
            binaries: true,
            quarantine: true,
        }
    }

    /// Applies options in the `HOMEBREW_CASK_OPTS` format, e.g.
    /// `--appdir=~/Applications --no-binaries`.
    pub fn apply_cask_opts(&mut self, opts: &str) -> Result<()> {
        for opt in opts.split_whitespace() {
            let Some(opt) = opt.strip_prefix("--") else {
                return Err(CasketError::Config(format!(
                    "Invalid option '{opt}' in HOMEBREW_CASK_OPTS"
                )));
            };
            match opt.split_once('=') {
                Some((name, value)) => {
                    let category = TargetCategory::from_option_name(name).ok_or_else(|| {
                        CasketError::Config(format!(
                            "Unknown directory option '--{name}' in HOMEBREW_CASK_OPTS"
                        ))
                    })?;
                    let path = self.expand_home(value.trim_matches('"'));
                    debug!("Overriding {} with {}", name, path.display());
                    self.targets.set(category, path);
                }
                None => match opt {
                    "require-sha" => self.require_sha = true,
                    "no-binaries" => self.binaries = false,
                    "binaries" => self.binaries = true,
                    "no-quarantine" => self.quarantine = false,
                    "quarantine" => self.quarantine = true,
                    other => {
                        return Err(CasketError::Config(format!(
                            "Unknown option '--{other}' in HOMEBREW_CASK_OPTS"
                        )))
                    }
                },
            }
        }
        Ok(())
    }

    /// Expands a leading `~` to the configured home directory.
    pub fn expand_home(&self, path: &str) -> PathBuf {
        if path == "~" {
            self.home.clone()
        } else if let Some(rest) = path.strip_prefix("~/") {
            self.home.join(rest)
        } else {
            PathBuf::from(path)
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn caskroom_dir(&self) -> PathBuf {
        self.prefix.join("Caskroom")
    }

    pub fn taps_dir(&self) -> PathBuf {
        self.prefix.join("Library/Taps")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.prefix.join("casket_cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.prefix.join("casket_logs")
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.prefix.join("opt")
    }

    pub fn target_dir(&self, category: TargetCategory) -> &Path {
        self.targets.get(category)
    }

    pub fn appdir(&self) -> &Path {
        self.target_dir(TargetCategory::App)
    }

    pub fn binarydir(&self) -> &Path {
        self.target_dir(TargetCategory::Binary)
    }

    /// `<taps>/<user>/homebrew-<repo>` for a `user/repo` tap name.
    pub fn tap_path(&self, name: &str) -> Option<PathBuf> {
        let (user, repo) = name.split_once('/')?;
        if user.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        let repo = repo.strip_prefix("homebrew-").unwrap_or(repo);
        Some(self.taps_dir().join(user).join(format!("homebrew-{repo}")))
    }
}
