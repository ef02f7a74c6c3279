// casket-core/src/macos/system.rs
use std::path::Path;

use casket_common::model::depends_on::{CpuKind, HardwareArch, MacOsVersion};
use tracing::debug;

use crate::exec::{CommandExecutor, CommandSpec, SystemCommand};

/// Facts about the running machine that `depends_on` is checked against.
pub trait SystemInfo {
    /// Running macOS release, `None` when not on macOS.
    fn macos_version(&self) -> Option<MacOsVersion>;
    fn hardware_arch(&self) -> HardwareArch;
    fn x11_installed(&self) -> bool;
}

/// The machine casket is running on.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostSystem;

impl SystemInfo for HostSystem {
    fn macos_version(&self) -> Option<MacOsVersion> {
        if !cfg!(target_os = "macos") {
            return None;
        }
        let output = SystemCommand
            .run(&CommandSpec::new("/usr/bin/sw_vers").arg("-productVersion"))
            .ok()?;
        let version = MacOsVersion::parse(output.stdout.trim());
        debug!("Running macOS release: {:?}", version);
        version
    }

    fn hardware_arch(&self) -> HardwareArch {
        match std::env::consts::ARCH {
            "aarch64" => HardwareArch {
                kind: CpuKind::Arm,
                bits: 64,
            },
            "arm" => HardwareArch {
                kind: CpuKind::Arm,
                bits: 32,
            },
            "x86" => HardwareArch {
                kind: CpuKind::Intel,
                bits: 32,
            },
            _ => HardwareArch {
                kind: CpuKind::Intel,
                bits: 64,
            },
        }
    }

    fn x11_installed(&self) -> bool {
        Path::new("/opt/X11/bin/Xquartz").exists()
            || Path::new("/Applications/Utilities/XQuartz.app").exists()
            || which::which("Xquartz").is_ok()
    }
}
