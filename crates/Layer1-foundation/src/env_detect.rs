//! Environment Detection - host OS / architecture / hostname

use serde::Serialize;
use std::path::PathBuf;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Windows,
    MacOS,
    Linux,
    Unknown,
}

impl OsType {
    pub fn detect() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOS
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::MacOS => "macOS",
            Self::Linux => "Linux",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Static facts about the host the engine runs on
#[derive(Debug, Clone, Serialize)]
pub struct HostInfo {
    pub os: OsType,
    pub arch: &'static str,
    pub hostname: Option<String>,
    pub pid: u32,
    pub home_dir: Option<PathBuf>,
}

impl HostInfo {
    pub fn detect() -> Self {
        Self {
            os: OsType::detect(),
            arch: std::env::consts::ARCH,
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
            pid: std::process::id(),
            home_dir: dirs::home_dir(),
        }
    }
}
