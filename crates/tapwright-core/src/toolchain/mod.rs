//! Android SDK tool discovery and installation.
//!
//! [`locator`] finds SDK directories already on the machine and ranks them;
//! [`installer`] downloads the command-line tools into a location when
//! something required is missing. Host facts (OS, environment, home
//! directory) flow through [`HostPlatform`] and [`HostEnv`] so both can be
//! exercised against fake machines.

pub mod installer;
pub mod locator;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::ProcessError;

pub use installer::{ArchiveFetcher, ArchiveSpec, HttpFetcher, InstallResult, ToolInstaller};
pub use locator::{select_best, tool_path, validate_required, ToolchainLocator, ValidationResult};

/// Errors from toolchain detection and installation.
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// A tool name is not in the known registry.
    #[error("unknown tool '{0}' (expected one of: adb, emulator, sdkmanager, avdmanager)")]
    UnknownTool(String),

    /// No install directory could be determined.
    #[error("could not determine an install directory for {os}")]
    NoInstallDir {
        /// Host operating system.
        os: HostOs,
    },

    /// Downloading the archive failed.
    #[error("download of {url} failed: {message}")]
    Download {
        /// Archive URL.
        url: String,
        /// Underlying error text.
        message: String,
    },

    /// The downloaded archive does not match its published checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Published SHA-256.
        expected: String,
        /// SHA-256 of the downloaded file.
        actual: String,
    },

    /// The archive could not be unpacked.
    #[error("extraction failed: {0}")]
    Extract(String),

    /// A tool command failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolchainError {
    /// Returns true if the user can fix this error directly.
    pub fn is_actionable(&self) -> bool {
        match self {
            ToolchainError::UnknownTool(_) | ToolchainError::NoInstallDir { .. } => true,
            ToolchainError::Process(e) => e.is_actionable(),
            _ => false,
        }
    }

    /// Remediation hint for actionable errors.
    pub fn hint(&self) -> Option<String> {
        match self {
            ToolchainError::UnknownTool(_) => {
                Some("Use one of: adb, emulator, sdkmanager, avdmanager".to_string())
            }
            ToolchainError::NoInstallDir { .. } => Some(
                "Pass an explicit location or set install_dir in ~/.tapwright/config.json".to_string(),
            ),
            ToolchainError::ChecksumMismatch { .. } => {
                Some("The download may be corrupted or intercepted; retry the install".to_string())
            }
            _ => None,
        }
    }
}

/// Host operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    /// macOS.
    Macos,
    /// Linux and other Unix-likes.
    Linux,
    /// Windows.
    Windows,
}

impl HostOs {
    /// The OS this binary was built for. Unix-likes other than macOS map to
    /// [`HostOs::Linux`].
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => HostOs::Macos,
            "windows" => HostOs::Windows,
            _ => HostOs::Linux,
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostOs::Macos => "macos",
            HostOs::Linux => "linux",
            HostOs::Windows => "windows",
        })
    }
}

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostArch {
    /// x86-64.
    X86_64,
    /// 64-bit ARM.
    Aarch64,
    /// Anything else.
    Other,
}

impl HostArch {
    /// The architecture this binary was built for.
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => HostArch::X86_64,
            "aarch64" => HostArch::Aarch64,
            _ => HostArch::Other,
        }
    }
}

/// Operating system and architecture of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPlatform {
    /// Operating system.
    pub os: HostOs,
    /// CPU architecture.
    pub arch: HostArch,
}

impl HostPlatform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        Self {
            os: HostOs::current(),
            arch: HostArch::current(),
        }
    }

    /// Creates a platform description.
    pub fn new(os: HostOs, arch: HostArch) -> Self {
        Self { os, arch }
    }
}

/// Environment variables and home directory of the host.
pub trait HostEnv: Send + Sync + fmt::Debug {
    /// Value of an environment variable, if set and non-empty.
    fn var(&self, key: &str) -> Option<String>;

    /// The user's home directory.
    fn home_dir(&self) -> Option<PathBuf>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnv;

impl HostEnv for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }

    fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

/// A fixed environment, for tests and for pinning detection to known roots.
#[derive(Debug, Default, Clone)]
pub struct FixedEnv {
    vars: HashMap<String, String>,
    home: Option<PathBuf>,
}

impl FixedEnv {
    /// An environment with no variables and no home directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Sets the home directory.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }
}

impl HostEnv for FixedEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).filter(|v| !v.is_empty()).cloned()
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone()
    }
}

/// The SDK tools tapwright knows how to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownTool {
    /// Android Debug Bridge.
    Adb,
    /// Android emulator launcher.
    Emulator,
    /// SDK package manager.
    Sdkmanager,
    /// Virtual device manager.
    Avdmanager,
}

impl KnownTool {
    /// Every known tool.
    pub const ALL: [KnownTool; 4] = [
        KnownTool::Adb,
        KnownTool::Emulator,
        KnownTool::Sdkmanager,
        KnownTool::Avdmanager,
    ];

    /// Binary name without extension.
    pub fn name(self) -> &'static str {
        match self {
            KnownTool::Adb => "adb",
            KnownTool::Emulator => "emulator",
            KnownTool::Sdkmanager => "sdkmanager",
            KnownTool::Avdmanager => "avdmanager",
        }
    }

    /// Directories, relative to an SDK root, where the binary may live.
    /// Earlier entries win. The root itself comes last so a directory of
    /// loose binaries (e.g. `~/bin` on `PATH`) still counts as a location.
    pub fn search_dirs(self) -> &'static [&'static str] {
        match self {
            KnownTool::Adb => &["platform-tools", ""],
            KnownTool::Emulator => &["emulator", ""],
            KnownTool::Sdkmanager | KnownTool::Avdmanager => {
                &["cmdline-tools/latest/bin", "cmdline-tools/bin", "tools/bin", "bin", ""]
            }
        }
    }

    /// On-disk file name for `os`.
    pub fn file_name(self, os: HostOs) -> String {
        match (os, self) {
            (HostOs::Windows, KnownTool::Sdkmanager | KnownTool::Avdmanager) => {
                format!("{}.bat", self.name())
            }
            (HostOs::Windows, _) => format!("{}.exe", self.name()),
            _ => self.name().to_string(),
        }
    }

    /// The `sdkmanager` package that provides this tool, if it is not part
    /// of the command-line tools archive itself.
    pub fn sdk_package(self) -> Option<&'static str> {
        match self {
            KnownTool::Adb => Some("platform-tools"),
            KnownTool::Emulator => Some("emulator"),
            KnownTool::Sdkmanager | KnownTool::Avdmanager => None,
        }
    }

    /// First existing path of this tool under `root`.
    pub fn locate(self, root: &Path, os: HostOs) -> Option<PathBuf> {
        let file_name = self.file_name(os);
        self.search_dirs()
            .iter()
            .map(|dir| root.join(dir).join(&file_name))
            .find(|candidate| candidate.is_file())
    }
}

impl fmt::Display for KnownTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KnownTool {
    type Err = ToolchainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KnownTool::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| ToolchainError::UnknownTool(s.to_string()))
    }
}

/// Lists the known tools present under `root`, in registry order.
pub fn scan_tools(root: &Path, os: HostOs) -> Vec<KnownTool> {
    KnownTool::ALL
        .into_iter()
        .filter(|tool| tool.locate(root, os).is_some())
        .collect()
}

/// Where a [`ToolLocation`] was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    /// Homebrew-managed install.
    Homebrew,
    /// `ANDROID_HOME`.
    AndroidHome,
    /// `ANDROID_SDK_ROOT`.
    AndroidSdkRoot,
    /// A conventional per-OS install directory.
    Typical,
    /// Derived from a binary found on `PATH`.
    Path,
    /// Configured by the user.
    Manual,
}

impl ToolSource {
    /// Rank used by [`select_best`]; lower is preferred.
    pub fn priority(self) -> u8 {
        match self {
            ToolSource::Homebrew => 0,
            ToolSource::AndroidHome => 1,
            ToolSource::AndroidSdkRoot => 2,
            ToolSource::Typical => 3,
            ToolSource::Path => 4,
            ToolSource::Manual => 5,
        }
    }
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolSource::Homebrew => "homebrew",
            ToolSource::AndroidHome => "android_home",
            ToolSource::AndroidSdkRoot => "android_sdk_root",
            ToolSource::Typical => "typical",
            ToolSource::Path => "path",
            ToolSource::Manual => "manual",
        })
    }
}

/// A discovered SDK directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolLocation {
    /// SDK root directory.
    pub path: PathBuf,
    /// How it was found.
    pub source: ToolSource,
    /// `Pkg.Revision` of `platform-tools`, when readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Known tools present under `path`.
    pub available_tools: Vec<KnownTool>,
}

impl ToolLocation {
    /// True if `tool` was found in this location.
    pub fn has(&self, tool: KnownTool) -> bool {
        self.available_tools.contains(&tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_suffixes() {
        assert_eq!(KnownTool::Adb.file_name(HostOs::Windows), "adb.exe");
        assert_eq!(KnownTool::Emulator.file_name(HostOs::Windows), "emulator.exe");
        assert_eq!(KnownTool::Sdkmanager.file_name(HostOs::Windows), "sdkmanager.bat");
        assert_eq!(KnownTool::Avdmanager.file_name(HostOs::Linux), "avdmanager");
    }

    #[test]
    fn tool_names_parse() {
        for tool in KnownTool::ALL {
            assert_eq!(tool.name().parse::<KnownTool>().unwrap(), tool);
        }
        let err = "fastboot".parse::<KnownTool>().unwrap_err();
        assert!(err.is_actionable());
        assert!(err.hint().is_some());
    }

    #[test]
    fn priority_order() {
        let ordered = [
            ToolSource::Homebrew,
            ToolSource::AndroidHome,
            ToolSource::AndroidSdkRoot,
            ToolSource::Typical,
            ToolSource::Path,
            ToolSource::Manual,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].priority() < pair[1].priority());
        }
    }

    #[test]
    fn scan_finds_tools_in_any_search_dir() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("platform-tools")).unwrap();
        std::fs::write(root.path().join("platform-tools/adb"), "").unwrap();
        std::fs::create_dir_all(root.path().join("tools/bin")).unwrap();
        std::fs::write(root.path().join("tools/bin/avdmanager"), "").unwrap();

        let tools = scan_tools(root.path(), HostOs::Linux);
        assert_eq!(tools, vec![KnownTool::Adb, KnownTool::Avdmanager]);
        assert!(scan_tools(root.path(), HostOs::Windows).is_empty());
    }

    #[test]
    fn fixed_env_ignores_empty_values() {
        let env = FixedEnv::new().with_var("ANDROID_HOME", "").with_var("X", "1");
        assert_eq!(env.var("ANDROID_HOME"), None);
        assert_eq!(env.var("X").as_deref(), Some("1"));
        assert_eq!(env.home_dir(), None);
    }

    #[test]
    fn location_serializes_snake_case_source() {
        let location = ToolLocation {
            path: PathBuf::from("/sdk"),
            source: ToolSource::AndroidSdkRoot,
            version: None,
            available_tools: vec![KnownTool::Adb],
        };
        let json = serde_json::to_value(&location).unwrap();
        assert_eq!(json["source"], "android_sdk_root");
        assert_eq!(json["available_tools"][0], "adb");
        assert!(json.get("version").is_none());
    }
}
