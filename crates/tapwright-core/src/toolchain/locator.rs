//! Discovery and ranking of Android SDK directories.
//!
//! Detection probes several independent sources, in priority order:
//!
//! 1. the Homebrew `android-commandlinetools` prefix,
//! 2. `ANDROID_HOME`, then `ANDROID_SDK_ROOT`,
//! 3. conventional per-OS install directories,
//! 4. SDK roots derived from tool binaries found on `PATH`,
//! 5. a manually configured root.
//!
//! A failing source is logged and skipped. Each candidate directory is
//! scanned for the [`KnownTool`] registry; directories exposing no tools are
//! ignored and duplicate directories keep their highest-priority source.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info_span, warn, Instrument, Span};

use super::{scan_tools, HostArch, HostEnv, HostOs, HostPlatform, KnownTool, SystemEnv, ToolLocation, ToolSource};
use crate::process::{which_with, CommandRunner};

const PATH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const HOMEBREW_PACKAGE_DIR: &str = "share/android-commandlinetools";

/// Outcome of [`validate_required`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// True when nothing is missing.
    pub valid: bool,
    /// Required tools absent from the location, in request order.
    pub missing: Vec<KnownTool>,
}

/// Finds SDK directories on the host.
#[derive(Debug, Clone)]
pub struct ToolchainLocator {
    runner: Arc<dyn CommandRunner>,
    env: Arc<dyn HostEnv>,
    platform: HostPlatform,
    manual_root: Option<PathBuf>,
}

impl ToolchainLocator {
    /// A locator for the current host using the real environment.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            env: Arc::new(SystemEnv),
            platform: HostPlatform::current(),
            manual_root: None,
        }
    }

    /// Replaces the environment used for variable and home lookups.
    pub fn with_env(mut self, env: Arc<dyn HostEnv>) -> Self {
        self.env = env;
        self
    }

    /// Pretends to run on `platform`.
    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    /// Adds a user-configured SDK root, reported as [`ToolSource::Manual`].
    pub fn with_manual_root(mut self, root: Option<PathBuf>) -> Self {
        self.manual_root = root;
        self
    }

    /// Host platform this locator probes for.
    pub fn platform(&self) -> HostPlatform {
        self.platform
    }

    /// Homebrew install prefix for the command-line tools, if the host has
    /// one. `HOMEBREW_PREFIX` overrides the per-OS default.
    pub fn homebrew_root(&self) -> Option<PathBuf> {
        if let Some(prefix) = self.env.var("HOMEBREW_PREFIX") {
            return Some(PathBuf::from(prefix).join(HOMEBREW_PACKAGE_DIR));
        }
        let prefix = match self.platform.os {
            HostOs::Macos if self.platform.arch == HostArch::Aarch64 => "/opt/homebrew",
            HostOs::Macos => "/usr/local",
            HostOs::Linux => "/home/linuxbrew/.linuxbrew",
            HostOs::Windows => return None,
        };
        Some(PathBuf::from(prefix).join(HOMEBREW_PACKAGE_DIR))
    }

    /// Conventional SDK directories for the host OS.
    pub fn typical_roots(&self) -> Vec<PathBuf> {
        let home = self.env.home_dir();
        match self.platform.os {
            HostOs::Macos => home
                .map(|h| h.join("Library").join("Android").join("sdk"))
                .into_iter()
                .collect(),
            HostOs::Linux => {
                let mut roots: Vec<PathBuf> = home.map(|h| h.join("Android").join("Sdk")).into_iter().collect();
                roots.push(PathBuf::from("/opt/android-sdk"));
                roots.push(PathBuf::from("/usr/lib/android-sdk"));
                roots
            }
            HostOs::Windows => {
                let mut roots: Vec<PathBuf> = self
                    .env
                    .var("LOCALAPPDATA")
                    .map(|d| PathBuf::from(d).join("Android").join("Sdk"))
                    .into_iter()
                    .collect();
                roots.push(PathBuf::from(r"C:\Android\sdk"));
                roots
            }
        }
    }

    /// Asks the host's PATH lookup command where each known tool lives and
    /// derives the SDK root from the answer.
    async fn path_roots(&self) -> Vec<PathBuf> {
        let lookup = match self.platform.os {
            HostOs::Windows => "where",
            _ => "which",
        };
        let mut binaries: Vec<PathBuf> = Vec::new();
        for tool in KnownTool::ALL {
            if let Some(found) = which_with(self.runner.as_ref(), lookup, tool.name(), PATH_PROBE_TIMEOUT).await {
                let binary = tokio::fs::canonicalize(&found).await.unwrap_or(found);
                binaries.push(binary);
            }
        }
        if binaries.is_empty() {
            return Vec::new();
        }

        let os = self.platform.os;
        match tokio::task::spawn_blocking(move || roots_for_binaries(&binaries, os)).await {
            Ok(roots) => roots,
            Err(e) => {
                warn!(error = %e, "PATH root derivation failed");
                Vec::new()
            }
        }
    }

    fn candidates_from_env(&self) -> Vec<(PathBuf, ToolSource)> {
        [
            ("ANDROID_HOME", ToolSource::AndroidHome),
            ("ANDROID_SDK_ROOT", ToolSource::AndroidSdkRoot),
        ]
        .into_iter()
        .filter_map(|(key, source)| self.env.var(key).map(|v| (PathBuf::from(v), source)))
        .collect()
    }

    /// Probes every source and returns the usable locations, best first.
    pub async fn detect(&self) -> Vec<ToolLocation> {
        let span = info_span!("detect_toolchain", os = %self.platform.os);
        async move {
            let mut candidates: Vec<(PathBuf, ToolSource)> = Vec::new();
            if let Some(root) = self.homebrew_root() {
                candidates.push((root, ToolSource::Homebrew));
            }
            candidates.extend(self.candidates_from_env());
            candidates.extend(self.typical_roots().into_iter().map(|r| (r, ToolSource::Typical)));
            candidates.extend(self.path_roots().await.into_iter().map(|r| (r, ToolSource::Path)));
            if let Some(root) = &self.manual_root {
                candidates.push((root.clone(), ToolSource::Manual));
            }

            let os = self.platform.os;
            let current = Span::current();
            let found = tokio::task::spawn_blocking(move || current.in_scope(|| collect_locations(candidates, os)))
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "toolchain scan failed");
                    Vec::new()
                });
            debug!(count = found.len(), "toolchain detection finished");
            found
        }
        .instrument(span)
        .await
    }
}

/// Inspects every candidate, collapsing duplicate directories onto their
/// highest-priority source. Blocking: walks the filesystem.
fn collect_locations(candidates: Vec<(PathBuf, ToolSource)>, os: HostOs) -> Vec<ToolLocation> {
    let mut found: Vec<ToolLocation> = Vec::new();
    let mut seen: HashMap<PathBuf, usize> = HashMap::new();
    for (root, source) in candidates {
        let Some(location) = inspect(&root, source, os) else {
            continue;
        };
        let key = std::fs::canonicalize(&root).unwrap_or(root);
        match seen.get(&key) {
            Some(&i) if found[i].source.priority() <= source.priority() => {
                debug!(path = %key.display(), %source, kept = %found[i].source, "duplicate location");
            }
            Some(&i) => found[i] = location,
            None => {
                seen.insert(key, found.len());
                found.push(location);
            }
        }
    }
    found.sort_by_key(|l| l.source.priority());
    found
}

/// SDK roots for binaries resolved on PATH. A binary whose derived root
/// exposes no tools (a loose `~/bin/adb`) is rooted at its own directory.
/// Blocking: scans the filesystem.
fn roots_for_binaries(binaries: &[PathBuf], os: HostOs) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for binary in binaries {
        let Some(derived) = sdk_root_for_binary(binary) else {
            debug!(binary = %binary.display(), "could not derive SDK root");
            continue;
        };
        let root = if scan_tools(&derived, os).is_empty() {
            match binary.parent() {
                Some(dir) => dir.to_path_buf(),
                None => continue,
            }
        } else {
            derived
        };
        if !roots.contains(&root) {
            roots.push(root);
        }
    }
    roots
}

/// Builds a location for `root` if it exists and exposes at least one tool.
fn inspect(root: &Path, source: ToolSource, os: HostOs) -> Option<ToolLocation> {
    if !root.is_dir() {
        debug!(path = %root.display(), %source, "candidate directory missing");
        return None;
    }
    let available_tools = scan_tools(root, os);
    if available_tools.is_empty() {
        debug!(path = %root.display(), %source, "no known tools in candidate");
        return None;
    }
    Some(ToolLocation {
        path: root.to_path_buf(),
        source,
        version: read_platform_tools_version(root),
        available_tools,
    })
}

/// Reads `Pkg.Revision` from `platform-tools/source.properties`.
pub fn read_platform_tools_version(root: &Path) -> Option<String> {
    let text = std::fs::read_to_string(root.join("platform-tools").join("source.properties")).ok()?;
    parse_pkg_revision(&text)
}

fn parse_pkg_revision(properties: &str) -> Option<String> {
    properties.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "Pkg.Revision")
            .then(|| value.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Walks up from a tool binary to the SDK root that contains it.
pub fn sdk_root_for_binary(binary: &Path) -> Option<PathBuf> {
    let dir = binary.parent()?;
    let root = match dir.file_name().and_then(OsStr::to_str)? {
        "platform-tools" | "emulator" => dir.parent()?,
        "bin" => {
            let parent = dir.parent()?;
            let grandparent = parent.parent();
            match parent.file_name().and_then(OsStr::to_str) {
                Some("latest")
                    if grandparent.and_then(Path::file_name) == Some(OsStr::new("cmdline-tools")) =>
                {
                    grandparent?.parent()?
                }
                Some("cmdline-tools") | Some("tools") => grandparent?,
                _ => parent,
            }
        }
        _ => dir,
    };
    Some(root.to_path_buf())
}

/// Picks the preferred location: best source priority, then most tools.
/// Ties keep the earlier entry.
pub fn select_best(locations: &[ToolLocation]) -> Option<&ToolLocation> {
    locations
        .iter()
        .min_by_key(|l| (l.source.priority(), Reverse(l.available_tools.len())))
}

/// Checks that every tool in `required` is available in `location`.
pub fn validate_required(location: &ToolLocation, required: &[KnownTool]) -> ValidationResult {
    let missing: Vec<KnownTool> = required
        .iter()
        .copied()
        .filter(|tool| !location.has(*tool))
        .collect();
    ValidationResult {
        valid: missing.is_empty(),
        missing,
    }
}

/// Full path of `tool` inside `location` on this host, if present.
pub fn tool_path(location: &ToolLocation, tool: KnownTool) -> Option<PathBuf> {
    tool.locate(&location.path, HostOs::current())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessExecutor;
    use crate::toolchain::{FixedEnv, HostArch};

    fn location(source: ToolSource, tools: &[KnownTool]) -> ToolLocation {
        ToolLocation {
            path: PathBuf::from(format!("/sdk/{source}")),
            source,
            version: None,
            available_tools: tools.to_vec(),
        }
    }

    #[test]
    fn homebrew_beats_typical_with_more_tools() {
        let locations = vec![
            location(
                ToolSource::Typical,
                &[KnownTool::Adb, KnownTool::Emulator, KnownTool::Sdkmanager],
            ),
            location(ToolSource::Homebrew, &[KnownTool::Adb]),
        ];
        assert_eq!(select_best(&locations).unwrap().source, ToolSource::Homebrew);
    }

    #[test]
    fn equal_priority_prefers_more_tools() {
        let locations = vec![
            location(ToolSource::Typical, &[KnownTool::Adb]),
            location(ToolSource::Typical, &[KnownTool::Adb, KnownTool::Emulator]),
        ];
        assert_eq!(select_best(&locations).unwrap().available_tools.len(), 2);
    }

    #[test]
    fn select_best_of_nothing() {
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn validate_reports_missing_in_request_order() {
        let loc = location(ToolSource::Path, &[KnownTool::Adb]);
        let result = validate_required(&loc, &[KnownTool::Sdkmanager, KnownTool::Adb, KnownTool::Emulator]);
        assert!(!result.valid);
        assert_eq!(result.missing, vec![KnownTool::Sdkmanager, KnownTool::Emulator]);
        assert!(validate_required(&loc, &[KnownTool::Adb]).valid);
        assert!(validate_required(&loc, &[]).valid);
    }

    #[test]
    fn sdk_root_from_binary_layouts() {
        let cases = [
            ("/sdk/platform-tools/adb", "/sdk"),
            ("/sdk/emulator/emulator", "/sdk"),
            ("/sdk/cmdline-tools/latest/bin/sdkmanager", "/sdk"),
            ("/sdk/cmdline-tools/bin/sdkmanager", "/sdk"),
            ("/sdk/tools/bin/avdmanager", "/sdk"),
            ("/opt/homebrew/share/android-commandlinetools/cmdline-tools/latest/bin/sdkmanager",
             "/opt/homebrew/share/android-commandlinetools"),
            ("/sdk/bin/sdkmanager", "/sdk"),
        ];
        for (binary, root) in cases {
            assert_eq!(sdk_root_for_binary(Path::new(binary)), Some(PathBuf::from(root)), "{binary}");
        }
    }

    #[test]
    fn loose_binary_on_path_is_rooted_at_its_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("adb"), "").unwrap();

        assert_eq!(sdk_root_for_binary(&bin.join("adb")), Some(tmp.path().to_path_buf()));
        assert_eq!(roots_for_binaries(&[bin.join("adb")], HostOs::Linux), vec![bin.clone()]);
        assert_eq!(scan_tools(&bin, HostOs::Linux), vec![KnownTool::Adb]);
    }

    #[test]
    fn sdk_binary_keeps_derived_root() {
        let tmp = tempfile::tempdir().unwrap();
        let adb = tmp.path().join("platform-tools").join("adb");
        std::fs::create_dir_all(adb.parent().unwrap()).unwrap();
        std::fs::write(&adb, "").unwrap();
        assert_eq!(roots_for_binaries(&[adb], HostOs::Linux), vec![tmp.path().to_path_buf()]);
    }

    #[test]
    fn pkg_revision_parsing() {
        let props = "Pkg.UserSrc=false\nPkg.Revision=35.0.1\nPkg.Path=platform-tools\n";
        assert_eq!(parse_pkg_revision(props).as_deref(), Some("35.0.1"));
        assert_eq!(parse_pkg_revision("Pkg.Path=x\n"), None);
        assert_eq!(parse_pkg_revision("Pkg.Revision=\n"), None);
    }

    #[test]
    fn homebrew_root_per_platform() {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessExecutor::new());
        let env = Arc::new(FixedEnv::new());
        let locator = ToolchainLocator::new(runner).with_env(env);

        let mac_arm = locator
            .clone()
            .with_platform(HostPlatform::new(HostOs::Macos, HostArch::Aarch64));
        assert_eq!(
            mac_arm.homebrew_root(),
            Some(PathBuf::from("/opt/homebrew/share/android-commandlinetools"))
        );
        let windows = locator
            .clone()
            .with_platform(HostPlatform::new(HostOs::Windows, HostArch::X86_64));
        assert_eq!(windows.homebrew_root(), None);

        let overridden = locator.with_env(Arc::new(
            FixedEnv::new().with_var("HOMEBREW_PREFIX", "/brew"),
        ));
        assert_eq!(
            overridden.homebrew_root(),
            Some(PathBuf::from("/brew/share/android-commandlinetools"))
        );
    }
}
