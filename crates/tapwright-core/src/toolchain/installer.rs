//! Installation of the Android command-line tools.
//!
//! [`ToolInstaller::install`] makes a set of [`KnownTool`]s available in an
//! SDK directory. When `sdkmanager` is missing it downloads Google's
//! command-line tools archive, verifies its SHA-256 and unpacks it into
//! `cmdline-tools/latest`. Remaining tools are installed through
//! `sdkmanager`. The outcome is always an [`InstallResult`]; partial failures
//! are reported per tool so callers can retry only what failed.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{scan_tools, HostEnv, HostOs, HostPlatform, KnownTool, SystemEnv, ToolLocation, ToolchainError};
use crate::process::{CommandRunner, CommandSpec};

/// Build number of the pinned command-line tools release.
pub const CMDLINE_TOOLS_BUILD: &str = "11076708";

const DOWNLOAD_BASE: &str = "https://dl.google.com/android/repository";
const SDKMANAGER_TIMEOUT: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest wait for the next chunk of a download before it counts as stalled.
const STALL_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(1800);
const LICENSE_ANSWERS: usize = 32;

/// A downloadable archive and its published checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    /// Download URL.
    pub url: String,
    /// Expected SHA-256, lowercase hex.
    pub sha256: String,
}

impl ArchiveSpec {
    /// The pinned command-line tools archive for `platform`.
    ///
    /// Google publishes one archive per OS; it serves every architecture.
    pub fn cmdline_tools(platform: HostPlatform) -> Self {
        let (os, sha256) = match platform.os {
            HostOs::Linux => (
                "linux",
                "2d2d50857e4eb553af5a6dc3ad507a17adf43d115264b1afc116f95c92e5e258",
            ),
            HostOs::Macos => (
                "mac",
                "7bc5c72ba0275c80a8f19684fb92793b83a6b5c94d4d179fc5988930282d7e64",
            ),
            HostOs::Windows => (
                "win",
                "4d6931209eebb1bfb7c7e8b240a6a3cb3ab24479ea294f3539429574b1eec862",
            ),
        };
        Self {
            url: format!("{DOWNLOAD_BASE}/commandlinetools-{os}-{CMDLINE_TOOLS_BUILD}_latest.zip"),
            sha256: sha256.to_string(),
        }
    }
}

/// Downloads archives to disk.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync + std::fmt::Debug {
    /// Writes the body at `url` to `dest`.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), ToolchainError>;
}

/// [`ArchiveFetcher`] over HTTPS.
///
/// Connecting, waiting for each chunk, and the whole transfer are each
/// bounded, so a stalled server fails the download instead of hanging it.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    connect_timeout: Duration,
    stall_timeout: Duration,
    total_timeout: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            stall_timeout: STALL_TIMEOUT,
            total_timeout: DOWNLOAD_TIMEOUT,
        }
    }
}

impl HttpFetcher {
    /// Creates a fetcher with the default timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the connect, per-chunk and whole-transfer timeouts.
    pub fn with_timeouts(mut self, connect: Duration, stall: Duration, total: Duration) -> Self {
        self.connect_timeout = connect;
        self.stall_timeout = stall;
        self.total_timeout = total;
        self
    }

    fn client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.total_timeout)
            .build()
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), ToolchainError> {
        let download_err = |message: String| ToolchainError::Download {
            url: url.to_string(),
            message,
        };
        let stalled = || download_err(format!("no data for {}s", self.stall_timeout.as_secs_f64()));

        let client = self.client().map_err(|e| download_err(e.to_string()))?;
        let mut response = tokio::time::timeout(self.stall_timeout, client.get(url).send())
            .await
            .map_err(|_| stalled())?
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| download_err(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        loop {
            let chunk = tokio::time::timeout(self.stall_timeout, response.chunk())
                .await
                .map_err(|_| stalled())?
                .map_err(|e| download_err(e.to_string()))?;
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(url, bytes = written, "download complete");
        Ok(())
    }
}

/// Outcome of an installation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallResult {
    /// True when every requested tool is present afterwards.
    pub success: bool,
    /// Requested tools present after the attempt.
    pub installed_tools: Vec<KnownTool>,
    /// Requested tools still missing.
    pub failed_tools: Vec<KnownTool>,
    /// SDK directory that was targeted.
    pub installation_path: PathBuf,
    /// Human-readable summary.
    pub message: String,
}

/// Installs missing SDK tools.
#[derive(Debug, Clone)]
pub struct ToolInstaller {
    runner: Arc<dyn CommandRunner>,
    fetcher: Arc<dyn ArchiveFetcher>,
    env: Arc<dyn HostEnv>,
    platform: HostPlatform,
    archive: ArchiveSpec,
    default_dir: Option<PathBuf>,
}

impl ToolInstaller {
    /// An installer for the current host that downloads over HTTPS.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let platform = HostPlatform::current();
        Self {
            runner,
            fetcher: Arc::new(HttpFetcher::new()),
            env: Arc::new(SystemEnv),
            platform,
            archive: ArchiveSpec::cmdline_tools(platform),
            default_dir: None,
        }
    }

    /// Replaces the archive downloader.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replaces the environment used to compute the default install path.
    pub fn with_env(mut self, env: Arc<dyn HostEnv>) -> Self {
        self.env = env;
        self
    }

    /// Targets `platform`, resetting the archive to that platform's release.
    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self.archive = ArchiveSpec::cmdline_tools(platform);
        self
    }

    /// Overrides the archive to download.
    pub fn with_archive(mut self, archive: ArchiveSpec) -> Self {
        self.archive = archive;
        self
    }

    /// Install directory used when no location is given, ahead of the
    /// per-OS default.
    pub fn with_default_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.default_dir = dir;
        self
    }

    /// Per-OS user-local SDK directory.
    pub fn default_install_path(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.default_dir {
            return Some(dir.clone());
        }
        match self.platform.os {
            HostOs::Macos => self
                .env
                .home_dir()
                .map(|h| h.join("Library").join("Android").join("sdk")),
            HostOs::Linux => self.env.home_dir().map(|h| h.join("Android").join("Sdk")),
            HostOs::Windows => self
                .env
                .var("LOCALAPPDATA")
                .map(|d| PathBuf::from(d).join("Android").join("Sdk")),
        }
    }

    /// Makes `tools` available in `location`, or in the default install
    /// directory when `location` is `None`.
    ///
    /// Never fails: errors are folded into the returned [`InstallResult`].
    pub async fn install(&self, location: Option<&ToolLocation>, tools: &[KnownTool]) -> InstallResult {
        let target = match location.map(|l| l.path.clone()).or_else(|| self.default_install_path()) {
            Some(target) => target,
            None => {
                let err = ToolchainError::NoInstallDir { os: self.platform.os };
                warn!(error = %err, "install aborted");
                return InstallResult {
                    success: false,
                    installed_tools: Vec::new(),
                    failed_tools: tools.to_vec(),
                    installation_path: PathBuf::new(),
                    message: err.to_string(),
                };
            }
        };

        let span = info_span!("install_tools", path = %target.display());
        async move {
            let outcome = self.install_into(&target, tools).await;
            let present = scan_off_thread(&target, self.platform.os).await;
            let (installed_tools, failed_tools): (Vec<KnownTool>, Vec<KnownTool>) =
                tools.iter().copied().partition(|t| present.contains(t));
            let success = failed_tools.is_empty();

            let message = match (&outcome, success) {
                (Ok(false), true) => "all requested tools already installed".to_string(),
                (_, true) => format!("installed {} tool(s) into {}", installed_tools.len(), target.display()),
                (Err(e), false) => {
                    warn!(error = %e, "installation failed");
                    format!("installation failed: {e}")
                }
                (Ok(_), false) => format!("tools still missing after install: {}", join_names(&failed_tools)),
            };
            info!(success, installed = installed_tools.len(), failed = failed_tools.len(), "install finished");

            InstallResult {
                success,
                installed_tools,
                failed_tools,
                installation_path: target.clone(),
                message,
            }
        }
        .instrument(span)
        .await
    }

    /// Returns `Ok(true)` if anything was attempted, `Ok(false)` if every
    /// requested tool was already present.
    async fn install_into(&self, target: &Path, tools: &[KnownTool]) -> Result<bool, ToolchainError> {
        let present = scan_off_thread(target, self.platform.os).await;
        let missing: Vec<KnownTool> = tools.iter().copied().filter(|t| !present.contains(t)).collect();
        if missing.is_empty() {
            return Ok(false);
        }
        debug!(missing = %join_names(&missing), "tools to install");

        tokio::fs::create_dir_all(target).await?;

        if !present.contains(&KnownTool::Sdkmanager) {
            self.install_cmdline_tools(target).await?;
        }

        let mut packages: Vec<&str> = missing.iter().filter_map(|t| t.sdk_package()).collect();
        packages.dedup();
        if !packages.is_empty() {
            self.run_sdkmanager(target, &packages).await?;
        }
        Ok(true)
    }

    async fn install_cmdline_tools(&self, target: &Path) -> Result<(), ToolchainError> {
        let archive_path = target.join(format!(".tapwright-download-{}.zip", uuid::Uuid::new_v4()));
        info!(url = %self.archive.url, "downloading command-line tools");

        let result: Result<(), ToolchainError> = async {
            self.fetcher.fetch(&self.archive.url, &archive_path).await?;

            let expected = self.archive.sha256.clone();
            let path = archive_path.clone();
            let actual = tokio::task::spawn_blocking(move || hash_file(&path))
                .await
                .map_err(|e| ToolchainError::Extract(e.to_string()))??;
            if !actual.eq_ignore_ascii_case(&expected) {
                return Err(ToolchainError::ChecksumMismatch { expected, actual });
            }

            let dest = target.join("cmdline-tools").join("latest");
            let path = archive_path.clone();
            tokio::task::spawn_blocking(move || extract_archive(&path, &dest))
                .await
                .map_err(|e| ToolchainError::Extract(e.to_string()))?
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            debug!(path = %archive_path.display(), error = %e, "could not remove downloaded archive");
        }
        result
    }

    async fn run_sdkmanager(&self, target: &Path, packages: &[&str]) -> Result<(), ToolchainError> {
        let sdkmanager = KnownTool::Sdkmanager
            .locate(target, self.platform.os)
            .ok_or_else(|| ToolchainError::Extract("sdkmanager missing after extraction".to_string()))?;
        let spec = CommandSpec::new(sdkmanager.to_string_lossy())
            .arg(format!("--sdk_root={}", target.display()))
            .args(packages.iter().copied())
            .stdin("y\n".repeat(LICENSE_ANSWERS))
            .timeout(SDKMANAGER_TIMEOUT);
        info!(packages = %packages.join(" "), "running sdkmanager");
        self.runner.run(&spec).await?;
        Ok(())
    }
}

fn join_names(tools: &[KnownTool]) -> String {
    tools.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
}

/// SHA-256 of a file as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String, ToolchainError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Unpacks `archive` into `dest`, dropping the archive's top-level directory.
///
/// Entries whose path would land outside `dest` abort the extraction.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ToolchainError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| ToolchainError::Extract(e.to_string()))?;
    std::fs::create_dir_all(dest)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| ToolchainError::Extract(e.to_string()))?;
        let raw_name = entry.name().to_string();
        let relative = entry
            .enclosed_name()
            .and_then(|p| strip_top_dir(&p))
            .ok_or_else(|| ToolchainError::Extract(format!("unsafe entry path '{raw_name}'")))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let in_bin = relative.components().any(|c| c.as_os_str() == "bin");
            let mode = (entry.unix_mode().unwrap_or(0o644) & 0o7777) | if in_bin { 0o755 } else { 0 };
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }
    }
    debug!(dest = %dest.display(), entries = zip.len(), "archive extracted");
    Ok(())
}

/// Removes the first path component. `None` when the path has anything but
/// plain components.
fn strip_top_dir(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    match components.next()? {
        Component::Normal(_) => {}
        _ => return None,
    }
    let mut rest = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => rest.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(rest)
}

/// [`scan_tools`] on the blocking pool.
async fn scan_off_thread(root: &Path, os: HostOs) -> Vec<KnownTool> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_tools(&root, os))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "tool scan failed");
            Vec::new()
        })
}
