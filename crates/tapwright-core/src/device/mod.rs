//! Virtual device lifecycle across Android emulators and iOS simulators.
//!
//! Each tool family sits behind the [`DeviceBackend`] trait:
//!
//! - [`EmulatorBackend`] drives `emulator`, `adb` and `avdmanager`
//! - [`SimctlBackend`] drives `xcrun simctl`
//! - [`IdbBackend`] drives Facebook's `idb`
//!
//! [`DeviceController`] owns the backends and the shared device-list cache.
//! It confirms boots by polling, invalidates the cache on every mutation and
//! turns a missing tool binary into [`DeviceError::ToolNotInstalled`].

pub mod emulator;
pub mod idb;
pub mod simctl;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

use crate::bounds::Point;
use crate::cache::DeviceListCache;
use crate::config::TapwrightConfig;
use crate::motion::MotionPoint;
use crate::process::{CommandRunner, ProcessError};
use crate::toolchain::ToolLocation;

pub use emulator::EmulatorBackend;
pub use idb::IdbBackend;
pub use simctl::SimctlBackend;

/// Errors from device operations.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The backing command-line tool is not installed.
    #[error("'{tool}' is not installed")]
    ToolNotInstalled {
        /// Tool binary name.
        tool: String,
        /// How to install it.
        hint: String,
    },

    /// No device matches the given id or name.
    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    /// The boot command succeeded but the device never showed up as running.
    #[error("device '{device_id}' was not reported as booted within {timeout_ms}ms")]
    BootNotConfirmed {
        /// Requested device.
        device_id: String,
        /// How long we polled.
        timeout_ms: u64,
    },

    /// The tool exited with a non-zero status.
    #[error("'{command}' failed: {stderr}")]
    CommandFailed {
        /// Command line.
        command: String,
        /// Exit code, if any.
        code: Option<i32>,
        /// Standard error, verbatim.
        stderr: String,
    },

    /// The tool did not finish in time and was killed.
    #[error("'{command}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Command line.
        command: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Tool output did not have the expected shape.
    #[error("could not parse {what}: {message}")]
    Parse {
        /// What was being parsed.
        what: &'static str,
        /// Details.
        message: String,
    },

    /// The backend cannot perform this operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        /// Backend asked.
        backend: BackendKind,
        /// Operation name.
        operation: &'static str,
    },

    /// The controller has no backend of this kind.
    #[error("no {0} backend is configured")]
    BackendUnavailable(BackendKind),

    /// Other I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    pub(crate) fn parse(what: &'static str, message: impl Into<String>) -> Self {
        DeviceError::Parse {
            what,
            message: message.into(),
        }
    }

    /// Returns true if the user can fix this error directly.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            DeviceError::ToolNotInstalled { .. }
                | DeviceError::DeviceNotFound(_)
                | DeviceError::Unsupported { .. }
                | DeviceError::BackendUnavailable(_)
        )
    }

    /// Remediation hint for actionable errors.
    pub fn hint(&self) -> Option<String> {
        match self {
            DeviceError::ToolNotInstalled { hint, .. } => Some(hint.clone()),
            DeviceError::DeviceNotFound(_) => {
                Some("Run `tapwright devices list` to see available devices".to_string())
            }
            DeviceError::Unsupported { backend, .. } => Some(format!(
                "Use a different backend; {backend} cannot do this"
            )),
            DeviceError::BackendUnavailable(kind) => Some(format!(
                "The {kind} backend is not available on this host"
            )),
            _ => None,
        }
    }
}

/// Installation advice for a tool binary.
pub fn install_hint(program: &str) -> String {
    let name = Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(program);
    match name {
        "adb" | "emulator" | "sdkmanager" | "avdmanager" => format!(
            "Install the Android SDK tools with `tapwright tools install {name}`, or set ANDROID_HOME to an existing SDK"
        ),
        "xcrun" => "Install Xcode and its command-line tools (`xcode-select --install`)".to_string(),
        "idb" => "Install idb: `brew install facebook/fb/idb-companion` and `pip3 install fb-idb`".to_string(),
        other => format!("Install '{other}' and make sure it is on PATH"),
    }
}

impl From<ProcessError> for DeviceError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound { program } => DeviceError::ToolNotInstalled {
                hint: install_hint(&program),
                tool: program,
            },
            ProcessError::Timeout { command, timeout_ms } => DeviceError::Timeout { command, timeout_ms },
            ProcessError::Failed { command, code, stderr, stdout } => DeviceError::CommandFailed {
                command,
                code,
                stderr: if stderr.trim().is_empty() { stdout } else { stderr },
            },
            ProcessError::Io(e) => DeviceError::Io(e),
        }
    }
}

/// Target operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Android.
    Android,
    /// iOS.
    Ios,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        })
    }
}

/// Device tooling family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Android emulator via `emulator`/`adb`/`avdmanager`.
    Emulator,
    /// iOS simulator via `xcrun simctl`.
    Simctl,
    /// iOS simulator via `idb`.
    Idb,
}

impl BackendKind {
    /// Every backend kind.
    pub const ALL: [BackendKind; 3] = [BackendKind::Emulator, BackendKind::Simctl, BackendKind::Idb];

    /// Platform the backend targets.
    pub fn platform(self) -> Platform {
        match self {
            BackendKind::Emulator => Platform::Android,
            BackendKind::Simctl | BackendKind::Idb => Platform::Ios,
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Emulator => "emulator",
            BackendKind::Simctl => "simctl",
            BackendKind::Idb => "idb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown backend '{s}' (expected emulator, simctl or idb)"))
    }
}

/// A catalog entry; the device may be shut down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Display name (AVD name or simulator name).
    pub name: String,
    /// Target platform.
    pub platform: Platform,
    /// Stable identifier (AVD name or simulator UDID).
    pub device_id: String,
    /// Whether the device is currently running.
    pub is_running: bool,
    /// Hardware profile, when the tool reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// OS runtime or API level, when the tool reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

/// A running, addressable device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootedDevice {
    /// Display name.
    pub name: String,
    /// Target platform.
    pub platform: Platform,
    /// Address used by input and app commands (adb serial or UDID).
    pub device_id: String,
    /// Backend that reported the device.
    pub backend: BackendKind,
}

impl BootedDevice {
    /// True if `id` is this device's address or name.
    pub fn matches(&self, id: &str) -> bool {
        self.device_id == id || self.name == id
    }
}

/// Screen dimensions in logical points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    /// Width in points.
    pub width: f64,
    /// Height in points.
    pub height: f64,
    /// Physical pixels per point.
    pub scale: f64,
}

impl ScreenSize {
    /// Converts a pixel size and scale into points. A non-positive scale is
    /// rejected.
    pub fn from_pixels(width_px: u32, height_px: u32, scale: f64) -> Result<Self, DeviceError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(DeviceError::parse("screen size", format!("invalid scale {scale}")));
        }
        Ok(Self {
            width: f64::from(width_px) / scale,
            height: f64::from(height_px) / scale,
            scale,
        })
    }

    /// Size in physical pixels, rounded.
    pub fn pixels(&self) -> (u32, u32) {
        let to_px = |v: f64| (v * self.scale).round().clamp(0.0, f64::from(u32::MAX)) as u32;
        (to_px(self.width), to_px(self.height))
    }
}

/// Parameters for creating a virtual device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateDevice {
    /// Name of the new device.
    pub name: String,
    /// Hardware profile (`pixel_7`, `com.apple.CoreSimulator.SimDeviceType.iPhone-15`).
    pub device_type: String,
    /// OS runtime or API level (`34`, `system-images;android-34;google_apis;x86_64`,
    /// `com.apple.CoreSimulator.SimRuntime.iOS-17-0`).
    pub runtime: String,
}

/// One device tooling family.
#[async_trait]
pub trait DeviceBackend: Send + Sync + fmt::Debug {
    /// Which family this is.
    fn kind(&self) -> BackendKind;

    /// All known devices, running or not.
    async fn list(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Currently running devices.
    async fn booted(&self) -> Result<Vec<BootedDevice>, DeviceError>;

    /// Starts a device. Succeeds if it is already running.
    async fn boot(&self, device_id: &str) -> Result<(), DeviceError>;

    /// Stops a running device.
    async fn shutdown(&self, device_id: &str) -> Result<(), DeviceError>;

    /// Creates a new device.
    async fn create(&self, request: &CreateDevice) -> Result<DeviceInfo, DeviceError>;

    /// Deletes a device.
    async fn delete(&self, device_id: &str) -> Result<(), DeviceError>;

    /// Launches an installed app by package name or bundle id.
    async fn launch_app(&self, device_id: &str, app_id: &str) -> Result<(), DeviceError>;

    /// Force-stops an app.
    async fn terminate_app(&self, device_id: &str, app_id: &str) -> Result<(), DeviceError>;

    /// Screen dimensions of a running device.
    async fn screen_size(&self, device_id: &str) -> Result<ScreenSize, DeviceError>;

    /// Taps at a point in the device's input coordinate space.
    async fn tap(&self, _device_id: &str, _point: Point) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported {
            backend: self.kind(),
            operation: "tap",
        })
    }

    /// Performs a drag along a motion path.
    async fn swipe(&self, _device_id: &str, _path: &[MotionPoint]) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported {
            backend: self.kind(),
            operation: "swipe",
        })
    }
}

/// Front door for device operations.
///
/// Device lists are cached per backend for
/// [`DEVICE_LIST_TTL`](crate::cache::DEVICE_LIST_TTL); every lifecycle
/// mutation drops that backend's entry. Concurrent callers share the cache
/// and may see a list up to one TTL old.
#[derive(Debug)]
pub struct DeviceController {
    backends: HashMap<BackendKind, Arc<dyn DeviceBackend>>,
    cache: Arc<DeviceListCache>,
    boot_timeout: Duration,
    poll_interval: Duration,
}

impl DeviceController {
    /// A controller with no backends.
    pub fn new(cache: Arc<DeviceListCache>) -> Self {
        Self {
            backends: HashMap::new(),
            cache,
            boot_timeout: Duration::from_millis(crate::config::DEFAULT_BOOT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(crate::config::DEFAULT_BOOT_POLL_INTERVAL_MS),
        }
    }

    /// A controller with all three backends, using binaries from `location`
    /// when given and timeouts from `config`.
    pub fn for_host(
        runner: Arc<dyn CommandRunner>,
        location: Option<&ToolLocation>,
        config: &TapwrightConfig,
        cache: Arc<DeviceListCache>,
    ) -> Self {
        let timeout = config.command_timeout();
        let mut emulator = EmulatorBackend::new(Arc::clone(&runner)).with_timeout(timeout);
        if let Some(location) = location {
            emulator = emulator.with_location(location);
        }
        Self::new(cache)
            .with_backend(Arc::new(emulator))
            .with_backend(Arc::new(SimctlBackend::new(Arc::clone(&runner)).with_timeout(timeout)))
            .with_backend(Arc::new(IdbBackend::new(runner).with_timeout(timeout)))
            .with_boot_timeout(config.boot_timeout(), config.boot_poll_interval())
    }

    /// Registers a backend, replacing any of the same kind.
    pub fn with_backend(mut self, backend: Arc<dyn DeviceBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    /// Sets how long [`boot`](Self::boot) polls and how often.
    pub fn with_boot_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.boot_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// The shared device-list cache.
    pub fn cache(&self) -> &Arc<DeviceListCache> {
        &self.cache
    }

    fn backend(&self, kind: BackendKind) -> Result<&Arc<dyn DeviceBackend>, DeviceError> {
        self.backends.get(&kind).ok_or(DeviceError::BackendUnavailable(kind))
    }

    /// All devices of a backend, served from the cache while fresh.
    pub async fn list(&self, kind: BackendKind) -> Result<Arc<Vec<DeviceInfo>>, DeviceError> {
        let backend = self.backend(kind)?;
        self.cache
            .get_or_try_insert_with(kind, || backend.list())
            .await
    }

    /// Running devices of a backend. Never cached.
    pub async fn booted(&self, kind: BackendKind) -> Result<Vec<BootedDevice>, DeviceError> {
        self.backend(kind)?.booted().await
    }

    /// Boots a device and waits until the backend reports it running.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::BootNotConfirmed`] if the device does not appear among
    ///   booted devices before the boot timeout
    /// - Any error from the backend's boot command
    pub async fn boot(&self, kind: BackendKind, device_id: &str) -> Result<BootedDevice, DeviceError> {
        let backend = self.backend(kind)?;
        let span = info_span!("boot", backend = %kind, device_id);
        async move {
            backend.boot(device_id).await?;
            self.cache.invalidate(&kind);

            let deadline = tokio::time::Instant::now() + self.boot_timeout;
            loop {
                match backend.booted().await {
                    Ok(devices) => {
                        if let Some(device) = devices.into_iter().find(|d| d.matches(device_id)) {
                            info!(serial = %device.device_id, "boot confirmed");
                            return Ok(device);
                        }
                    }
                    Err(e) => debug!(error = %e, "booted query failed while waiting"),
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(DeviceError::BootNotConfirmed {
                        device_id: device_id.to_string(),
                        timeout_ms: u64::try_from(self.boot_timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        .instrument(span)
        .await
    }

    /// Shuts a device down.
    pub async fn shutdown(&self, kind: BackendKind, device_id: &str) -> Result<(), DeviceError> {
        let result = self.backend(kind)?.shutdown(device_id).await;
        self.cache.invalidate(&kind);
        result
    }

    /// Creates a device.
    pub async fn create(&self, kind: BackendKind, request: &CreateDevice) -> Result<DeviceInfo, DeviceError> {
        let result = self.backend(kind)?.create(request).await;
        self.cache.invalidate(&kind);
        result
    }

    /// Deletes a device.
    pub async fn delete(&self, kind: BackendKind, device_id: &str) -> Result<(), DeviceError> {
        let result = self.backend(kind)?.delete(device_id).await;
        self.cache.invalidate(&kind);
        result
    }

    /// Launches an app.
    pub async fn launch_app(&self, kind: BackendKind, device_id: &str, app_id: &str) -> Result<(), DeviceError> {
        self.backend(kind)?.launch_app(device_id, app_id).await
    }

    /// Force-stops an app.
    pub async fn terminate_app(&self, kind: BackendKind, device_id: &str, app_id: &str) -> Result<(), DeviceError> {
        self.backend(kind)?.terminate_app(device_id, app_id).await
    }

    /// Screen size of a running device.
    pub async fn screen_size(&self, kind: BackendKind, device_id: &str) -> Result<ScreenSize, DeviceError> {
        self.backend(kind)?.screen_size(device_id).await
    }

    /// Taps a point.
    pub async fn tap(&self, kind: BackendKind, device_id: &str, point: Point) -> Result<(), DeviceError> {
        self.backend(kind)?.tap(device_id, point).await
    }

    /// Drags along a motion path.
    pub async fn swipe(&self, kind: BackendKind, device_id: &str, path: &[MotionPoint]) -> Result<(), DeviceError> {
        if path.len() < 2 {
            return Err(DeviceError::parse("motion path", "a swipe needs at least two points"));
        }
        self.backend(kind)?.swipe(device_id, path).await
    }
}
