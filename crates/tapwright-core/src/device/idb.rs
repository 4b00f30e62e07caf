//! iOS simulator backend built on Facebook's `idb` client.
//!
//! `idb` cannot create or delete simulators; those operations report
//! [`DeviceError::Unsupported`]. Unlike `simctl` it can inject touches, so
//! this backend implements [`DeviceBackend::tap`] and [`DeviceBackend::swipe`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{BackendKind, BootedDevice, CreateDevice, DeviceBackend, DeviceError, DeviceInfo, Platform, ScreenSize};
use crate::bounds::Point;
use crate::config::DEFAULT_COMMAND_TIMEOUT_MS;
use crate::motion::MotionPoint;
use crate::process::{CommandOutput, CommandRunner, CommandSpec, ProcessError};

/// One line of `idb list-targets --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct IdbTarget {
    /// Target UDID.
    pub udid: String,
    /// Display name.
    pub name: String,
    /// `Booted`, `Shutdown`, ...
    pub state: String,
    /// `simulator` or `device`.
    #[serde(rename = "type", default)]
    pub target_type: Option<String>,
    /// OS version string (`iOS 17.0`).
    #[serde(default)]
    pub os_version: Option<String>,
    /// Hardware model, when known.
    #[serde(default)]
    pub model: Option<String>,
}

impl IdbTarget {
    /// True if the target is running.
    pub fn is_booted(&self) -> bool {
        self.state == "Booted"
    }
}

#[derive(Debug, Deserialize)]
struct ScreenDimensions {
    width: u32,
    height: u32,
    density: f64,
    #[serde(default)]
    width_points: Option<f64>,
    #[serde(default)]
    height_points: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Describe {
    #[serde(default)]
    screen_dimensions: Option<ScreenDimensions>,
}

/// Parses `idb list-targets --json`, which prints one JSON object per line.
///
/// # Errors
///
/// [`DeviceError::Parse`] naming the first line that is not a target object.
pub fn parse_list_targets(output: &str) -> Result<Vec<IdbTarget>, DeviceError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str::<IdbTarget>(line)
                .map_err(|e| DeviceError::parse("idb targets", format!("line {}: {e}", i + 1)))
        })
        .collect()
}

/// Parses `idb describe --json` into a screen size in points.
pub fn parse_describe(output: &str) -> Result<ScreenSize, DeviceError> {
    let describe: Describe =
        serde_json::from_str(output.trim()).map_err(|e| DeviceError::parse("idb describe", e.to_string()))?;
    let dims = describe
        .screen_dimensions
        .ok_or_else(|| DeviceError::parse("idb describe", "no screen_dimensions"))?;
    if dims.width == 0 || dims.height == 0 {
        return Err(DeviceError::parse("idb describe", "zero-sized screen"));
    }
    let mut size = ScreenSize::from_pixels(dims.width, dims.height, dims.density)?;
    if let (Some(w), Some(h)) = (dims.width_points, dims.height_points) {
        size.width = w;
        size.height = h;
    }
    Ok(size)
}

/// Backend for `idb`.
#[derive(Debug, Clone)]
pub struct IdbBackend {
    runner: Arc<dyn CommandRunner>,
    idb: String,
    timeout: Duration,
}

impl IdbBackend {
    /// A backend that finds `idb` on `PATH`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            idb: "idb".to_string(),
            timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }

    /// Uses an explicit `idb` binary.
    pub fn with_binary(mut self, idb: impl Into<String>) -> Self {
        self.idb = idb.into();
        self
    }

    /// Per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn idb<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.idb).args(args).timeout(self.timeout)
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DeviceError> {
        Ok(self.runner.run(&spec).await?)
    }

    async fn targets(&self) -> Result<Vec<IdbTarget>, DeviceError> {
        let output = self.run(self.idb(["list-targets", "--json"])).await?;
        parse_list_targets(&output.stdout_text())
    }
}

#[async_trait]
impl DeviceBackend for IdbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Idb
    }

    async fn list(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self
            .targets()
            .await?
            .into_iter()
            .map(|t| DeviceInfo {
                is_running: t.is_booted(),
                name: t.name,
                platform: Platform::Ios,
                device_id: t.udid,
                device_type: t.model.or(t.target_type),
                runtime: t.os_version,
            })
            .collect())
    }

    async fn booted(&self) -> Result<Vec<BootedDevice>, DeviceError> {
        Ok(self
            .targets()
            .await?
            .into_iter()
            .filter(IdbTarget::is_booted)
            .map(|t| BootedDevice {
                name: t.name,
                platform: Platform::Ios,
                device_id: t.udid,
                backend: BackendKind::Idb,
            })
            .collect())
    }

    async fn boot(&self, device_id: &str) -> Result<(), DeviceError> {
        match self.runner.run(&self.idb(["boot", device_id])).await {
            Ok(_) => Ok(()),
            Err(ProcessError::Failed { stderr, .. }) if stderr.contains("Booted") => {
                debug!(device_id, "target already booted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn shutdown(&self, device_id: &str) -> Result<(), DeviceError> {
        self.run(self.idb(["shutdown", device_id])).await?;
        Ok(())
    }

    async fn create(&self, _request: &CreateDevice) -> Result<DeviceInfo, DeviceError> {
        Err(DeviceError::Unsupported {
            backend: BackendKind::Idb,
            operation: "create",
        })
    }

    async fn delete(&self, _device_id: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported {
            backend: BackendKind::Idb,
            operation: "delete",
        })
    }

    async fn launch_app(&self, device_id: &str, app_id: &str) -> Result<(), DeviceError> {
        self.run(self.idb(["launch", "--udid", device_id, app_id])).await?;
        Ok(())
    }

    async fn terminate_app(&self, device_id: &str, app_id: &str) -> Result<(), DeviceError> {
        self.run(self.idb(["terminate", "--udid", device_id, app_id])).await?;
        Ok(())
    }

    async fn screen_size(&self, device_id: &str) -> Result<ScreenSize, DeviceError> {
        let output = self.run(self.idb(["describe", "--udid", device_id, "--json"])).await?;
        parse_describe(&output.stdout_text())
    }

    async fn tap(&self, device_id: &str, point: Point) -> Result<(), DeviceError> {
        self.run(self.idb([
            "ui".to_string(),
            "tap".to_string(),
            "--udid".to_string(),
            device_id.to_string(),
            point.x.to_string(),
            point.y.to_string(),
        ]))
        .await?;
        Ok(())
    }

    /// idb swipes in a straight line, so only the path's endpoints and total
    /// duration are used.
    async fn swipe(&self, device_id: &str, path: &[MotionPoint]) -> Result<(), DeviceError> {
        let (Some(first), Some(last)) = (path.first(), path.last()) else {
            return Err(DeviceError::parse("motion path", "empty path"));
        };
        let total_ms: u64 = path.iter().filter_map(|p| p.delay).sum();
        let mut args = vec![
            "ui".to_string(),
            "swipe".to_string(),
            "--udid".to_string(),
            device_id.to_string(),
            first.x.to_string(),
            first.y.to_string(),
            last.x.to_string(),
            last.y.to_string(),
        ];
        if total_ms > 0 {
            args.push("--duration".to_string());
            args.push(format!("{:.3}", total_ms as f64 / 1000.0));
        }
        self.run(self.idb(args)).await?;
        Ok(())
    }
}
