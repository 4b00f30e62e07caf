//! Interface to Apple's `xcrun simctl` command-line tool.
//!
//! This backend lists, boots, creates and deletes iOS Simulator devices and
//! launches apps on them. Screen size is read from the display port that
//! `simctl io enumerate` reports.
//!
//! # Requirements
//!
//! Xcode must be installed for `xcrun simctl` to be available. Without it
//! every operation fails with [`DeviceError::ToolNotInstalled`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tapwright_core::device::{DeviceBackend, SimctlBackend};
//! use tapwright_core::process::ProcessExecutor;
//!
//! # async fn example() -> Result<(), tapwright_core::device::DeviceError> {
//! let simctl = SimctlBackend::new(Arc::new(ProcessExecutor::new()));
//!
//! for device in simctl.list().await? {
//!     println!("{}: {} (running: {})", device.name, device.device_id, device.is_running);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendKind, BootedDevice, CreateDevice, DeviceBackend, DeviceError, DeviceInfo, Platform, ScreenSize};
use crate::config::DEFAULT_COMMAND_TIMEOUT_MS;
use crate::process::{CommandOutput, CommandRunner, CommandSpec, ProcessError};

/// Represents an iOS Simulator device.
///
/// This struct contains information about a simulator device as reported
/// by `xcrun simctl list devices -j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorDevice {
    /// The unique device identifier (UDID) for this simulator.
    pub udid: String,

    /// The human-readable name of the device (e.g., "iPhone 15 Pro").
    pub name: String,

    /// The current state of the device (e.g., "Booted", "Shutdown").
    pub state: String,

    /// The device type identifier (e.g., "com.apple.CoreSimulator.SimDeviceType.iPhone-15-Pro").
    #[serde(rename = "deviceTypeIdentifier")]
    pub device_type: Option<String>,

    /// False when the simulator's runtime is missing.
    #[serde(rename = "isAvailable", default = "default_available")]
    pub is_available: bool,

    /// Runtime identifier, filled from the enclosing map key.
    #[serde(skip)]
    pub runtime: Option<String>,
}

fn default_available() -> bool {
    true
}

impl SimulatorDevice {
    /// True if the simulator is running.
    pub fn is_booted(&self) -> bool {
        self.state == "Booted"
    }

    fn into_info(self) -> DeviceInfo {
        DeviceInfo {
            is_running: self.is_booted(),
            name: self.name,
            platform: Platform::Ios,
            device_id: self.udid,
            device_type: self.device_type,
            runtime: self.runtime,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: BTreeMap<String, Vec<SimulatorDevice>>,
}

/// Parses device list JSON into a flat vector of devices.
///
/// Takes raw JSON bytes (as returned by `simctl list devices -j`) and
/// returns every device with its runtime identifier attached, in runtime
/// order.
///
/// # Errors
///
/// - [`DeviceError::Parse`] if the JSON is invalid or has unexpected structure
pub fn parse_device_list(json: &[u8]) -> Result<Vec<SimulatorDevice>, DeviceError> {
    let device_list: DeviceList =
        serde_json::from_slice(json).map_err(|e| DeviceError::parse("simctl device list", e.to_string()))?;
    Ok(device_list
        .devices
        .into_iter()
        .flat_map(|(runtime, devices)| {
            devices.into_iter().map(move |mut device| {
                device.runtime = Some(runtime.clone());
                device
            })
        })
        .collect())
}

/// Finds the first booted device in a list.
pub fn find_booted_device(devices: &[SimulatorDevice]) -> Option<&SimulatorDevice> {
    devices.iter().find(|d| d.is_booted())
}

/// Parses the UDID printed by `simctl create`.
pub fn parse_created_udid(output: &str) -> Result<String, DeviceError> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DeviceError::parse("simctl create", "no UDID in output"))
}

/// Parses `simctl io <udid> enumerate` into a screen size in points.
///
/// The output is a sequence of `Port:` blocks of `key: value` lines. The block
/// whose `Class` is `Display` carries `Default width`, `Default height` (in
/// pixels) and `Preferred UI scale`.
///
/// # Errors
///
/// [`DeviceError::Parse`] if no display block is present or it lacks a
/// parseable size or scale.
pub fn parse_display_info(output: &str) -> Result<ScreenSize, DeviceError> {
    let mut blocks: Vec<BTreeMap<String, String>> = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed == "Port:" {
            blocks.push(BTreeMap::new());
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        if blocks.is_empty() {
            blocks.push(BTreeMap::new());
        }
        if let Some(block) = blocks.last_mut() {
            block
                .entry(key.trim().to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }

    let display = blocks
        .iter()
        .find(|b| b.get("Class").is_some_and(|c| c == "Display"))
        .ok_or_else(|| DeviceError::parse("display info", "no display port in output"))?;

    let field = |name: &str| {
        display
            .get(name)
            .ok_or_else(|| DeviceError::parse("display info", format!("missing '{name}'")))
    };
    let width: u32 = field("Default width")?
        .parse()
        .map_err(|_| DeviceError::parse("display info", "width is not an integer"))?;
    let height: u32 = field("Default height")?
        .parse()
        .map_err(|_| DeviceError::parse("display info", "height is not an integer"))?;
    let scale: f64 = field("Preferred UI scale")?
        .parse()
        .map_err(|_| DeviceError::parse("display info", "scale is not a number"))?;
    if width == 0 || height == 0 {
        return Err(DeviceError::parse("display info", "zero-sized display"));
    }
    ScreenSize::from_pixels(width, height, scale)
}

/// Wrapper for `xcrun simctl` commands.
#[derive(Debug, Clone)]
pub struct SimctlBackend {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl SimctlBackend {
    /// Creates a backend that runs `xcrun` through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }

    /// Per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn simctl<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("xcrun").arg("simctl").args(args).timeout(self.timeout)
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DeviceError> {
        Ok(self.runner.run(&spec).await?)
    }

    async fn devices(&self) -> Result<Vec<SimulatorDevice>, DeviceError> {
        let output = self.run(self.simctl(["list", "devices", "-j"])).await?;
        let devices = parse_device_list(&output.stdout)?;
        Ok(devices.into_iter().filter(|d| d.is_available).collect())
    }
}

#[async_trait]
impl DeviceBackend for SimctlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Simctl
    }

    async fn list(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self.devices().await?.into_iter().map(SimulatorDevice::into_info).collect())
    }

    async fn booted(&self) -> Result<Vec<BootedDevice>, DeviceError> {
        Ok(self
            .devices()
            .await?
            .into_iter()
            .filter(SimulatorDevice::is_booted)
            .map(|d| BootedDevice {
                name: d.name,
                platform: Platform::Ios,
                device_id: d.udid,
                backend: BackendKind::Simctl,
            })
            .collect())
    }

    /// Boots a simulator device.
    ///
    /// If the simulator is already booted, this returns successfully (the
    /// "already booted" state is not treated as an error).
    async fn boot(&self, device_id: &str) -> Result<(), DeviceError> {
        match self.runner.run(&self.simctl(["boot", device_id])).await {
            Ok(_) => Ok(()),
            // Already booted is not an error
            Err(ProcessError::Failed { stderr, .. }) if stderr.contains("current state: Booted") => {
                debug!(device_id, "simulator already booted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn shutdown(&self, device_id: &str) -> Result<(), DeviceError> {
        match self.runner.run(&self.simctl(["shutdown", device_id])).await {
            Ok(_) => Ok(()),
            Err(ProcessError::Failed { stderr, .. }) if stderr.contains("current state: Shutdown") => {
                debug!(device_id, "simulator already shut down");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, request: &CreateDevice) -> Result<DeviceInfo, DeviceError> {
        let output = self
            .run(self.simctl([
                "create",
                request.name.as_str(),
                request.device_type.as_str(),
                request.runtime.as_str(),
            ]))
            .await?;
        let udid = parse_created_udid(&output.stdout_text())?;
        Ok(DeviceInfo {
            name: request.name.clone(),
            platform: Platform::Ios,
            device_id: udid,
            is_running: false,
            device_type: Some(request.device_type.clone()),
            runtime: Some(request.runtime.clone()),
        })
    }

    async fn delete(&self, device_id: &str) -> Result<(), DeviceError> {
        self.run(self.simctl(["delete", device_id])).await?;
        Ok(())
    }

    async fn launch_app(&self, device_id: &str, app_id: &str) -> Result<(), DeviceError> {
        self.run(self.simctl(["launch", device_id, app_id])).await?;
        Ok(())
    }

    async fn terminate_app(&self, device_id: &str, app_id: &str) -> Result<(), DeviceError> {
        self.run(self.simctl(["terminate", device_id, app_id])).await?;
        Ok(())
    }

    async fn screen_size(&self, device_id: &str) -> Result<ScreenSize, DeviceError> {
        let output = self.run(self.simctl(["io", device_id, "enumerate"])).await?;
        parse_display_info(&output.stdout_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sample JSON matching actual simctl output format
    const SAMPLE_DEVICE_LIST: &str = r#"{
        "devices": {
            "com.apple.CoreSimulator.SimRuntime.iOS-17-0": [
                {
                    "udid": "A1B2C3D4-E5F6-7890-ABCD-EF1234567890",
                    "name": "iPhone 15 Pro",
                    "state": "Booted",
                    "isAvailable": true,
                    "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-15-Pro"
                },
                {
                    "udid": "B2C3D4E5-F6A7-8901-BCDE-F12345678901",
                    "name": "iPhone 15",
                    "state": "Shutdown",
                    "isAvailable": true,
                    "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-15"
                }
            ],
            "com.apple.CoreSimulator.SimRuntime.iOS-16-4": [
                {
                    "udid": "C3D4E5F6-A7B8-9012-CDEF-123456789012",
                    "name": "iPhone 14",
                    "state": "Shutdown",
                    "isAvailable": false,
                    "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-14"
                }
            ]
        }
    }"#;

    const SAMPLE_ENUMERATE: &str = "\
Port:
    UUID: 5C3B4C1E-2F5D-4B4E-9F0B-1C2D3E4F5A6B
    Class: Keyboard
    Name: Hardware Keyboard
Port:
    UUID: 9A8B7C6D-5E4F-4A3B-8C2D-1E0F9A8B7C6D
    Class: Display
    Name: LCD
    Power state: On
    Display class: 0
    Default width: 1179
    Default height: 2556
    Default pixel format: 'BGRA'
    Preferred UI scale: 3
    Rotation: 0
";

    #[test]
    fn test_parse_device_list_success() {
        let devices = parse_device_list(SAMPLE_DEVICE_LIST.as_bytes()).expect("Should parse valid JSON");

        assert_eq!(devices.len(), 3);

        // Check that we have devices from both runtime versions
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"iPhone 15 Pro"));
        assert!(names.contains(&"iPhone 15"));
        assert!(names.contains(&"iPhone 14"));

        let pro = devices.iter().find(|d| d.name == "iPhone 15 Pro").unwrap();
        assert_eq!(pro.runtime.as_deref(), Some("com.apple.CoreSimulator.SimRuntime.iOS-17-0"));
        assert!(!devices.iter().find(|d| d.name == "iPhone 14").unwrap().is_available);
    }

    #[test]
    fn test_parse_device_list_empty() {
        let devices = parse_device_list(br#"{"devices": {}}"#).expect("Should parse empty device list");
        assert!(devices.is_empty());
    }

    #[test]
    fn test_parse_device_list_invalid_json() {
        match parse_device_list(b"not valid json") {
            Err(DeviceError::Parse { what, .. }) => assert_eq!(what, "simctl device list"),
            Err(e) => panic!("Expected Parse error, got: {:?}", e),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[test]
    fn test_parse_device_list_missing_devices_key() {
        // serde should fail to deserialize without "devices" key
        assert!(parse_device_list(br#"{"something_else": []}"#).is_err());
    }

    #[test]
    fn test_find_booted_device() {
        let devices = parse_device_list(SAMPLE_DEVICE_LIST.as_bytes()).unwrap();
        let booted = find_booted_device(&devices).expect("one device is booted");
        assert_eq!(booted.name, "iPhone 15 Pro");
        assert!(find_booted_device(&[]).is_none());
    }

    #[test]
    fn test_simulator_device_optional_fields() {
        // Device without deviceTypeIdentifier or isAvailable should still parse
        let json = r#"{
            "devices": {
                "com.apple.CoreSimulator.SimRuntime.iOS-17-0": [
                    {"udid": "test-udid", "name": "Test Device", "state": "Shutdown"}
                ]
            }
        }"#;

        let devices = parse_device_list(json.as_bytes()).unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].device_type.is_none());
        assert!(devices[0].is_available);

        let info = devices[0].clone().into_info();
        assert_eq!(info.device_id, "test-udid");
        assert!(!info.is_running);
        assert_eq!(info.platform, Platform::Ios);
    }

    #[test]
    fn test_parse_display_info() {
        let size = parse_display_info(SAMPLE_ENUMERATE).unwrap();
        assert_eq!(size.width, 393.0);
        assert_eq!(size.height, 852.0);
        assert_eq!(size.scale, 3.0);
    }

    #[test]
    fn test_parse_display_info_failures() {
        let no_display = "Port:\n    Class: Keyboard\n";
        assert!(matches!(parse_display_info(no_display), Err(DeviceError::Parse { .. })));

        let no_scale = "Port:\n    Class: Display\n    Default width: 100\n    Default height: 200\n";
        let err = parse_display_info(no_scale).unwrap_err();
        assert!(err.to_string().contains("Preferred UI scale"));

        let bad_width = SAMPLE_ENUMERATE.replace("Default width: 1179", "Default width: wide");
        assert!(parse_display_info(&bad_width).is_err());

        assert!(parse_display_info("").is_err());
    }

    #[test]
    fn test_parse_created_udid() {
        assert_eq!(
            parse_created_udid("D1E2F3A4-0000-1111-2222-333344445555\n").unwrap(),
            "D1E2F3A4-0000-1111-2222-333344445555"
        );
        assert!(parse_created_udid("\n").is_err());
    }
}
