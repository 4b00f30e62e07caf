//! Android emulator backend built on `emulator`, `adb` and `avdmanager`.
//!
//! AVDs are identified by name in the catalog; once running they are
//! addressed by their adb serial (`emulator-5554`). Every operation that
//! takes a device id accepts either form.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::{BackendKind, BootedDevice, CreateDevice, DeviceBackend, DeviceError, DeviceInfo, Platform, ScreenSize};
use crate::bounds::Point;
use crate::config::DEFAULT_COMMAND_TIMEOUT_MS;
use crate::motion::MotionPoint;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::toolchain::{tool_path, HostArch, KnownTool, ToolLocation};

/// Baseline density that maps one Android dp to one pixel.
const BASELINE_DPI: f64 = 160.0;

/// A row of `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbDevice {
    /// Device serial.
    pub serial: String,
    /// Connection state (`device`, `offline`, `unauthorized`).
    pub state: String,
}

impl AdbDevice {
    /// True for a fully connected emulator instance.
    pub fn is_ready_emulator(&self) -> bool {
        self.serial.starts_with("emulator-") && self.state == "device"
    }
}

/// Backend for Android Virtual Devices.
#[derive(Debug, Clone)]
pub struct EmulatorBackend {
    runner: Arc<dyn CommandRunner>,
    adb: String,
    emulator: String,
    avdmanager: String,
    timeout: Duration,
    arch: HostArch,
}

impl EmulatorBackend {
    /// A backend that finds its tools on `PATH`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            adb: KnownTool::Adb.name().to_string(),
            emulator: KnownTool::Emulator.name().to_string(),
            avdmanager: KnownTool::Avdmanager.name().to_string(),
            timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            arch: HostArch::current(),
        }
    }

    /// Uses the binaries found in `location`, keeping `PATH` names for the
    /// ones it lacks.
    pub fn with_location(mut self, location: &ToolLocation) -> Self {
        let resolve = |tool: KnownTool, fallback: String| {
            tool_path(location, tool)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or(fallback)
        };
        self.adb = resolve(KnownTool::Adb, self.adb);
        self.emulator = resolve(KnownTool::Emulator, self.emulator);
        self.avdmanager = resolve(KnownTool::Avdmanager, self.avdmanager);
        self
    }

    /// Per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Architecture used to pick system images for bare API levels.
    pub fn with_arch(mut self, arch: HostArch) -> Self {
        self.arch = arch;
        self
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DeviceError> {
        Ok(self.runner.run(&spec.timeout(self.timeout)).await?)
    }

    fn adb(&self) -> CommandSpec {
        CommandSpec::new(&self.adb)
    }

    fn adb_shell(&self, serial: &str) -> CommandSpec {
        self.adb().args(["-s", serial, "shell"])
    }

    async fn adb_devices(&self) -> Result<Vec<AdbDevice>, DeviceError> {
        let output = self.run(self.adb().arg("devices")).await?;
        parse_adb_devices(&output.stdout_text())
    }

    async fn avd_name(&self, serial: &str) -> Result<String, DeviceError> {
        let output = self.run(self.adb().args(["-s", serial, "emu", "avd", "name"])).await?;
        parse_avd_name(&output.stdout_text())
    }

    /// Resolves an AVD name or serial to a running serial.
    async fn serial_for(&self, device_id: &str) -> Result<String, DeviceError> {
        if device_id.starts_with("emulator-") {
            return Ok(device_id.to_string());
        }
        self.booted()
            .await?
            .into_iter()
            .find(|d| d.matches(device_id))
            .map(|d| d.device_id)
            .ok_or_else(|| DeviceError::DeviceNotFound(device_id.to_string()))
    }

    fn system_image(&self, runtime: &str) -> String {
        if !runtime.is_empty() && runtime.chars().all(|c| c.is_ascii_digit()) {
            let abi = match self.arch {
                HostArch::Aarch64 => "arm64-v8a",
                _ => "x86_64",
            };
            format!("system-images;android-{runtime};google_apis;{abi}")
        } else {
            runtime.to_string()
        }
    }
}

#[async_trait]
impl DeviceBackend for EmulatorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Emulator
    }

    async fn list(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let output = self.run(CommandSpec::new(&self.emulator).arg("-list-avds")).await?;
        let names = parse_avd_list(&output.stdout_text());
        let running: Vec<String> = match self.booted().await {
            Ok(booted) => booted.into_iter().map(|d| d.name).collect(),
            Err(e) => {
                debug!(error = %e, "could not query running emulators");
                Vec::new()
            }
        };
        Ok(names
            .into_iter()
            .map(|name| DeviceInfo {
                is_running: running.contains(&name),
                device_id: name.clone(),
                name,
                platform: Platform::Android,
                device_type: None,
                runtime: None,
            })
            .collect())
    }

    async fn booted(&self) -> Result<Vec<BootedDevice>, DeviceError> {
        let mut booted = Vec::new();
        for device in self.adb_devices().await?.into_iter().filter(AdbDevice::is_ready_emulator) {
            let name = match self.avd_name(&device.serial).await {
                Ok(name) => name,
                Err(e) => {
                    debug!(serial = %device.serial, error = %e, "could not read AVD name");
                    device.serial.clone()
                }
            };
            booted.push(BootedDevice {
                name,
                platform: Platform::Android,
                device_id: device.serial,
                backend: BackendKind::Emulator,
            });
        }
        Ok(booted)
    }

    async fn boot(&self, device_id: &str) -> Result<(), DeviceError> {
        if self.booted().await?.iter().any(|d| d.matches(device_id)) {
            debug!(device_id, "emulator already running");
            return Ok(());
        }
        let spec = CommandSpec::new(&self.emulator).args(["-avd", device_id]);
        let pid = self.runner.spawn_detached(&spec).await?;
        info!(device_id, pid, "emulator process started");
        Ok(())
    }

    async fn shutdown(&self, device_id: &str) -> Result<(), DeviceError> {
        let serial = self.serial_for(device_id).await?;
        self.run(self.adb().args(["-s", serial.as_str(), "emu", "kill"])).await?;
        Ok(())
    }

    async fn create(&self, request: &CreateDevice) -> Result<DeviceInfo, DeviceError> {
        let package = self.system_image(&request.runtime);
        let mut spec = CommandSpec::new(&self.avdmanager)
            .args(["create", "avd", "-n", request.name.as_str(), "-k", package.as_str()])
            // Declines the "custom hardware profile" prompt.
            .stdin("no\n");
        if !request.device_type.is_empty() {
            spec = spec.args(["-d", request.device_type.as_str()]);
        }
        self.run(spec).await?;
        Ok(DeviceInfo {
            name: request.name.clone(),
            platform: Platform::Android,
            device_id: request.name.clone(),
            is_running: false,
            device_type: (!request.device_type.is_empty()).then(|| request.device_type.clone()),
            runtime: Some(package),
        })
    }

    async fn delete(&self, device_id: &str) -> Result<(), DeviceError> {
        self.run(CommandSpec::new(&self.avdmanager).args(["delete", "avd", "-n", device_id]))
            .await?;
        Ok(())
    }

    async fn launch_app(&self, device_id: &str, app_id: &str) -> Result<(), DeviceError> {
        let serial = self.serial_for(device_id).await?;
        let spec = self
            .adb_shell(&serial)
            .args(["monkey", "-p", app_id, "-c", "android.intent.category.LAUNCHER", "1"]);
        let command = spec.display();
        let output = self.run(spec).await?;
        check_monkey_output(&command, &output.stdout_text())
    }

    async fn terminate_app(&self, device_id: &str, app_id: &str) -> Result<(), DeviceError> {
        let serial = self.serial_for(device_id).await?;
        self.run(self.adb_shell(&serial).args(["am", "force-stop", app_id])).await?;
        Ok(())
    }

    async fn screen_size(&self, device_id: &str) -> Result<ScreenSize, DeviceError> {
        let serial = self.serial_for(device_id).await?;
        let size = self.run(self.adb_shell(&serial).args(["wm", "size"])).await?;
        let density = self.run(self.adb_shell(&serial).args(["wm", "density"])).await?;
        let (width, height) = parse_wm_size(&size.stdout_text())?;
        let dpi = parse_wm_density(&density.stdout_text())?;
        ScreenSize::from_pixels(width, height, f64::from(dpi) / BASELINE_DPI)
    }

    async fn tap(&self, device_id: &str, point: Point) -> Result<(), DeviceError> {
        let serial = self.serial_for(device_id).await?;
        self.run(self.adb_shell(&serial).args([
            "input".to_string(),
            "tap".to_string(),
            point.x.to_string(),
            point.y.to_string(),
        ]))
        .await?;
        Ok(())
    }

    async fn swipe(&self, device_id: &str, path: &[MotionPoint]) -> Result<(), DeviceError> {
        let serial = self.serial_for(device_id).await?;
        let script = motion_event_script(path)?;
        self.run(self.adb_shell(&serial).arg(script)).await?;
        Ok(())
    }
}

fn wm_size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(Physical|Override) size:\s*(\d+)x(\d+)").expect("Invalid wm size regex"))
}

fn wm_density_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(Physical|Override) density:\s*(\d+)").expect("Invalid wm density regex"))
}

/// Parses `emulator -list-avds`, skipping the emulator's own log lines.
pub fn parse_avd_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("INFO") && !line.starts_with("WARNING") && !line.starts_with("ERROR"))
        .filter(|line| !line.contains(char::is_whitespace))
        .map(str::to_string)
        .collect()
}

/// Parses `adb devices`.
///
/// # Errors
///
/// [`DeviceError::Parse`] if the `List of devices attached` header is absent.
pub fn parse_adb_devices(output: &str) -> Result<Vec<AdbDevice>, DeviceError> {
    let mut lines = output.lines().map(str::trim);
    if !lines.any(|line| line.starts_with("List of devices attached")) {
        return Err(DeviceError::parse("adb devices", "missing device list header"));
    }
    Ok(lines
        .filter(|line| !line.is_empty() && !line.starts_with('*'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            Some(AdbDevice {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect())
}

/// Parses `adb emu avd name`, which prints the name followed by `OK`.
pub fn parse_avd_name(output: &str) -> Result<String, DeviceError> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != "OK")
        .map(str::to_string)
        .ok_or_else(|| DeviceError::parse("avd name", "empty output"))
}

/// Parses `wm size`. An override size wins over the physical size.
pub fn parse_wm_size(output: &str) -> Result<(u32, u32), DeviceError> {
    let mut physical = None;
    let mut override_size = None;
    for caps in wm_size_regex().captures_iter(output) {
        let parsed = caps[2].parse::<u32>().ok().zip(caps[3].parse::<u32>().ok());
        match &caps[1] {
            "Override" => override_size = parsed,
            _ => physical = parsed,
        }
    }
    override_size
        .or(physical)
        .filter(|&(w, h)| w > 0 && h > 0)
        .ok_or_else(|| DeviceError::parse("wm size", format!("no size in {:?}", output.trim())))
}

/// Parses `wm density`. An override density wins over the physical density.
pub fn parse_wm_density(output: &str) -> Result<u32, DeviceError> {
    let mut physical = None;
    let mut override_density = None;
    for caps in wm_density_regex().captures_iter(output) {
        let parsed = caps[2].parse::<u32>().ok();
        match &caps[1] {
            "Override" => override_density = parsed,
            _ => physical = parsed,
        }
    }
    override_density
        .or(physical)
        .filter(|&d| d > 0)
        .ok_or_else(|| DeviceError::parse("wm density", format!("no density in {:?}", output.trim())))
}

fn check_monkey_output(command: &str, stdout: &str) -> Result<(), DeviceError> {
    if stdout.contains("monkey aborted") || stdout.contains("No activities found") {
        return Err(DeviceError::CommandFailed {
            command: command.to_string(),
            code: None,
            stderr: stdout.trim().to_string(),
        });
    }
    Ok(())
}

/// Builds a device-side shell script that replays `path` as a single touch
/// gesture with `input motionevent`, sleeping for each point's delay.
pub fn motion_event_script(path: &[MotionPoint]) -> Result<String, DeviceError> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| DeviceError::parse("motion path", "empty path"))?;
    let last = rest.last().unwrap_or(first);

    let mut steps = vec![format!("input motionevent DOWN {} {}", first.x, first.y)];
    let mut previous = first;
    for point in rest {
        if let Some(delay) = previous.delay.filter(|&d| d > 0) {
            steps.push(format!("sleep {:.3}", delay as f64 / 1000.0));
        }
        steps.push(format!("input motionevent MOVE {} {}", point.x, point.y));
        previous = point;
    }
    steps.push(format!("input motionevent UP {} {}", last.x, last.y));
    Ok(steps.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADB_DEVICES: &str = "* daemon not running; starting now at tcp:5037\n\
        * daemon started successfully\n\
        List of devices attached\n\
        emulator-5554\tdevice\n\
        emulator-5556\toffline\n\
        R58M123ABC\tdevice\n\n";

    #[test]
    fn test_parse_adb_devices() {
        let devices = parse_adb_devices(ADB_DEVICES).unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0], AdbDevice { serial: "emulator-5554".into(), state: "device".into() });
        let ready: Vec<_> = devices.iter().filter(|d| d.is_ready_emulator()).collect();
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn test_parse_adb_devices_requires_header() {
        match parse_adb_devices("error: something broke") {
            Err(DeviceError::Parse { what, .. }) => assert_eq!(what, "adb devices"),
            other => panic!("Expected Parse error, got: {:?}", other),
        }
        assert!(parse_adb_devices("List of devices attached\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_avd_list_skips_log_lines() {
        let output = "INFO    | Storing crashdata in: /tmp/android/emu-crash.db\nPixel_7_API_34\nTablet_API_33\n\n";
        assert_eq!(parse_avd_list(output), vec!["Pixel_7_API_34", "Tablet_API_33"]);
        assert!(parse_avd_list("").is_empty());
    }

    #[test]
    fn test_parse_avd_name() {
        assert_eq!(parse_avd_name("Pixel_7_API_34\r\nOK\r\n").unwrap(), "Pixel_7_API_34");
        assert!(parse_avd_name("OK\n").is_err());
    }

    #[test]
    fn test_parse_wm_size() {
        assert_eq!(parse_wm_size("Physical size: 1080x2400\n").unwrap(), (1080, 2400));
        assert_eq!(
            parse_wm_size("Physical size: 1080x2400\nOverride size: 720x1600\n").unwrap(),
            (720, 1600)
        );
        assert!(parse_wm_size("").is_err());
        assert!(parse_wm_size("Physical size: 0x0").is_err());
    }

    #[test]
    fn test_parse_wm_density() {
        assert_eq!(parse_wm_density("Physical density: 420\n").unwrap(), 420);
        assert_eq!(parse_wm_density("Physical density: 420\nOverride density: 320\n").unwrap(), 320);
        assert!(parse_wm_density("garbage").is_err());
    }

    #[test]
    fn test_monkey_abort_is_failure() {
        assert!(check_monkey_output("monkey", "Events injected: 1").is_ok());
        let err = check_monkey_output("monkey", "** No activities found to run, monkey aborted.").unwrap_err();
        assert!(matches!(err, DeviceError::CommandFailed { .. }));
    }

    #[test]
    fn test_motion_event_script() {
        let path = vec![
            MotionPoint { x: 10, y: 100, delay: Some(50) },
            MotionPoint { x: 10, y: 60, delay: Some(50) },
            MotionPoint { x: 10, y: 20, delay: Some(0) },
        ];
        assert_eq!(
            motion_event_script(&path).unwrap(),
            "input motionevent DOWN 10 100; sleep 0.050; input motionevent MOVE 10 60; \
             sleep 0.050; input motionevent MOVE 10 20; input motionevent UP 10 20"
        );
        assert!(motion_event_script(&[]).is_err());
    }

    #[test]
    fn test_system_image_for_api_level() {
        let runner: Arc<dyn CommandRunner> = Arc::new(crate::process::ProcessExecutor::new());
        let backend = EmulatorBackend::new(runner).with_arch(HostArch::Aarch64);
        assert_eq!(backend.system_image("34"), "system-images;android-34;google_apis;arm64-v8a");
        assert_eq!(
            backend.system_image("system-images;android-33;default;x86_64"),
            "system-images;android-33;default;x86_64"
        );
    }
}
