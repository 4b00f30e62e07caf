//! Command-line front end for tapwright.
//!
//! Finds and installs Android SDK tools, drives emulators and simulators,
//! and queries UI hierarchy snapshots.
//!
//! # Usage
//!
//! ```bash
//! # Where are the Android SDK tools?
//! tapwright tools detect
//! tapwright tools validate adb emulator avdmanager
//!
//! # Install what is missing into the default SDK directory
//! tapwright tools install adb emulator
//!
//! # Device lifecycle
//! tapwright devices list -b emulator
//! tapwright devices boot Pixel_7_API_34 -b emulator
//! tapwright devices screen-size emulator-5554 -b emulator
//! tapwright app launch emulator-5554 com.example.app -b emulator
//!
//! # Query a hierarchy snapshot (Android or iOS JSON)
//! tapwright query -F screen.json text "Sign in"
//! tapwright query -F screen.json id submit --partial --container com.example:id/form
//! tapwright --format json query -F screen.json flatten
//!
//! # Generate a swipe path
//! tapwright path 540 1800 540 600 --steps 10 --easing ease-out --duration 300
//! ```

mod render;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tapwright_core::bounds::Point;
use tapwright_core::cache::{DeviceListCache, SystemClock};
use tapwright_core::config::{logs_dir, TapwrightConfig};
use tapwright_core::device::{BackendKind, CreateDevice, DeviceController, DeviceError};
use tapwright_core::hierarchy::{Element, Hierarchy, HierarchyError};
use tapwright_core::motion::{generate, Easing, MotionError, MotionOptions, DEFAULT_STEPS};
use tapwright_core::process::{CommandRunner, ProcessExecutor};
use tapwright_core::resolver::{ElementResolver, ResolveError, TextQuery};
use tapwright_core::toolchain::{
    select_best, validate_required, KnownTool, ToolInstaller, ToolLocation, ToolSource, ToolchainError,
    ToolchainLocator,
};

/// Mobile toolchain, device and UI hierarchy automation.
#[derive(Parser)]
#[command(name = "tapwright")]
#[command(about = "Drive Android emulators and iOS simulators and query their UI hierarchies")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Per-command timeout in milliseconds for external tools
    #[arg(short, long, global = true, env = "TAPWRIGHT_TIMEOUT")]
    timeout: Option<u64>,

    /// Also write logs to ~/.tapwright/logs/tapwright.log
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Find, validate and install Android SDK tools
    Tools {
        #[command(subcommand)]
        command: ToolsCommand,
    },

    /// Manage emulators and simulators
    Devices {
        #[command(subcommand)]
        command: DevicesCommand,
    },

    /// Launch and stop apps on a running device
    App {
        #[command(subcommand)]
        command: AppCommand,
    },

    /// Query a UI hierarchy snapshot
    Query {
        /// Snapshot file (Android hierarchy JSON or iOS accessibility JSON)
        #[arg(short = 'F', long)]
        file: PathBuf,

        #[command(subcommand)]
        command: QueryCommand,
    },

    /// Generate an eased gesture path between two points
    Path {
        /// Start X
        x1: i32,
        /// Start Y
        y1: i32,
        /// End X
        x2: i32,
        /// End Y
        y2: i32,
        /// Number of segments
        #[arg(short, long, default_value_t = DEFAULT_STEPS)]
        steps: u32,
        /// Easing curve
        #[arg(short, long, default_value = "ease-in-out")]
        easing: Easing,
        /// Total duration in milliseconds, spread across the points
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Print shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ToolsCommand {
    /// List every SDK location found on this machine, best first
    Detect,

    /// Show the location tapwright will use
    Select,

    /// Check that the selected location has the given tools
    Validate {
        /// Tools to require (adb, emulator, sdkmanager, avdmanager)
        #[arg(required = true)]
        tools: Vec<KnownTool>,
    },

    /// Install tools into the selected location or the default directory
    Install {
        /// Tools to install (default: all)
        tools: Vec<KnownTool>,
        /// Install into this directory instead
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DevicesCommand {
    /// List all devices of a backend
    List {
        #[arg(short, long, default_value = "emulator")]
        backend: BackendKind,
    },

    /// List running devices
    Booted {
        #[arg(short, long, default_value = "emulator")]
        backend: BackendKind,
    },

    /// Boot a device and wait until it is running
    Boot {
        /// AVD name or simulator UDID
        device: String,
        #[arg(short, long, default_value = "emulator")]
        backend: BackendKind,
    },

    /// Shut a device down
    Shutdown {
        device: String,
        #[arg(short, long, default_value = "emulator")]
        backend: BackendKind,
    },

    /// Create a device
    Create {
        /// Name of the new device
        name: String,
        /// Hardware profile (pixel_7, com.apple.CoreSimulator.SimDeviceType.iPhone-15)
        #[arg(short = 'd', long, default_value = "")]
        device_type: String,
        /// API level, system image or simulator runtime
        #[arg(short, long)]
        runtime: String,
        #[arg(short, long, default_value = "emulator")]
        backend: BackendKind,
    },

    /// Delete a device
    Delete {
        device: String,
        #[arg(short, long, default_value = "emulator")]
        backend: BackendKind,
    },

    /// Print the screen size of a running device in points
    ScreenSize {
        device: String,
        #[arg(short, long, default_value = "emulator")]
        backend: BackendKind,
    },
}

#[derive(Subcommand)]
enum AppCommand {
    /// Launch an installed app
    Launch {
        /// Device serial, AVD name or UDID
        device: String,
        /// Package name or bundle id
        app_id: String,
        #[arg(short, long, default_value = "emulator")]
        backend: BackendKind,
    },

    /// Force-stop an app
    Terminate {
        device: String,
        app_id: String,
        #[arg(short, long, default_value = "emulator")]
        backend: BackendKind,
    },
}

#[derive(Subcommand)]
enum QueryCommand {
    /// Smallest element whose text or content description matches
    Text {
        text: String,
        /// Require equality instead of substring containment
        #[arg(long)]
        exact: bool,
        /// Compare case-sensitively
        #[arg(long)]
        case_sensitive: bool,
        /// Only search inside the element with this resource id
        #[arg(short, long)]
        container: Option<String>,
    },

    /// Elements by resource id
    Id {
        id: String,
        /// Case-insensitive substring match
        #[arg(short, long)]
        partial: bool,
        /// Only search inside the element with this resource id
        #[arg(short, long)]
        container: Option<String>,
    },

    /// Elements by class name
    Class {
        class: String,
        /// Case-insensitive substring match
        #[arg(short, long)]
        partial: bool,
    },

    /// All clickable elements
    Clickable,

    /// All scrollable elements
    Scrollable,

    /// The focused element
    Focused,

    /// The element at a traversal index
    Index {
        #[arg(allow_negative_numbers = true)]
        index: i64,
    },

    /// Every element with its traversal index
    Flatten,

    /// Elements geometrically inside the element at a traversal index
    Children {
        #[arg(allow_negative_numbers = true)]
        index: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_file);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(hint) = e.hint() {
                eprintln!("Hint: {}", hint);
            }
            e.exit_code()
        }
    }
}

fn init_logging(log_file: bool) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if log_file {
        let log_dir = logs_dir();
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!("Warning: cannot create {}: {}", log_dir.display(), e);
        }
        let file_appender = tracing_appender::rolling::never(&log_dir, "tapwright.log");
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(file_appender)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(io::stderr)
            .init();
    }
}

#[derive(Debug)]
enum CliError {
    /// The operation ran and failed.
    Failed(String),
    /// A precondition the user can fix.
    Actionable { message: String, hint: Option<String> },
    /// Input or tool output could not be parsed.
    Parse(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Failed(_) => ExitCode::from(1),
            CliError::Actionable { .. } => ExitCode::from(2),
            CliError::Parse(_) => ExitCode::from(3),
        }
    }

    fn hint(&self) -> Option<&str> {
        match self {
            CliError::Actionable { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    fn actionable(message: impl Into<String>, hint: impl Into<String>) -> Self {
        CliError::Actionable {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Failed(msg) => write!(f, "{}", msg),
            CliError::Actionable { message, .. } => write!(f, "{}", message),
            CliError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl From<DeviceError> for CliError {
    fn from(err: DeviceError) -> Self {
        if err.is_actionable() {
            return CliError::Actionable {
                hint: err.hint(),
                message: err.to_string(),
            };
        }
        match err {
            DeviceError::Parse { .. } => CliError::Parse(err.to_string()),
            other => CliError::Failed(other.to_string()),
        }
    }
}

impl From<ToolchainError> for CliError {
    fn from(err: ToolchainError) -> Self {
        if err.is_actionable() {
            CliError::Actionable {
                hint: err.hint(),
                message: err.to_string(),
            }
        } else {
            CliError::Failed(err.to_string())
        }
    }
}

impl From<ResolveError> for CliError {
    fn from(err: ResolveError) -> Self {
        CliError::actionable(err.to_string(), err.hint())
    }
}

impl From<HierarchyError> for CliError {
    fn from(err: HierarchyError) -> Self {
        if err.is_actionable() {
            return CliError::Actionable { message: err.to_string(), hint: None };
        }
        CliError::Parse(err.to_string())
    }
}

impl From<MotionError> for CliError {
    fn from(err: MotionError) -> Self {
        if !err.is_actionable() {
            return CliError::Failed(err.to_string());
        }
        let hint = match err {
            MotionError::ZeroSteps => "Use --steps 1 or more",
            MotionError::UnknownEasing(_) => "Run `tapwright path --help` for the easing names",
        };
        CliError::actionable(err.to_string(), hint)
    }
}

/// Shared state for commands that touch the host.
struct Host {
    config: TapwrightConfig,
    runner: Arc<dyn CommandRunner>,
}

impl Host {
    fn new(timeout: Option<u64>) -> Self {
        let mut config = TapwrightConfig::load();
        if let Some(timeout) = timeout {
            config.command_timeout_ms = timeout;
        }
        debug!(?config, "loaded config");
        Self {
            config,
            runner: Arc::new(ProcessExecutor::new()),
        }
    }

    fn locator(&self) -> ToolchainLocator {
        ToolchainLocator::new(Arc::clone(&self.runner)).with_manual_root(self.config.sdk_root.clone())
    }

    async fn best_location(&self) -> Option<ToolLocation> {
        select_best(&self.locator().detect().await).cloned()
    }

    async fn controller(&self) -> DeviceController {
        let location = self.best_location().await;
        let cache = Arc::new(DeviceListCache::for_devices(Arc::new(SystemClock)));
        DeviceController::for_host(Arc::clone(&self.runner), location.as_ref(), &self.config, cache)
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Parse(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let format = cli.format;
    match cli.command {
        Command::Tools { command } => run_tools(command, &Host::new(cli.timeout), format).await,
        Command::Devices { command } => run_devices(command, &Host::new(cli.timeout), format).await,
        Command::App { command } => run_app(command, &Host::new(cli.timeout), format).await,
        Command::Query { file, command } => run_query(&file, command, format),
        Command::Path { x1, y1, x2, y2, steps, easing, duration } => {
            let path = generate(
                Point::new(x1, y1),
                Point::new(x2, y2),
                MotionOptions { steps, easing, duration_ms: duration },
            )?;
            match format {
                OutputFormat::Json => print_json(&path),
                OutputFormat::Text => {
                    for point in &path {
                        match point.delay {
                            Some(delay) => println!("{} {} {}", point.x, point.y, delay),
                            None => println!("{} {}", point.x, point.y),
                        }
                    }
                    Ok(())
                }
            }
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

async fn run_tools(command: ToolsCommand, host: &Host, format: OutputFormat) -> Result<(), CliError> {
    let no_sdk = || {
        CliError::actionable(
            "No Android SDK found",
            "Set ANDROID_HOME, or run `tapwright tools install`",
        )
    };

    match command {
        ToolsCommand::Detect => {
            let locations = host.locator().detect().await;
            match format {
                OutputFormat::Json => print_json(&locations)?,
                OutputFormat::Text if locations.is_empty() => eprintln!("No Android SDK locations found"),
                OutputFormat::Text => locations.iter().for_each(|l| println!("{}", render::location_line(l))),
            }
            Ok(())
        }
        ToolsCommand::Select => {
            let best = host.best_location().await.ok_or_else(no_sdk)?;
            match format {
                OutputFormat::Json => print_json(&best),
                OutputFormat::Text => {
                    println!("{}", render::location_line(&best));
                    Ok(())
                }
            }
        }
        ToolsCommand::Validate { tools } => {
            let best = host.best_location().await.ok_or_else(no_sdk)?;
            let result = validate_required(&best, &tools);
            match format {
                OutputFormat::Json => print_json(&json!({
                    "valid": result.valid,
                    "missing": result.missing,
                    "location": best,
                }))?,
                OutputFormat::Text if result.valid => println!("All required tools found in {}", best.path.display()),
                OutputFormat::Text => {}
            }
            if result.valid {
                return Ok(());
            }
            let names: Vec<&str> = result.missing.iter().map(|t| t.name()).collect();
            Err(CliError::actionable(
                format!("Missing tools in {}: {}", best.path.display(), names.join(", ")),
                format!("Run `tapwright tools install {}`", names.join(" ")),
            ))
        }
        ToolsCommand::Install { tools, path } => {
            let tools = if tools.is_empty() { KnownTool::ALL.to_vec() } else { tools };
            let installer = ToolInstaller::new(Arc::clone(&host.runner)).with_default_dir(host.config.install_dir.clone());
            let explicit = path.map(|path| ToolLocation {
                path,
                source: ToolSource::Manual,
                version: None,
                available_tools: Vec::new(),
            });
            let target = match explicit {
                Some(location) => Some(location),
                None => host.best_location().await,
            };
            let result = installer.install(target.as_ref(), &tools).await;
            match format {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Text => println!("{}", result.message),
            }
            if result.success {
                Ok(())
            } else {
                Err(CliError::Failed(format!("installation incomplete: {}", result.message)))
            }
        }
    }
}

async fn run_devices(command: DevicesCommand, host: &Host, format: OutputFormat) -> Result<(), CliError> {
    let controller = host.controller().await;
    match command {
        DevicesCommand::List { backend } => {
            let devices = controller.list(backend).await?;
            match format {
                OutputFormat::Json => print_json(&*devices)?,
                OutputFormat::Text if devices.is_empty() => eprintln!("No {} devices found", backend),
                OutputFormat::Text => devices.iter().for_each(|d| println!("{}", render::device_line(d))),
            }
        }
        DevicesCommand::Booted { backend } => {
            let devices = controller.booted(backend).await?;
            match format {
                OutputFormat::Json => print_json(&devices)?,
                OutputFormat::Text if devices.is_empty() => eprintln!("No running {} devices", backend),
                OutputFormat::Text => devices.iter().for_each(|d| println!("{}", render::booted_line(d))),
            }
        }
        DevicesCommand::Boot { device, backend } => {
            let booted = controller.boot(backend, &device).await?;
            match format {
                OutputFormat::Json => print_json(&booted)?,
                OutputFormat::Text => println!("{}", render::booted_line(&booted)),
            }
        }
        DevicesCommand::Shutdown { device, backend } => {
            controller.shutdown(backend, &device).await?;
            report_done(format, "shutdown", &device);
        }
        DevicesCommand::Create { name, device_type, runtime, backend } => {
            let created = controller
                .create(backend, &CreateDevice { name, device_type, runtime })
                .await?;
            match format {
                OutputFormat::Json => print_json(&created)?,
                OutputFormat::Text => println!("{}", render::device_line(&created)),
            }
        }
        DevicesCommand::Delete { device, backend } => {
            controller.delete(backend, &device).await?;
            report_done(format, "delete", &device);
        }
        DevicesCommand::ScreenSize { device, backend } => {
            let size = controller.screen_size(backend, &device).await?;
            match format {
                OutputFormat::Json => print_json(&size)?,
                OutputFormat::Text => println!("{}", render::screen_size_line(&size)),
            }
        }
    }
    Ok(())
}

async fn run_app(command: AppCommand, host: &Host, format: OutputFormat) -> Result<(), CliError> {
    let controller = host.controller().await;
    match command {
        AppCommand::Launch { device, app_id, backend } => {
            controller.launch_app(backend, &device, &app_id).await?;
            report_done(format, "launch", &app_id);
        }
        AppCommand::Terminate { device, app_id, backend } => {
            controller.terminate_app(backend, &device, &app_id).await?;
            report_done(format, "terminate", &app_id);
        }
    }
    Ok(())
}

fn report_done(format: OutputFormat, action: &str, target: &str) {
    match format {
        OutputFormat::Json => println!("{}", json!({ "success": true, "action": action, "target": target })),
        OutputFormat::Text => eprintln!("{} {}: done", action, target),
    }
}

fn load_snapshot(file: &Path) -> Result<Hierarchy, CliError> {
    let json = std::fs::read_to_string(file).map_err(|e| {
        CliError::actionable(
            format!("Cannot read {}: {}", file.display(), e),
            "Pass a hierarchy snapshot saved as JSON",
        )
    })?;
    Ok(Hierarchy::from_json_str(&json)?)
}

fn run_query(file: &Path, command: QueryCommand, format: OutputFormat) -> Result<(), CliError> {
    let hierarchy = load_snapshot(file)?;
    let resolver = ElementResolver::new(&hierarchy);

    if let QueryCommand::Flatten = command {
        let flat = resolver.flatten();
        match format {
            OutputFormat::Json => {
                let entries: Vec<_> = flat.iter().map(render::indexed_json).collect();
                print_json(&entries)?;
            }
            OutputFormat::Text => flat.iter().for_each(|e| println!("{}", render::indexed_line(e))),
        }
        return Ok(());
    }

    let matches: Vec<&Element> = match command {
        QueryCommand::Text { text, exact, case_sensitive, container } => {
            let query = TextQuery { fuzzy: !exact, case_sensitive };
            let found = match container {
                Some(container) => resolver.find_by_text_in(&container, &text, query)?,
                None => resolver.find_by_text(&text, query),
            };
            found.into_iter().collect()
        }
        QueryCommand::Id { id, partial, container } => match container {
            Some(container) => resolver.find_by_resource_id_in(&container, &id, partial)?,
            None => resolver.find_by_resource_id(&id, partial),
        },
        QueryCommand::Class { class, partial } => resolver.find_by_class(&class, partial),
        QueryCommand::Clickable => resolver.find_clickable(),
        QueryCommand::Scrollable => resolver.find_scrollable(),
        QueryCommand::Focused => resolver.find_focused().into_iter().collect(),
        QueryCommand::Index { index } => resolver.find_by_index(index).into_iter().collect(),
        QueryCommand::Children { index } => {
            let parent = resolver.find_by_index(index).ok_or_else(|| {
                CliError::actionable(
                    format!("No element at index {}", index),
                    "List indices with `tapwright query --file <snapshot> flatten`",
                )
            })?;
            resolver.find_children(parent)
        }
        QueryCommand::Flatten => Vec::new(),
    };

    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = matches.iter().map(|e| render::element_json(e)).collect();
            print_json(&entries)?;
        }
        OutputFormat::Text => matches.iter().for_each(|e| println!("{}", render::element_line(e))),
    }

    if matches.is_empty() {
        return Err(CliError::Failed("No matching element".to_string()));
    }
    Ok(())
}
