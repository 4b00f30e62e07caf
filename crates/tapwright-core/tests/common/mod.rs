//! Shared test helpers for tapwright-core integration tests.
//!
//! Provides a scripted [`CommandRunner`] that answers tool invocations with
//! canned output, plus builders for fake SDK directory trees.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use tapwright_core::process::{CommandOutput, CommandRunner, CommandSpec, ProcessError};

// ---------------------------------------------------------------------------
// Scripted command runner
// ---------------------------------------------------------------------------

/// Canned answer for one command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Exit 0 with this stdout.
    Stdout(String),
    /// Non-zero exit with this stderr.
    Fail { code: i32, stderr: String },
    /// The program does not exist.
    NotFound,
    /// The command timed out.
    Timeout,
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Stdout(stdout.into())
    }

    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Reply::Fail {
            code,
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug)]
struct Rule {
    program: String,
    args: Vec<String>,
    replies: VecDeque<Reply>,
}

/// A [`CommandRunner`] that matches commands against registered rules.
///
/// A rule matches when the program's file name equals the rule's program and
/// the arguments start with the rule's arguments; the longest match wins.
/// Queued replies are consumed in order and the last one repeats. Commands
/// with no rule fail with exit code 127.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    detached: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `reply` for commands starting with `program args...`.
    pub fn on(&self, program: &str, args: &[&str], reply: Reply) -> &Self {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| r.program == program && r.args == args) {
            Some(rule) => rule.replies.push_back(reply),
            None => rules.push(Rule {
                program: program.to_string(),
                args,
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    /// Every command run so far, as display strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(CommandSpec::display).collect()
    }

    /// Every command run so far.
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of commands whose display string starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Commands started with `spawn_detached`.
    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().unwrap().iter().map(CommandSpec::display).collect()
    }

    fn reply_for(&self, spec: &CommandSpec) -> Option<Reply> {
        let program = Path::new(&spec.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&spec.program)
            .to_string();
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .filter(|r| r.program == program && spec.args.starts_with(&r.args))
            .max_by_key(|r| r.args.len())?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.calls.lock().unwrap().push(spec.clone());
        match self.reply_for(spec) {
            Some(Reply::Stdout(stdout)) => Ok(CommandOutput::from_stdout(stdout)),
            Some(Reply::Fail { code, stderr }) => Err(ProcessError::Failed {
                command: spec.display(),
                code: Some(code),
                stderr,
                stdout: String::new(),
            }),
            Some(Reply::NotFound) => Err(ProcessError::NotFound {
                program: spec.program.clone(),
            }),
            Some(Reply::Timeout) => Err(ProcessError::Timeout {
                command: spec.display(),
                timeout_ms: spec.timeout.map_or(0, |t| t.as_millis() as u64),
            }),
            None => Err(ProcessError::Failed {
                command: spec.display(),
                code: Some(127),
                stderr: format!("unexpected command: {}", spec.display()),
                stdout: String::new(),
            }),
        }
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, ProcessError> {
        match self.reply_for(spec) {
            Some(Reply::NotFound) => Err(ProcessError::NotFound {
                program: spec.program.clone(),
            }),
            _ => {
                self.detached.lock().unwrap().push(spec.clone());
                Ok(4242)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fake SDK trees
// ---------------------------------------------------------------------------

/// Creates an empty file (and its parents) under `root`.
pub fn touch(root: &Path, relative: &str) -> PathBuf {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "").unwrap();
    path
}

/// Lays out an SDK with the given tools under `root` (Unix file names).
pub fn fake_sdk(root: &Path, tools: &[&str]) {
    for tool in tools {
        let relative = match *tool {
            "adb" => "platform-tools/adb",
            "emulator" => "emulator/emulator",
            "sdkmanager" => "cmdline-tools/latest/bin/sdkmanager",
            "avdmanager" => "cmdline-tools/latest/bin/avdmanager",
            other => panic!("unknown tool {other}"),
        };
        touch(root, relative);
    }
}

// ---------------------------------------------------------------------------
// Tool output fixtures
// ---------------------------------------------------------------------------

pub const SIMCTL_LIST: &str = r#"{
    "devices": {
        "com.apple.CoreSimulator.SimRuntime.iOS-17-0": [
            {
                "udid": "A1B2C3D4-E5F6-7890-ABCD-EF1234567890",
                "name": "iPhone 15 Pro",
                "state": "Shutdown",
                "isAvailable": true,
                "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-15-Pro"
            }
        ]
    }
}"#;

pub fn simctl_list_booted() -> String {
    SIMCTL_LIST.replace("\"Shutdown\"", "\"Booted\"")
}

pub const SIM_UDID: &str = "A1B2C3D4-E5F6-7890-ABCD-EF1234567890";

pub const ADB_DEVICES_NONE: &str = "List of devices attached\n\n";
pub const ADB_DEVICES_ONE: &str = "List of devices attached\nemulator-5554\tdevice\n\n";
