//! Android provider over `adb`
//!
//! Every device-scoped command template starts with `-s {0}`; [`AdbProvider`]
//! prepends the connected serial so the shared provider defaults (power,
//! status, screenshot) address the right device when several are attached.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::detect::{targets_from_value, Target};
use super::{
    actions, value_lines, DeviceProvider, LogEntry, LogReport, LogType, Platform, ProviderCore,
    RunResult,
};
use crate::command::{CommandDescriptor, CommandTable};
use crate::error::{DeviceError, Result};
use crate::exec::ExecPolicy;

const ADB: &str = "adb";

// adb-specific actions
const WAIT_FOR_DEVICE: &str = "wait-for-device";
const LAUNCH_PACKAGE: &str = "launch-package";
const PIDOF: &str = "pidof";
const LOGCAT: &str = "logcat";
const PULL: &str = "pull";
const REMOVE: &str = "remove";
const LIST_PROCESSES: &str = "list-processes";
const SYSINFO: &str = "sysinfo";
const PUSH: &str = "push";

/// Actions that run against the adb server rather than one device
const UNSCOPED: &[&str] = &[actions::CONNECT, actions::DISCONNECT, actions::LIST_TARGET];

/// On-device scratch path for screenshots
const DEVICE_SCREENSHOT: &str = "/sdcard/device-agent-screenshot.png";

fn device(args: &[&str]) -> CommandDescriptor {
    let mut full = vec!["-s", "{0}"];
    full.extend_from_slice(args);
    CommandDescriptor::new(ADB, full)
}

fn exec_policy() -> ExecPolicy {
    ExecPolicy::new()
        .with_default_timeout(Duration::from_secs(120))
        .with_timeout(WAIT_FOR_DEVICE, Duration::from_secs(300))
        .with_timeout(PULL, Duration::from_secs(60))
}

fn command_table() -> CommandTable {
    CommandTable::new()
        .with(
            actions::CONNECT,
            CommandDescriptor::new(ADB, ["connect", "{0}"]).with_transform(|raw| {
                let lower = raw.to_lowercase();
                if lower.contains("connected") && !lower.contains("failed") {
                    Ok(Value::String(raw.trim().to_string()))
                } else {
                    Err(format!("adb connect did not connect: {}", raw.trim()))
                }
            }),
        )
        .with(actions::DISCONNECT, CommandDescriptor::new(ADB, ["disconnect", "{0}"]))
        .with(
            actions::LIST_TARGET,
            CommandDescriptor::new(ADB, ["devices"]).with_transform(|raw| Ok(parse_devices(raw))),
        )
        .with_no_op(actions::POWER_ON)
        .with(actions::POWER_OFF, device(&["shell", "reboot", "-p"]))
        .with(actions::RESET, device(&["reboot"]))
        .with(WAIT_FOR_DEVICE, device(&["wait-for-device"]))
        .with(
            actions::GET_STATUS,
            device(&["shell", "getprop"]).with_transform(|raw| Ok(status_from_props(raw))),
        )
        .with(
            SYSINFO,
            device(&["shell", "getprop"]).with_transform(|raw| Ok(Value::Object(parse_getprop(raw)))),
        )
        .with(actions::LAUNCH, device(&["shell", "am", "start", "-W", "-n", "{1}"]))
        .with(
            LAUNCH_PACKAGE,
            device(&[
                "shell",
                "monkey",
                "-p",
                "{1}",
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ]),
        )
        .with(PIDOF, device(&["shell", "pidof", "{1}"]))
        .with(LOGCAT, device(&["logcat", "-d", "-v", "threadtime", "-b", "{1}", "-t", "{2}"]))
        .with(actions::SCREENSHOT, device(&["shell", "screencap", "-p", "{1}"]))
        .with(PULL, device(&["pull", "{1}", "{2}"]))
        .with(REMOVE, device(&["shell", "rm", "-f", "{1}"]))
        .with(
            LIST_PROCESSES,
            device(&["shell", "ps", "-A", "-o", "NAME"]).with_transform(|raw| {
                Ok(Value::Array(
                    raw.lines()
                        .skip(1)
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(|name| Value::String(name.to_string()))
                        .collect(),
                ))
            }),
        )
        .with(PUSH, device(&["push", "{1}", "{2}"]))
}

#[derive(Debug)]
pub struct AdbProvider {
    core: ProviderCore,
}

impl AdbProvider {
    /// Resolve `adb` from `ANDROID_HOME` or `ANDROID_SDK_ROOT`, falling back to PATH
    pub fn from_env() -> Result<Self> {
        let sdk_root = match std::env::var_os("ANDROID_HOME")
            .or_else(|| std::env::var_os("ANDROID_SDK_ROOT"))
        {
            Some(home) => {
                let tools = PathBuf::from(home).join("platform-tools");
                if !tools.is_dir() {
                    return Err(DeviceError::config(format!(
                        "Android SDK has no platform-tools directory at {}",
                        tools.display()
                    )));
                }
                Some(tools)
            }
            None => None,
        };
        Ok(Self::with_core(
            ProviderCore::new(Platform::AndroidAdb, command_table(), sdk_root)
                .with_policy(exec_policy()),
        ))
    }

    pub fn with_core(core: ProviderCore) -> Self {
        Self { core }
    }

    fn serial(&self) -> Result<String> {
        self.core
            .target()
            .ok_or_else(|| DeviceError::config("No Android device selected; connect first"))
    }

    /// Devices in the `device` state, as reported by `adb devices`
    pub async fn list_devices(&self) -> Result<Vec<Target>> {
        let value = self.invoke(actions::LIST_TARGET, &[]).await?;
        Ok(targets_from_value(value))
    }
}

#[async_trait]
impl DeviceProvider for AdbProvider {
    fn core(&self) -> &ProviderCore {
        &self.core
    }

    async fn invoke(&self, action: &str, params: &[&str]) -> Result<Option<Value>> {
        let built = if UNSCOPED.contains(&action) {
            self.core.builder().build(action, params)?
        } else {
            let serial = self.serial()?;
            let mut scoped = Vec::with_capacity(params.len() + 1);
            scoped.push(serial.as_str());
            scoped.extend_from_slice(params);
            self.core.builder().build(action, &scoped)?
        };
        self.invoke_built(&built).await
    }

    async fn connect(&self, target: Option<&str>) -> Result<()> {
        if let Some(address) = target.filter(|t| t.contains(':')) {
            self.invoke(actions::CONNECT, &[address]).await?;
        }

        let devices = self.list_devices().await?;
        let serial = match target {
            Some(wanted) => devices
                .iter()
                .find(|d| d.name == wanted)
                .map(|d| d.name.clone())
                .ok_or_else(|| {
                    DeviceError::config(format!("Android device {} is not attached", wanted))
                })?,
            None => match devices.as_slice() {
                [] => return Err(DeviceError::NoTargetsFound),
                [only] => only.name.clone(),
                many => {
                    return Err(DeviceError::AmbiguousTargets {
                        source_kind: "attached".to_string(),
                        count: many.len(),
                    })
                }
            },
        };

        info!("Connected to Android device {}", serial);
        self.core.set_target(Some(serial));
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(serial) = self.core.target().filter(|s| s.contains(':')) {
            if let Err(e) = self.invoke(actions::DISCONNECT, &[serial.as_str()]).await {
                warn!("adb disconnect {} failed: {}", serial, e);
            }
        }
        self.core.set_target(None);
    }

    async fn restart_device(&self) -> Result<()> {
        self.invoke(actions::RESET, &[]).await?;
        self.invoke(WAIT_FOR_DEVICE, &[]).await.map(|_| ())
    }

    async fn run_application(&self, path: &str, args: &[String]) -> Result<RunResult> {
        let started_at = Local::now();
        let serial = self.serial()?;

        let (action, package) = match path.split_once('/') {
            Some((package, _)) => (actions::LAUNCH, package),
            None => (LAUNCH_PACKAGE, path),
        };
        if action == LAUNCH_PACKAGE && !args.is_empty() {
            warn!("Launching {} by package; arguments are ignored", path);
        }

        let mut built = self.core.builder().build(action, &[serial.as_str(), path])?;
        if action == actions::LAUNCH {
            built = built.with_trailing_args(args);
        }
        let launched = self.invoke_built(&built).await?;
        let mut output = value_lines(launched.as_ref());

        self.wait_for_exit(package).await;

        match self.get_device_logs(LogType::Application, super::RUN_LOG_ENTRIES).await {
            Ok(report) => output.extend(
                report
                    .logs
                    .into_iter()
                    .filter(|entry| entry.timestamp >= started_at)
                    .map(|entry| entry.message),
            ),
            Err(e) => debug!("No logcat output collected after run: {}", e),
        }

        Ok(RunResult {
            platform: self.platform(),
            path: path.to_string(),
            arguments: args.to_vec(),
            started_at,
            finished_at: Local::now(),
            output,
            exit_code: None,
        })
    }

    async fn process_running(&self, package: &str) -> Result<Option<bool>> {
        match self.invoke(PIDOF, &[package]).await {
            Ok(value) => Ok(Some(
                value_lines(value.as_ref()).iter().any(|l| !l.trim().is_empty()),
            )),
            // pidof exits 1 when nothing matches
            Err(DeviceError::CommandFailed {
                exit_code: Some(1), ..
            }) => Ok(Some(false)),
            Err(e) => Err(e),
        }
    }

    async fn get_device_logs(&self, log_type: LogType, max_entries: usize) -> Result<LogReport> {
        let buffer = match log_type {
            LogType::All => "all",
            LogType::System => "system",
            LogType::Application => "main",
            LogType::Crash => "crash",
        };
        let count = max_entries.to_string();
        let value = self.invoke(LOGCAT, &[buffer, count.as_str()]).await?;
        let year = Local::now().year();
        let logs = value_lines(value.as_ref())
            .iter()
            .filter_map(|line| parse_logcat_line(line, year))
            .collect();
        Ok(LogReport::new(self.platform(), log_type, logs))
    }

    async fn take_screenshot(&self, path: &Path) -> Result<Option<PathBuf>> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let local = path.to_string_lossy();
        self.invoke(actions::SCREENSHOT, &[DEVICE_SCREENSHOT]).await?;
        let pulled = self.invoke(PULL, &[DEVICE_SCREENSHOT, local.as_ref()]).await;
        if let Err(e) = self.invoke(REMOVE, &[DEVICE_SCREENSHOT]).await {
            debug!("Could not remove {} from device: {}", DEVICE_SCREENSHOT, e);
        }
        pulled?;
        Ok(Some(path.to_path_buf()))
    }

    async fn get_system_info(&self) -> Result<Value> {
        Ok(self.invoke(SYSINFO, &[]).await?.unwrap_or(Value::Null))
    }

    async fn get_running_processes(&self) -> Result<Vec<String>> {
        let value = self.invoke(LIST_PROCESSES, &[]).await?;
        Ok(value_lines(value.as_ref()))
    }

    async fn copy_item(&self, source: &Path, destination: &str) -> Result<()> {
        let local = source.to_string_lossy();
        self.invoke(PUSH, &[local.as_ref(), destination]).await?;
        info!("Pushed {} to {}", source.display(), destination);
        Ok(())
    }
}

/// `adb devices` output as an array of targets in the `device` state
fn parse_devices(raw: &str) -> Value {
    Value::Array(
        raw.lines()
            .skip_while(|line| !line.starts_with("List of devices"))
            .skip(1)
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next()) {
                    (Some(serial), Some("device")) => {
                        Some(json!({ "name": serial, "address": serial }))
                    }
                    _ => None,
                }
            })
            .collect(),
    )
}

/// `[key]: [value]` lines from `getprop`
fn parse_getprop(raw: &str) -> Map<String, Value> {
    raw.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once("]: [")?;
            let key = key.trim().strip_prefix('[')?;
            let value = value.trim().strip_suffix(']')?;
            Some((key.to_string(), Value::String(value.to_string())))
        })
        .collect()
}

fn status_from_props(raw: &str) -> Value {
    let props = parse_getprop(raw);
    let prop = |key: &str| props.get(key).cloned().unwrap_or(Value::Null);
    json!({
        "deviceName": prop("ro.product.model"),
        "manufacturer": prop("ro.product.manufacturer"),
        "androidVersion": prop("ro.build.version.release"),
        "sdk": prop("ro.build.version.sdk"),
        "serial": prop("ro.serialno"),
        "bootCompleted": prop("sys.boot_completed") == "1",
    })
}

/// Parse one `threadtime` logcat line: `MM-DD HH:MM:SS.mmm PID TID L TAG: message`
fn parse_logcat_line(line: &str, year: i32) -> Option<LogEntry> {
    let mut rest = line.trim_start();
    let mut fields = [""; 5];
    for field in fields.iter_mut() {
        let end = rest.find(char::is_whitespace)?;
        *field = &rest[..end];
        rest = rest[end..].trim_start();
    }
    let [date, time, _pid, _tid, level] = fields;

    let naive = NaiveDateTime::parse_from_str(
        &format!("{}-{} {}", year, date, time),
        "%Y-%m-%d %H:%M:%S%.3f",
    )
    .ok()?;
    let timestamp: DateTime<Local> = Local.from_local_datetime(&naive).earliest()?;

    let level = match level {
        "V" => "Verbose",
        "D" => "Debug",
        "I" => "Info",
        "W" => "Warning",
        "E" => "Error",
        "F" | "A" => "Fatal",
        _ => return None,
    };

    Some(LogEntry {
        timestamp,
        level: level.to_string(),
        message: rest.to_string(),
    })
}
