//! Device providers: one implementation of the lifecycle contract per platform
//!
//! - `DeviceProvider`: the shared contract, with default behavior built on the
//!   provider's command table and executor
//! - `detect`: target auto-detection for platforms with a target manager
//! - `mock`, `native`, `adb`: in-tree adapters

mod adb;
pub mod detect;
mod mock;
mod native;

pub use adb::AdbProvider;
pub use detect::{auto_detect, CommandTargetManager, Target, TargetManager};
pub use mock::MockProvider;
pub use native::NativeProvider;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::command::{BuiltCommand, CommandBuilder, CommandTable};
use crate::config::{DeviceTimingConfig, TIMING_CONFIG};
use crate::error::{DeviceError, Result};
use crate::exec::{CommandRunner, ExecPolicy, Executor, ProcessRunner};

/// Fixed vocabulary of command-table action names
pub mod actions {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const POWER_ON: &str = "poweron";
    pub const POWER_OFF: &str = "poweroff";
    pub const RESET: &str = "reset";
    pub const GET_STATUS: &str = "getstatus";
    pub const LAUNCH: &str = "launch";
    pub const SCREENSHOT: &str = "screenshot";
    pub const GET_DEFAULT_TARGET: &str = "get-default-target";
    pub const LIST_TARGET: &str = "list-target";
    pub const DETECT_TARGET: &str = "detect-target";
    pub const SET_DEFAULT_TARGET: &str = "set-default-target";
    pub const REGISTER_TARGET: &str = "register-target";
}

/// Log entries fetched after an application run
const RUN_LOG_ENTRIES: usize = 500;

/// Log entries fetched for a diagnostics bundle
const DIAGNOSTIC_LOG_ENTRIES: usize = 1000;

/// Supported platform variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Xbox,
    PlayStation5,
    Switch,
    AndroidAdb,
    AndroidSauceLabs,
    #[serde(rename = "iOSSauceLabs")]
    IosSauceLabs,
    Windows,
    #[serde(rename = "MacOS")]
    MacOs,
    Linux,
    Mock,
}

impl Platform {
    pub const ALL: [Platform; 10] = [
        Self::Xbox,
        Self::PlayStation5,
        Self::Switch,
        Self::AndroidAdb,
        Self::AndroidSauceLabs,
        Self::IosSauceLabs,
        Self::Windows,
        Self::MacOs,
        Self::Linux,
        Self::Mock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xbox => "Xbox",
            Self::PlayStation5 => "PlayStation5",
            Self::Switch => "Switch",
            Self::AndroidAdb => "AndroidAdb",
            Self::AndroidSauceLabs => "AndroidSauceLabs",
            Self::IosSauceLabs => "iOSSauceLabs",
            Self::Windows => "Windows",
            Self::MacOs => "MacOS",
            Self::Linux => "Linux",
            Self::Mock => "Mock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "xbox" => Some(Self::Xbox),
            "playstation5" | "ps5" => Some(Self::PlayStation5),
            "switch" => Some(Self::Switch),
            "androidadb" | "android" | "adb" => Some(Self::AndroidAdb),
            "androidsaucelabs" => Some(Self::AndroidSauceLabs),
            "iossaucelabs" => Some(Self::IosSauceLabs),
            "windows" | "win" => Some(Self::Windows),
            "macos" | "mac" => Some(Self::MacOs),
            "linux" => Some(Self::Linux),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    /// Cloud device farms isolate sessions server-side and skip the resource lock
    pub fn requires_lock(&self) -> bool {
        !matches!(self, Self::AndroidSauceLabs | Self::IosSauceLabs)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which log stream to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogType {
    #[default]
    All,
    System,
    Application,
    Crash,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "All",
            Self::System => "System",
            Self::Application => "Application",
            Self::Crash => "Crash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Some(Self::All),
            "system" => Some(Self::System),
            "application" | "app" => Some(Self::Application),
            "crash" => Some(Self::Crash),
            _ => None,
        }
    }
}

/// Outcome of `run_application`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub platform: Platform,
    pub path: String,
    pub arguments: Vec<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub output: Vec<String>,
    /// `None` when the platform cannot report one
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub platform: Platform,
    pub status: String,
    pub status_data: Value,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogReport {
    pub platform: Platform,
    pub log_type: LogType,
    pub logs: Vec<LogEntry>,
    pub count: usize,
    pub timestamp: DateTime<Local>,
}

impl LogReport {
    pub fn new(platform: Platform, log_type: LogType, logs: Vec<LogEntry>) -> Self {
        Self {
            platform,
            log_type,
            count: logs.len(),
            logs,
            timestamp: Local::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub platform: Platform,
    pub timestamp: DateTime<Local>,
    pub files: Vec<PathBuf>,
}

/// State shared by every provider: command table, executor, connected target
pub struct ProviderCore {
    platform: Platform,
    builder: CommandBuilder,
    executor: Executor,
    timing: DeviceTimingConfig,
    target: Mutex<Option<String>>,
}

impl fmt::Debug for ProviderCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCore")
            .field("platform", &self.platform)
            .field("builder", &self.builder)
            .field("executor", &self.executor)
            .field("target", &self.target())
            .finish()
    }
}

impl ProviderCore {
    pub fn new(platform: Platform, table: CommandTable, sdk_root: Option<PathBuf>) -> Self {
        Self {
            platform,
            builder: CommandBuilder::new(table, sdk_root),
            executor: Executor::new(Arc::new(ProcessRunner), ExecPolicy::default()),
            timing: TIMING_CONFIG.device.clone(),
            target: Mutex::new(None),
        }
    }

    pub fn with_runner(self, runner: Arc<dyn CommandRunner>) -> Self {
        let policy = self.executor.policy().clone();
        Self {
            executor: Executor::new(runner, policy),
            ..self
        }
    }

    pub fn with_policy(self, policy: ExecPolicy) -> Self {
        let runner = Arc::clone(self.executor.runner());
        Self {
            executor: Executor::new(runner, policy),
            ..self
        }
    }

    pub fn with_timing(mut self, timing: DeviceTimingConfig) -> Self {
        self.timing = timing;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn timing(&self) -> &DeviceTimingConfig {
        &self.timing
    }

    pub fn target(&self) -> Option<String> {
        self.target
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_target(&self, target: Option<String>) {
        *self.target.lock().unwrap_or_else(|e| e.into_inner()) = target;
    }
}

/// Uniform device lifecycle contract
///
/// Every method has a default built on the command table in [`ProviderCore`];
/// adapters override whatever their platform does differently.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    fn core(&self) -> &ProviderCore;

    fn platform(&self) -> Platform {
        self.core().platform()
    }

    /// Build and run one action. `Ok(None)` when the action is a no-op here.
    async fn invoke(&self, action: &str, params: &[&str]) -> Result<Option<Value>> {
        let built = self.core().builder().build(action, params)?;
        self.invoke_built(&built).await
    }

    /// Run an already built command, restarting the device between timed-out attempts
    async fn invoke_built(&self, built: &BuiltCommand) -> Result<Option<Value>> {
        let restart = || self.restart_device();
        self.core().executor().invoke(built, &restart).await
    }

    fn supports_target_detection(&self) -> bool {
        self.core()
            .builder()
            .table()
            .contains(actions::GET_DEFAULT_TARGET)
    }

    async fn connect(&self, target: Option<&str>) -> Result<()> {
        let target = match target {
            Some(t) => Some(t.to_string()),
            None if self.supports_target_detection() => {
                let manager = CommandTargetManager::new(self);
                let found = auto_detect(&manager, self.core().timing().detect_timeout).await?;
                Some(found.name)
            }
            None => None,
        };

        match &target {
            Some(t) => self.invoke(actions::CONNECT, &[t.as_str()]).await?,
            None => self.invoke(actions::CONNECT, &[]).await?,
        };
        info!(
            "Connected to {} target {}",
            self.platform(),
            target.as_deref().unwrap_or("(default)")
        );
        self.core().set_target(target);
        Ok(())
    }

    /// Never fails; cleanup paths must be able to call it unconditionally
    async fn disconnect(&self) {
        if let Err(e) = self.invoke(actions::DISCONNECT, &[]).await {
            warn!("Disconnect from {} failed: {}", self.platform(), e);
        }
        self.core().set_target(None);
    }

    async fn test_connection(&self) -> bool {
        match self.invoke(actions::GET_STATUS, &[]).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Connection test for {} failed: {}", self.platform(), e);
                false
            }
        }
    }

    async fn start_device(&self) -> Result<()> {
        self.invoke(actions::POWER_ON, &[]).await.map(|_| ())
    }

    async fn stop_device(&self) -> Result<()> {
        self.invoke(actions::POWER_OFF, &[]).await.map(|_| ())
    }

    async fn restart_device(&self) -> Result<()> {
        self.invoke(actions::RESET, &[]).await.map(|_| ())
    }

    async fn get_status(&self) -> Result<StatusReport> {
        let data = self.invoke(actions::GET_STATUS, &[]).await?;
        // A platform without a status command cannot vouch for the device
        let status = if data.is_some() { "Online" } else { "Unknown" };
        Ok(StatusReport {
            platform: self.platform(),
            status: status.to_string(),
            status_data: data.unwrap_or(Value::Null),
            timestamp: Local::now(),
        })
    }

    async fn run_application(&self, path: &str, args: &[String]) -> Result<RunResult> {
        let started_at = Local::now();
        let built = self
            .core()
            .builder()
            .build(actions::LAUNCH, &[path])?
            .with_trailing_args(args);
        let launched = self.invoke_built(&built).await?;
        let mut output = value_lines(launched.as_ref());

        self.wait_for_exit(path).await;

        match self.get_device_logs(LogType::Application, RUN_LOG_ENTRIES).await {
            Ok(report) => output.extend(
                report
                    .logs
                    .into_iter()
                    .filter(|entry| entry.timestamp >= started_at)
                    .map(|entry| entry.message),
            ),
            Err(e) => debug!("No logs collected after run: {}", e),
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

    /// Whether the launched application is running; `None` if this platform cannot tell
    async fn process_running(&self, _path: &str) -> Result<Option<bool>> {
        Ok(None)
    }

    /// Block until the launched application exits or the run timeout passes
    async fn wait_for_exit(&self, path: &str) {
        let timing = self.core().timing().clone();
        let started = Instant::now();
        let poll = timing
            .process_poll_interval
            .max(std::time::Duration::from_millis(10));
        let mut seen_running = false;

        loop {
            match self.process_running(path).await {
                Ok(None) => return,
                Ok(Some(true)) => seen_running = true,
                Ok(Some(false)) if seen_running => {
                    info!("{} exited after {}s", path, started.elapsed().as_secs());
                    return;
                }
                Ok(Some(false)) => {
                    if started.elapsed() >= timing.process_start_grace {
                        info!("{} was never observed running; assuming it exited quickly", path);
                        return;
                    }
                }
                Err(e) => {
                    warn!("Could not poll {} for {}: {}", self.platform(), path, e);
                    return;
                }
            }

            if started.elapsed() >= timing.run_timeout {
                warn!(
                    "{} still running after {}s; collecting logs anyway",
                    path,
                    timing.run_timeout.as_secs()
                );
                return;
            }
            sleep(poll).await;
        }
    }

    async fn get_device_logs(&self, _log_type: LogType, _max_entries: usize) -> Result<LogReport> {
        Err(DeviceError::not_supported(self.platform().as_str(), "Reading device logs"))
    }

    /// Capture a screenshot to `path`; `Ok(None)` when the platform has no screenshot command
    async fn take_screenshot(&self, path: &Path) -> Result<Option<PathBuf>> {
        let target = path.to_string_lossy();
        Ok(self
            .invoke(actions::SCREENSHOT, &[target.as_ref()])
            .await?
            .map(|_| path.to_path_buf()))
    }

    async fn get_system_info(&self) -> Result<Value> {
        Err(DeviceError::not_supported(self.platform().as_str(), "Reading system info"))
    }

    async fn get_running_processes(&self) -> Result<Vec<String>> {
        Err(DeviceError::not_supported(self.platform().as_str(), "Listing processes"))
    }

    async fn copy_item(&self, _source: &Path, _destination: &str) -> Result<()> {
        Err(DeviceError::not_supported(self.platform().as_str(), "Copying files"))
    }

    /// Best-effort bundle of status, screenshot, logs, system info and processes
    async fn get_diagnostics(&self, output_dir: &Path) -> Result<DiagnosticsReport> {
        tokio::fs::create_dir_all(output_dir).await?;
        let timestamp = Local::now();
        let prefix = format!("{}_{}", self.platform(), timestamp.format("%Y%m%d-%H%M%S"));
        let file = |name: &str| output_dir.join(format!("{}_{}", prefix, name));
        let mut files = Vec::new();

        match self.get_status().await {
            Ok(status) => collect(&mut files, "status", write_json(file("status.json"), &status).await),
            Err(e) => skip("status", e),
        }

        match self.take_screenshot(&file("screenshot.png")).await {
            Ok(Some(path)) => files.push(path),
            Ok(None) => debug!("No screenshot available for {}", self.platform()),
            Err(e) => skip("screenshot", e),
        }

        match self.get_device_logs(LogType::All, DIAGNOSTIC_LOG_ENTRIES).await {
            Ok(logs) => collect(&mut files, "logs", write_json(file("logs.json"), &logs).await),
            Err(e) => skip("logs", e),
        }

        match self.get_system_info().await {
            Ok(info) => collect(&mut files, "system info", write_json(file("sysinfo.json"), &info).await),
            Err(e) => skip("system info", e),
        }

        match self.get_running_processes().await {
            Ok(procs) => collect(&mut files, "processes", write_json(file("processes.json"), &procs).await),
            Err(e) => skip("processes", e),
        }

        info!(
            "Collected {} diagnostic file(s) into {}",
            files.len(),
            output_dir.display()
        );
        Ok(DiagnosticsReport {
            platform: self.platform(),
            timestamp,
            files,
        })
    }
}

fn collect(files: &mut Vec<PathBuf>, item: &str, written: Result<PathBuf>) {
    match written {
        Ok(path) => files.push(path),
        Err(e) => skip(item, e),
    }
}

fn skip(item: &str, e: DeviceError) {
    warn!("Skipping diagnostics item '{}': {}", item, e);
}

async fn write_json<T: Serialize + ?Sized>(path: PathBuf, value: &T) -> Result<PathBuf> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Flatten command output into lines
pub(crate) fn value_lines(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.lines().map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(other) => vec![other.to_string()],
    }
}

/// Construct the in-tree provider for `platform`
pub fn create_provider(platform: Platform) -> Result<Box<dyn DeviceProvider>> {
    match platform {
        Platform::Mock => Ok(Box::new(MockProvider::new())),
        Platform::Windows | Platform::MacOs | Platform::Linux => {
            Ok(Box::new(NativeProvider::new(platform)?))
        }
        Platform::AndroidAdb => Ok(Box::new(AdbProvider::from_env()?)),
        Platform::Xbox
        | Platform::PlayStation5
        | Platform::Switch
        | Platform::AndroidSauceLabs
        | Platform::IosSauceLabs => Err(DeviceError::UnsupportedPlatform(format!(
            "{} (no adapter is built into this crate; supply one through a provider factory)",
            platform
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandDescriptor;
    use crate::exec::tests::{ScriptedRunner, Step};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Provider that relies entirely on the default trait methods
    struct TableProvider {
        core: ProviderCore,
    }

    impl DeviceProvider for TableProvider {
        fn core(&self) -> &ProviderCore {
            &self.core
        }
    }

    fn table_provider(
        table: CommandTable,
        steps: Vec<Step>,
    ) -> (TableProvider, Arc<ScriptedRunner>, tempfile::TempDir) {
        let sdk = tempdir().unwrap();
        std::fs::write(sdk.path().join("devtool"), b"").unwrap();
        let runner = ScriptedRunner::new(steps);
        let core = ProviderCore::new(Platform::Xbox, table, Some(sdk.path().to_path_buf()))
            .with_runner(runner.clone())
            .with_policy(
                ExecPolicy::new()
                    .with_poll_interval(Duration::from_millis(10))
                    .with_max_attempts(2),
            );
        (TableProvider { core }, runner, sdk)
    }

    #[test]
    fn test_platform_parse_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(Platform::parse(platform.as_str()), Some(platform));
        }
        assert_eq!(Platform::parse("ps5"), Some(Platform::PlayStation5));
        assert_eq!(Platform::parse("Amiga"), None);
    }

    #[test]
    fn test_cloud_platforms_skip_locking() {
        assert!(!Platform::AndroidSauceLabs.requires_lock());
        assert!(!Platform::IosSauceLabs.requires_lock());
        assert!(Platform::Xbox.requires_lock());
        assert!(Platform::Mock.requires_lock());
    }

    #[test]
    fn test_value_lines() {
        assert!(value_lines(None).is_empty());
        assert_eq!(
            value_lines(Some(&Value::String("a\nb".into()))),
            vec!["a", "b"]
        );
        assert_eq!(
            value_lines(Some(&serde_json::json!(["x", 1]))),
            vec!["x", "1"]
        );
    }

    #[test]
    fn test_unsupported_platforms_are_configuration_errors() {
        let err = create_provider(Platform::Switch).err().unwrap();
        assert!(matches!(err, DeviceError::UnsupportedPlatform(_)));
    }

    #[tokio::test]
    async fn test_connect_with_explicit_target_skips_detection() {
        let table = CommandTable::new()
            .with(actions::CONNECT, CommandDescriptor::new("devtool", ["connect", "{0}"]))
            .with(
                actions::GET_DEFAULT_TARGET,
                CommandDescriptor::new("devtool", ["default"]),
            );
        let (provider, runner, _sdk) = table_provider(table, vec![Step::Exit(0, "")]);

        provider.connect(Some("devkit-7")).await.unwrap();
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, vec!["connect", "devkit-7"]);
        assert_eq!(provider.core().target().as_deref(), Some("devkit-7"));
    }

    #[tokio::test]
    async fn test_connect_without_target_uses_detected_default() {
        let table = CommandTable::new()
            .with(actions::CONNECT, CommandDescriptor::new("devtool", ["connect", "{0}"]))
            .with(
                actions::GET_DEFAULT_TARGET,
                CommandDescriptor::new("devtool", ["default"]),
            );
        let (provider, runner, _sdk) =
            table_provider(table, vec![Step::Exit(0, "kit-a\n"), Step::Exit(0, "")]);

        provider.connect(None).await.unwrap();
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].args, vec!["connect", "kit-a"]);
    }

    #[tokio::test]
    async fn test_disconnect_swallows_failures() {
        let table = CommandTable::new().with(
            actions::DISCONNECT,
            CommandDescriptor::new("devtool", ["disconnect"]),
        );
        let (provider, runner, _sdk) = table_provider(table, vec![Step::Exit(1, "refused")]);
        provider.core().set_target(Some("kit".into()));

        provider.disconnect().await;
        assert_eq!(runner.call_count(), 1);
        assert!(provider.core().target().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_command_is_silent_no_op() {
        let (provider, runner, _sdk) = table_provider(CommandTable::new(), vec![]);
        provider.disconnect().await;
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_power_actions_do_not_change_target() {
        let table = CommandTable::new()
            .with(actions::POWER_ON, CommandDescriptor::new("devtool", ["on"]))
            .with_no_op(actions::POWER_OFF)
            .with(actions::RESET, CommandDescriptor::new("devtool", ["reboot"]));
        let (provider, runner, _sdk) = table_provider(table, vec![Step::Exit(0, "")]);
        provider.core().set_target(Some("kit".into()));

        provider.start_device().await.unwrap();
        provider.stop_device().await.unwrap();
        provider.restart_device().await.unwrap();
        assert_eq!(runner.call_count(), 2);
        assert_eq!(provider.core().target().as_deref(), Some("kit"));
    }

    #[tokio::test]
    async fn test_timed_out_launch_restarts_through_provider() {
        let table = CommandTable::new()
            .with(actions::LAUNCH, CommandDescriptor::new("devtool", ["launch", "{0}"]))
            .with(actions::RESET, CommandDescriptor::new("devtool", ["reboot"]));
        let (mut provider, runner, _sdk) =
            table_provider(table, vec![Step::Hang, Step::Exit(0, ""), Step::Exit(0, "started")]);
        provider.core = provider.core.with_policy(
            ExecPolicy::new()
                .with_timeout(actions::LAUNCH, Duration::from_millis(40))
                .with_poll_interval(Duration::from_millis(10))
                .with_max_attempts(2),
        );

        let result = provider
            .run_application("game.exe", &["--fast".to_string()])
            .await
            .unwrap();
        assert_eq!(result.output, vec!["started"]);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.arguments, vec!["--fast"]);

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].args, vec!["launch", "game.exe", "--fast"]);
        assert_eq!(calls[1].args, vec!["reboot"]);
        assert_eq!(calls[2].args, vec!["launch", "game.exe", "--fast"]);
    }

    #[tokio::test]
    async fn test_get_status_wraps_command_output() {
        let table = CommandTable::new().with(
            actions::GET_STATUS,
            CommandDescriptor::new("devtool", ["status"])
                .with_transform(|raw| Ok(serde_json::json!({ "name": raw.trim() }))),
        );
        let (provider, _runner, _sdk) = table_provider(table, vec![Step::Exit(0, "kit-9\n")]);

        let status = provider.get_status().await.unwrap();
        assert_eq!(status.platform, Platform::Xbox);
        assert_eq!(status.status, "Online");
        assert_eq!(status.status_data["name"], "kit-9");
        assert!(provider.test_connection().await);
    }

    #[tokio::test]
    async fn test_get_status_without_status_command_is_unknown() {
        let (provider, runner, _sdk) = table_provider(CommandTable::new(), vec![]);

        let status = provider.get_status().await.unwrap();
        assert_eq!(status.status, "Unknown");
        assert!(status.status_data.is_null());
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_diagnostics_skips_failed_items() {
        let table = CommandTable::new()
            .with(actions::GET_STATUS, CommandDescriptor::new("devtool", ["status"]))
            .with(
                actions::SCREENSHOT,
                CommandDescriptor::new("devtool", ["shot", "{0}"]),
            );
        let (provider, _runner, _sdk) =
            table_provider(table, vec![Step::Exit(0, "ok"), Step::Exit(1, "no display")]);
        let out = tempdir().unwrap();

        let report = provider.get_diagnostics(out.path()).await.unwrap();
        assert_eq!(report.files.len(), 1);
        assert!(report.files[0]
            .to_string_lossy()
            .ends_with("_status.json"));
    }
}
