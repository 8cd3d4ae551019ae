//! Desktop provider: the device is the machine this process runs on
//!
//! Applications run as local child processes with their output and exit
//! code captured. Power actions are no-ops; nobody wants the build host
//! rebooted by a test run.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{
    actions, value_lines, DeviceProvider, LogEntry, LogReport, LogType, Platform, ProviderCore,
    RunResult, StatusReport,
};
use crate::command::{resolve_tool, CommandDescriptor, CommandTable, Invocation};
use crate::error::{DeviceError, Result};

/// Action listing running process names, one per line
const LIST_PROCESSES: &str = "list-processes";

#[derive(Debug, Clone)]
struct LastRun {
    path: String,
    finished_at: DateTime<Local>,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

#[derive(Debug)]
pub struct NativeProvider {
    core: ProviderCore,
    last_run: Mutex<Option<LastRun>>,
}

/// Desktop platform matching the compilation target, if any
pub fn host_platform() -> Option<Platform> {
    if cfg!(target_os = "windows") {
        Some(Platform::Windows)
    } else if cfg!(target_os = "macos") {
        Some(Platform::MacOs)
    } else if cfg!(target_os = "linux") {
        Some(Platform::Linux)
    } else {
        None
    }
}

fn command_table(platform: Platform) -> CommandTable {
    let table = [
        actions::CONNECT,
        actions::DISCONNECT,
        actions::POWER_ON,
        actions::POWER_OFF,
        actions::RESET,
    ]
    .into_iter()
    .fold(CommandTable::new(), |table, action| table.with_no_op(action));

    match platform {
        Platform::Windows => table.with(
            LIST_PROCESSES,
            CommandDescriptor::new("tasklist", ["/fo", "csv", "/nh"]).with_transform(|raw| {
                let names: Vec<Value> = raw
                    .lines()
                    .filter_map(|line| line.split(',').next())
                    .map(|name| name.trim_matches('"').trim())
                    .filter(|name| !name.is_empty())
                    .map(|name| Value::String(name.to_string()))
                    .collect();
                Ok(Value::Array(names))
            }),
        ),
        Platform::MacOs => table
            .with(LIST_PROCESSES, CommandDescriptor::new("ps", ["-A", "-o", "comm="]))
            .with(
                actions::SCREENSHOT,
                CommandDescriptor::new("screencapture", ["-x", "{0}"]),
            ),
        _ => table
            .with(LIST_PROCESSES, CommandDescriptor::new("ps", ["-A", "-o", "comm="]))
            .with(
                actions::SCREENSHOT,
                CommandDescriptor::new("import", ["-window", "root", "{0}"]),
            ),
    }
}

impl NativeProvider {
    /// Fails with a configuration error unless `platform` is the host OS
    pub fn new(platform: Platform) -> Result<Self> {
        match host_platform() {
            Some(host) if host == platform => Ok(Self::for_platform(platform)),
            Some(host) => Err(DeviceError::config(format!(
                "{} provider cannot run on a {} host",
                platform, host
            ))),
            None => Err(DeviceError::config(format!(
                "{} provider is not available on this host",
                platform
            ))),
        }
    }

    fn for_platform(platform: Platform) -> Self {
        Self::with_core(ProviderCore::new(platform, command_table(platform), None))
    }

    pub fn with_core(core: ProviderCore) -> Self {
        Self {
            core,
            last_run: Mutex::new(None),
        }
    }

    fn last_run(&self) -> Option<LastRun> {
        self.last_run
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl DeviceProvider for NativeProvider {
    fn core(&self) -> &ProviderCore {
        &self.core
    }

    async fn get_status(&self) -> Result<StatusReport> {
        let last = self.last_run();
        Ok(StatusReport {
            platform: self.platform(),
            status: "Online".to_string(),
            status_data: json!({
                "name": hostname(),
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "lastRun": last.as_ref().map(|run| run.path.clone()),
            }),
            timestamp: Local::now(),
        })
    }

    async fn run_application(&self, path: &str, args: &[String]) -> Result<RunResult> {
        let program = resolve_tool(path, None)?;
        let invocation = Invocation {
            program,
            args: args.to_vec(),
        };
        let run_timeout = self.core.timing().run_timeout;
        let started_at = Local::now();
        info!("Running {}", invocation);

        let outcome = timeout(run_timeout, self.core.executor().runner().run(&invocation)).await;
        let (exit_code, stdout, stderr) = match outcome {
            Ok(Ok(raw)) => (raw.exit_code, raw.stdout, raw.stderr),
            Ok(Err(source)) => {
                return Err(DeviceError::Spawn {
                    action: actions::LAUNCH.to_string(),
                    program: invocation.program.display().to_string(),
                    source,
                })
            }
            Err(_) => {
                warn!(
                    "{} still running after {}s; killed",
                    path,
                    run_timeout.as_secs()
                );
                (
                    None,
                    String::new(),
                    format!("killed after {}s run timeout", run_timeout.as_secs()),
                )
            }
        };

        let stdout: Vec<String> = stdout.lines().map(str::to_string).collect();
        let stderr: Vec<String> = stderr.lines().map(str::to_string).collect();
        let finished_at = Local::now();
        let output = stdout.iter().chain(stderr.iter()).cloned().collect();

        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(LastRun {
            path: path.to_string(),
            finished_at,
            stdout,
            stderr,
        });

        Ok(RunResult {
            platform: self.platform(),
            path: path.to_string(),
            arguments: args.to_vec(),
            started_at,
            finished_at,
            output,
            exit_code,
        })
    }

    async fn get_device_logs(&self, log_type: LogType, max_entries: usize) -> Result<LogReport> {
        let mut logs: Vec<LogEntry> = match self.last_run() {
            None => Vec::new(),
            Some(run) => {
                let entry = |level: &str, message: String| LogEntry {
                    timestamp: run.finished_at,
                    level: level.to_string(),
                    message,
                };
                let stdout = run.stdout.iter().cloned().map(|m| entry("Info", m));
                let stderr = run.stderr.iter().cloned().map(|m| entry("Error", m));
                match log_type {
                    LogType::All | LogType::Application => stdout.chain(stderr).collect(),
                    LogType::Crash => stderr.collect(),
                    LogType::System => Vec::new(),
                }
            }
        };
        if logs.len() > max_entries {
            logs.drain(..logs.len() - max_entries);
        }
        Ok(LogReport::new(self.platform(), log_type, logs))
    }

    async fn get_system_info(&self) -> Result<Value> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Ok(json!({
            "hostname": hostname(),
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "cpus": cpus,
            "pid": std::process::id(),
        }))
    }

    async fn get_running_processes(&self) -> Result<Vec<String>> {
        let value = self.invoke(LIST_PROCESSES, &[]).await?;
        Ok(value_lines(value.as_ref())
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    async fn copy_item(&self, source: &Path, destination: &str) -> Result<()> {
        let destination = PathBuf::from(destination);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &destination).await?;
        info!("Copied {} to {}", source.display(), destination.display());
        Ok(())
    }
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceTimingConfig;
    use crate::exec::tests::{ScriptedRunner, Step};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn provider(steps: Vec<Step>) -> (NativeProvider, Arc<ScriptedRunner>) {
        let runner = ScriptedRunner::new(steps);
        let timing = DeviceTimingConfig {
            run_timeout: Duration::from_millis(50),
            ..crate::config::TIMING_CONFIG.device.clone()
        };
        let core = ProviderCore::new(Platform::Linux, command_table(Platform::Linux), None)
            .with_runner(runner.clone())
            .with_timing(timing);
        (NativeProvider::with_core(core), runner)
    }

    fn executable(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("game");
        std::fs::write(&path, b"").unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_wrong_host_is_configuration_error() {
        let other = match host_platform() {
            Some(Platform::Linux) => Platform::Windows,
            _ => Platform::Linux,
        };
        let err = NativeProvider::new(other).unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
    }

    #[tokio::test]
    async fn test_run_captures_output_and_feeds_logs() {
        let dir = tempdir().unwrap();
        let exe = executable(&dir);
        let (provider, runner) = provider(vec![Step::Exit(3, "line one\nline two\n")]);

        let result = provider
            .run_application(&exe, &["--level".to_string(), "2".to_string()])
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.output, vec!["line one", "line two"]);
        assert_eq!(runner.calls.lock().unwrap()[0].args, vec!["--level", "2"]);

        let logs = provider.get_device_logs(LogType::All, 1).await.unwrap();
        assert_eq!(logs.count, 1);
        assert_eq!(logs.logs[0].message, "line two");
    }

    #[tokio::test]
    async fn test_run_timeout_reports_no_exit_code() {
        let dir = tempdir().unwrap();
        let exe = executable(&dir);
        let (provider, _runner) = provider(vec![Step::Hang]);

        let result = provider.run_application(&exe, &[]).await.unwrap();
        assert_eq!(result.exit_code, None);
        assert!(result.output[0].contains("run timeout"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_fatal() {
        let (provider, runner) = provider(vec![]);
        let err = provider
            .run_application("/definitely/not/here/game", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::ToolNotFound { .. }));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_power_actions_leave_host_alone() {
        let (provider, runner) = provider(vec![]);
        provider.restart_device().await.unwrap();
        provider.stop_device().await.unwrap();
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_system_info_describes_host() {
        let (provider, _runner) = provider(vec![]);
        let info = provider.get_system_info().await.unwrap();
        assert_eq!(info["os"], std::env::consts::OS);
        assert!(info["cpus"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_hostname_comes_from_the_os() {
        let expected = hostname::get().unwrap().to_string_lossy().to_string();
        let (provider, _runner) = provider(vec![]);

        let info = provider.get_system_info().await.unwrap();
        assert_eq!(info["hostname"], expected.as_str());
        let status = provider.get_status().await.unwrap();
        assert_eq!(status.status_data["name"], expected.as_str());
    }
}
