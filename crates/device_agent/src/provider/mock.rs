//! In-memory provider for tests and dry runs
//!
//! Nothing leaves the process: power state, launched applications and logs
//! are simulated. Individual operations can be made to fail with
//! [`MockProvider::failing`] to exercise error paths in callers.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local};
use image::{ImageBuffer, Rgb};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use super::{
    actions, DeviceProvider, LogEntry, LogReport, LogType, Platform, ProviderCore, RunResult,
    StatusReport,
};
use crate::command::CommandTable;
use crate::error::{DeviceError, Result};

const MOCK_NAME: &str = "MockDevice";
const SCREEN_WIDTH: u32 = 320;
const SCREEN_HEIGHT: u32 = 180;

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    powered: bool,
    last_run: Option<String>,
    runs: u32,
}

#[derive(Debug)]
pub struct MockProvider {
    core: ProviderCore,
    state: Mutex<MockState>,
    failures: HashSet<String>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        let table = [
            actions::CONNECT,
            actions::DISCONNECT,
            actions::POWER_ON,
            actions::POWER_OFF,
            actions::RESET,
            actions::GET_STATUS,
            actions::LAUNCH,
            actions::SCREENSHOT,
        ]
        .into_iter()
        .fold(CommandTable::new(), |table, action| table.with_no_op(action));

        Self {
            core: ProviderCore::new(Platform::Mock, table, None),
            state: Mutex::new(MockState {
                powered: true,
                ..Default::default()
            }),
            failures: HashSet::new(),
        }
    }

    /// Make `action` fail with a command error every time it is invoked
    pub fn failing(mut self, action: &str) -> Self {
        self.failures.insert(action.to_string());
        self
    }

    fn check(&self, action: &str) -> Result<()> {
        if self.failures.contains(action) {
            return Err(DeviceError::CommandFailed {
                action: action.to_string(),
                exit_code: Some(1),
                output: format!("simulated {} failure", action),
            });
        }
        Ok(())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeviceProvider for MockProvider {
    fn core(&self) -> &ProviderCore {
        &self.core
    }

    async fn connect(&self, target: Option<&str>) -> Result<()> {
        self.check(actions::CONNECT)?;
        self.state().connected = true;
        self.core.set_target(target.map(str::to_string));
        info!("Connected to mock device {}", target.unwrap_or(MOCK_NAME));
        Ok(())
    }

    async fn disconnect(&self) {
        self.state().connected = false;
        self.core.set_target(None);
    }

    async fn test_connection(&self) -> bool {
        self.check(actions::GET_STATUS).is_ok() && self.state().connected
    }

    async fn start_device(&self) -> Result<()> {
        self.check(actions::POWER_ON)?;
        self.state().powered = true;
        Ok(())
    }

    async fn stop_device(&self) -> Result<()> {
        self.check(actions::POWER_OFF)?;
        self.state().powered = false;
        Ok(())
    }

    async fn restart_device(&self) -> Result<()> {
        self.check(actions::RESET)?;
        let mut state = self.state();
        state.powered = true;
        state.last_run = None;
        Ok(())
    }

    async fn get_status(&self) -> Result<StatusReport> {
        self.check(actions::GET_STATUS)?;
        let data = {
            let state = self.state();
            json!({
                "name": MOCK_NAME,
                "target": self.core.target(),
                "connected": state.connected,
                "powered": state.powered,
                "lastRun": state.last_run,
                "runs": state.runs,
            })
        };
        Ok(StatusReport {
            platform: Platform::Mock,
            status: "Online".to_string(),
            status_data: data,
            timestamp: Local::now(),
        })
    }

    async fn run_application(&self, path: &str, args: &[String]) -> Result<RunResult> {
        self.check(actions::LAUNCH)?;
        let started_at = Local::now();
        {
            let mut state = self.state();
            state.last_run = Some(path.to_string());
            state.runs += 1;
        }

        let mut output = vec![format!("Launching {}", path)];
        if !args.is_empty() {
            output.push(format!("Arguments: {}", args.join(" ")));
        }
        output.push(format!("{} exited with code 0", path));

        Ok(RunResult {
            platform: Platform::Mock,
            path: path.to_string(),
            arguments: args.to_vec(),
            started_at,
            finished_at: Local::now(),
            output,
            exit_code: Some(0),
        })
    }

    async fn get_device_logs(&self, log_type: LogType, max_entries: usize) -> Result<LogReport> {
        self.check("logs")?;
        let last_run = self.state().last_run.clone();
        let count = i64::try_from(max_entries).unwrap_or(i64::MAX);
        let base = Local::now() - ChronoDuration::seconds(count);

        let logs = (0..max_entries)
            .map(|i| {
                let offset = i64::try_from(i).unwrap_or(i64::MAX);
                let message = match &last_run {
                    Some(app) => format!("[{}] {} log line {}", log_type.as_str(), app, i + 1),
                    None => format!("[{}] mock log line {}", log_type.as_str(), i + 1),
                };
                LogEntry {
                    timestamp: base + ChronoDuration::seconds(offset),
                    level: if i % 10 == 9 { "Warning" } else { "Info" }.to_string(),
                    message,
                }
            })
            .collect();

        Ok(LogReport::new(Platform::Mock, log_type, logs))
    }

    async fn take_screenshot(&self, path: &Path) -> Result<Option<PathBuf>> {
        self.check(actions::SCREENSHOT)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(SCREEN_WIDTH, SCREEN_HEIGHT, |x, y| {
                let r = u8::try_from(x * 255 / SCREEN_WIDTH).unwrap_or(u8::MAX);
                let g = u8::try_from(y * 255 / SCREEN_HEIGHT).unwrap_or(u8::MAX);
                Rgb([r, g, 96])
            });
        img.save_with_format(path, image::ImageFormat::Png)?;
        Ok(Some(path.to_path_buf()))
    }

    async fn get_system_info(&self) -> Result<Value> {
        self.check("sysinfo")?;
        Ok(json!({
            "name": MOCK_NAME,
            "os": "MockOS",
            "version": env!("CARGO_PKG_VERSION"),
            "memoryMb": 4096,
            "storageMb": 65536,
        }))
    }

    async fn get_running_processes(&self) -> Result<Vec<String>> {
        self.check("processes")?;
        let mut procs = vec!["mock-shell".to_string(), "mock-compositor".to_string()];
        if let Some(app) = self.state().last_run.clone() {
            procs.push(app);
        }
        Ok(procs)
    }

    async fn copy_item(&self, source: &Path, destination: &str) -> Result<()> {
        self.check("copy")?;
        let destination = Path::new(destination);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, destination).await?;
        Ok(())
    }
}
