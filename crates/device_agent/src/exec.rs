//! Command execution with supervision, timeout and restart-then-retry

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::{BuiltCommand, Invocation};
use crate::config::TIMING_CONFIG;
use crate::error::{DeviceError, Result};

/// Captured result of one process execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RawOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Runs a single invocation to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<RawOutput>;
}

/// Runs invocations as local child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<RawOutput> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            // An abandoned supervised task must not leave the tool running
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(RawOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Outcome of one supervised attempt
#[derive(Debug)]
pub enum Attempt {
    Completed(RawOutput),
    TimedOut(Duration),
}

/// Restart hook invoked between timed-out attempts
pub type RestartFn<'a> = dyn Fn() -> BoxFuture<'a, Result<()>> + Send + Sync + 'a;

/// Restart hook for callers with nothing to restart
pub fn no_restart() -> BoxFuture<'static, Result<()>> {
    Box::pin(async { Ok(()) })
}

/// Timeouts and retry budget for a provider's actions
#[derive(Debug, Clone)]
pub struct ExecPolicy {
    pub default_timeout: Option<Duration>,
    pub timeouts: HashMap<String, Duration>,
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            default_timeout: None,
            timeouts: HashMap::new(),
            max_attempts: TIMING_CONFIG.command.max_attempts,
            poll_interval: TIMING_CONFIG.command.poll_interval,
        }
    }
}

impl ExecPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_timeout(mut self, action: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(action.into(), timeout);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Per-action override first, then the default; zero means no timeout
    pub fn effective_timeout(&self, action: &str) -> Option<Duration> {
        self.timeouts
            .get(action)
            .copied()
            .or(self.default_timeout)
            .filter(|t| !t.is_zero())
    }
}

/// Clears the rebooting flag when the restart finishes, however it finishes
struct RebootGuard<'a>(&'a AtomicBool);

impl<'a> RebootGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RebootGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes built commands under a provider's [`ExecPolicy`]
pub struct Executor {
    runner: Arc<dyn CommandRunner>,
    policy: ExecPolicy,
    rebooting: AtomicBool,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("policy", &self.policy)
            .field("rebooting", &self.is_rebooting())
            .finish()
    }
}

impl Executor {
    pub fn new(runner: Arc<dyn CommandRunner>, policy: ExecPolicy) -> Self {
        Self {
            runner,
            policy,
            rebooting: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &ExecPolicy {
        &self.policy
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn is_rebooting(&self) -> bool {
        self.rebooting.load(Ordering::SeqCst)
    }

    /// Run `built` and post-process its output. `Ok(None)` for no-op commands.
    pub async fn invoke(
        &self,
        built: &BuiltCommand,
        restart: &RestartFn<'_>,
    ) -> Result<Option<Value>> {
        let Some(invocation) = &built.invocation else {
            return Ok(None);
        };
        let action = built.action.as_str();

        let raw = match self.policy.effective_timeout(action) {
            Some(timeout) if !self.is_rebooting() => {
                self.run_with_retry(action, invocation, timeout, restart)
                    .await?
            }
            _ => self.run_inline(action, invocation).await?,
        };

        post_process(built, raw).map(Some)
    }

    async fn run_inline(&self, action: &str, invocation: &Invocation) -> Result<String> {
        debug!("[{}] {}", action, invocation);
        let output = self
            .runner
            .run(invocation)
            .await
            .map_err(|source| spawn_error(action, invocation, source))?;
        check_exit(action, output)
    }

    async fn run_with_retry(
        &self,
        action: &str,
        invocation: &Invocation,
        timeout: Duration,
        restart: &RestartFn<'_>,
    ) -> Result<String> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut elapsed = Duration::ZERO;

        for attempt in 1..=max_attempts {
            debug!(
                "[{}] attempt {}/{} (timeout {}s): {}",
                action,
                attempt,
                max_attempts,
                timeout.as_secs(),
                invocation
            );

            match self.run_supervised(action, invocation, timeout).await? {
                Attempt::Completed(output) => return check_exit(action, output),
                Attempt::TimedOut(took) => {
                    elapsed = took;
                    if attempt < max_attempts {
                        warn!(
                            "[{}] timed out after {}s (attempt {}/{}); restarting device before retrying",
                            action,
                            took.as_secs(),
                            attempt,
                            max_attempts
                        );
                        let _guard = RebootGuard::set(&self.rebooting);
                        if let Err(e) = restart().await {
                            warn!("[{}] device restart failed: {}", action, e);
                        }
                    }
                }
            }
        }

        Err(DeviceError::CommandTimeout {
            action: action.to_string(),
            elapsed,
            attempts: max_attempts,
        })
    }

    /// One attempt on a background task, polled until it completes or `timeout` passes
    async fn run_supervised(
        &self,
        action: &str,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<Attempt> {
        let runner = Arc::clone(&self.runner);
        let owned = invocation.clone();
        let mut task = tokio::spawn(async move { runner.run(&owned).await });
        let started = Instant::now();
        let poll = self.policy.poll_interval.max(Duration::from_millis(1));

        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                task.abort();
                return Ok(Attempt::TimedOut(started.elapsed()));
            }

            match tokio::time::timeout(poll.min(remaining), &mut task).await {
                Ok(Ok(Ok(output))) => return Ok(Attempt::Completed(output)),
                Ok(Ok(Err(source))) => return Err(spawn_error(action, invocation, source)),
                Ok(Err(join_error)) => {
                    return Err(DeviceError::CommandFailed {
                        action: action.to_string(),
                        exit_code: None,
                        output: format!("supervised task failed: {}", join_error),
                    })
                }
                Err(_) => {
                    let elapsed = started.elapsed();
                    info!(
                        "[{}] still running: {}s elapsed, {}s remaining",
                        action,
                        elapsed.as_secs(),
                        timeout.saturating_sub(elapsed).as_secs()
                    );
                }
            }
        }
    }
}

fn spawn_error(action: &str, invocation: &Invocation, source: std::io::Error) -> DeviceError {
    DeviceError::Spawn {
        action: action.to_string(),
        program: invocation.program.display().to_string(),
        source,
    }
}

fn check_exit(action: &str, output: RawOutput) -> Result<String> {
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(DeviceError::CommandFailed {
            action: action.to_string(),
            exit_code: output.exit_code,
            output: output.combined(),
        })
    }
}

/// Apply the command's transform after execution, or wrap the raw text
fn post_process(built: &BuiltCommand, raw: String) -> Result<Value> {
    match &built.transform {
        None => Ok(Value::String(raw)),
        Some(transform) => transform(&raw).map_err(|message| DeviceError::Transform {
            action: built.action.clone(),
            raw,
            message,
        }),
    }
}
