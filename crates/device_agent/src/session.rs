//! The active device session
//!
//! [`SessionManager`] owns at most one connected provider together with the
//! resource lock guarding its device. It is an ordinary value: the caller
//! creates it, threads it through its operations and drops it when done.
//!
//! Lifecycle:
//! - `connect` tears down any existing session, acquires the lock, then
//!   constructs and connects the provider. A failure after acquisition
//!   releases the lock before the error propagates.
//! - `disconnect` optionally powers off, disconnects, releases the lock and
//!   clears the session, each step running even if an earlier one failed.
//! - Dropping the manager releases a still-held lock.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LockConfig;
use crate::error::{DeviceError, Result};
use crate::lock::{resource_name, LockHandle, ResourceLock};
use crate::provider::{
    create_provider, DeviceProvider, DiagnosticsReport, LogReport, LogType, Platform, RunResult,
    StatusReport,
};

/// Constructs the provider for a platform
pub type ProviderFactory = Box<dyn Fn(Platform) -> Result<Box<dyn DeviceProvider>> + Send + Sync>;

/// Status keys tried, in order, for a human-readable session identifier
const IDENTIFIER_KEYS: &[&str] = &["name", "identifier", "deviceName", "target"];

/// Metadata describing the active session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub platform: Platform,
    pub target: Option<String>,
    pub connected_at: DateTime<Local>,
    pub identifier: String,
    pub is_connected: bool,
    pub status: Value,
    /// `None` for platforms that isolate sessions server-side
    pub resource_name: Option<String>,
}

struct Session {
    provider: Box<dyn DeviceProvider>,
    lock: Option<LockHandle>,
    info: SessionInfo,
}

pub struct SessionManager {
    lock: ResourceLock,
    factory: ProviderFactory,
    current: Option<Session>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("lock", &self.lock)
            .field("session", &self.session())
            .finish()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

impl SessionManager {
    /// Manager backed by the in-tree providers
    pub fn new(config: LockConfig) -> Self {
        Self::with_factory(config, Box::new(create_provider))
    }

    /// Manager that builds providers through `factory`
    pub fn with_factory(config: LockConfig, factory: ProviderFactory) -> Self {
        Self {
            lock: ResourceLock::new(config),
            factory,
            current: None,
        }
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.current.as_ref().map(|s| &s.info)
    }

    pub fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    /// Connect to `platform`, replacing any active session
    pub async fn connect(
        &mut self,
        platform: &str,
        target: Option<&str>,
        lock_timeout: Duration,
    ) -> Result<&SessionInfo> {
        if self.current.is_some() {
            info!("Closing the active session before connecting to {}", platform);
            self.disconnect(false).await;
        }

        let platform = Platform::parse(platform)
            .ok_or_else(|| DeviceError::UnsupportedPlatform(platform.to_string()))?;

        let (lock, resource) = if platform.requires_lock() {
            let resource = resource_name(platform.as_str(), target);
            let handle = self.lock.acquire(&resource, lock_timeout).await?;
            (Some(handle), Some(resource))
        } else {
            debug!("{} isolates sessions server-side; not locking", platform);
            (None, None)
        };

        let provider = match self.open(platform, target).await {
            Ok(provider) => provider,
            Err(e) => {
                ResourceLock::release(lock);
                return Err(e);
            }
        };

        let status = match provider.get_status().await {
            Ok(report) => report.status_data,
            Err(e) => {
                debug!("No status snapshot for {}: {}", platform, e);
                Value::Null
            }
        };
        let target = provider.core().target().or_else(|| target.map(str::to_string));
        let identifier = identifier(&status, target.as_deref(), platform);
        info!("Session open: {} ({})", platform, identifier);

        let session = self.current.insert(Session {
            provider,
            lock,
            info: SessionInfo {
                platform,
                target,
                connected_at: Local::now(),
                identifier,
                is_connected: true,
                status,
                resource_name: resource,
            },
        });
        Ok(&session.info)
    }

    async fn open(&self, platform: Platform, target: Option<&str>) -> Result<Box<dyn DeviceProvider>> {
        let provider = (self.factory)(platform)?;
        provider.connect(target).await?;
        Ok(provider)
    }

    /// Close the active session. Without one this only logs a warning.
    pub async fn disconnect(&mut self, power_off: bool) {
        let Some(session) = self.current.take() else {
            warn!("Disconnect requested with no active session");
            return;
        };

        if power_off {
            if let Err(e) = session.provider.stop_device().await {
                warn!("Power off of {} failed: {}", session.info.platform, e);
            }
        }
        session.provider.disconnect().await;
        ResourceLock::release(session.lock);
        info!("Session closed: {} ({})", session.info.platform, session.info.identifier);
    }

    fn provider(&self) -> Result<&dyn DeviceProvider> {
        self.current
            .as_ref()
            .map(|s| s.provider.as_ref())
            .ok_or(DeviceError::NoActiveSession)
    }

    pub async fn run_application(&self, path: &str, args: &[String]) -> Result<RunResult> {
        self.provider()?.run_application(path, args).await
    }

    pub async fn get_status(&self) -> Result<StatusReport> {
        self.provider()?.get_status().await
    }

    pub async fn get_logs(&self, log_type: LogType, max_entries: usize) -> Result<LogReport> {
        self.provider()?.get_device_logs(log_type, max_entries).await
    }

    pub async fn take_screenshot(&self, path: &Path) -> Result<Option<PathBuf>> {
        self.provider()?.take_screenshot(path).await
    }

    pub async fn get_diagnostics(&self, output_dir: &Path) -> Result<DiagnosticsReport> {
        self.provider()?.get_diagnostics(output_dir).await
    }

    pub async fn test_connection(&self) -> Result<bool> {
        Ok(self.provider()?.test_connection().await)
    }

    pub async fn start_device(&self) -> Result<()> {
        self.provider()?.start_device().await
    }

    pub async fn stop_device(&self) -> Result<()> {
        self.provider()?.stop_device().await
    }

    pub async fn restart_device(&self) -> Result<()> {
        self.provider()?.restart_device().await
    }

    pub async fn copy_item(&self, source: &Path, destination: &str) -> Result<()> {
        self.provider()?.copy_item(source, destination).await
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(session) = self.current.take() {
            warn!(
                "Session for {} dropped without disconnect; releasing its lock",
                session.info.platform
            );
            ResourceLock::release(session.lock);
        }
    }
}

fn identifier(status: &Value, target: Option<&str>, platform: Platform) -> String {
    IDENTIFIER_KEYS
        .iter()
        .filter_map(|key| status.get(*key))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| target.map(str::to_string))
        .unwrap_or_else(|| platform.to_string())
}
