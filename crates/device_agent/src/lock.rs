//! Cross-process exclusive access to a named device resource
//!
//! Each resource maps to a lock file under [`LockConfig::dir`]. Ownership is an
//! exclusive advisory lock on that file, so the OS drops it when the holding
//! process dies. The holder also writes an ownership record into the file and a
//! clean [`ResourceLock::release`] truncates it; a record found at acquisition
//! time therefore means the previous holder never released.

use chrono::Local;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{deadline_after, AbandonedLockPolicy, LockConfig};
use crate::error::{DeviceError, Result};

/// Target name substituted when no explicit target is given
pub const DEFAULT_TARGET: &str = "Default";

/// Build the resource key `{Platform}-{Target|Default}`
pub fn resource_name(platform: &str, target: Option<&str>) -> String {
    let target = target
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TARGET);
    format!("{}-{}", platform, target)
}

/// A held resource lock. Dropping it without [`ResourceLock::release`] frees the
/// OS lock but leaves the ownership record behind, as a crash would.
#[derive(Debug)]
pub struct LockHandle {
    resource: String,
    path: PathBuf,
    file: Option<File>,
    abandoned: bool,
}

impl LockHandle {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Whether acquisition found the lock abandoned by a previous holder
    pub fn was_abandoned(&self) -> bool {
        self.abandoned
    }
}

/// Named, system-wide mutual exclusion over device resources
#[derive(Debug, Clone, Default)]
pub struct ResourceLock {
    config: LockConfig,
}

impl ResourceLock {
    pub fn new(config: LockConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Path of the lock file backing `resource`
    pub fn lock_path(&self, resource: &str) -> PathBuf {
        let sanitized: String = format!("{}-{}", self.config.namespace, resource)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.config.dir.join(format!("{}.lock", sanitized))
    }

    /// Acquire `resource`, waiting up to `timeout` while another holder owns it
    pub async fn acquire(&self, resource: &str, timeout: Duration) -> Result<LockHandle> {
        let path = self.lock_path(resource);
        let io_err = |source: io::Error| DeviceError::LockIo {
            resource: resource.to_string(),
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.config.dir).map_err(io_err)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        if !try_lock(&file).map_err(io_err)? {
            info!(
                "Resource '{}' is in use, waiting up to {}s",
                resource,
                timeout.as_secs()
            );
            // `file` is dropped with the error, closing the descriptor
            self.wait_for(&file, resource, timeout)
                .await
                .map_err(|e| match e {
                    WaitError::Io(source) => io_err(source),
                    WaitError::TimedOut => DeviceError::LockTimeout {
                        resource: resource.to_string(),
                        timeout,
                    },
                })?;
        }

        let previous = read_owner_record(&mut file).map_err(io_err)?;
        let abandoned = !previous.is_empty();
        if abandoned {
            match self.config.abandoned_policy {
                AbandonedLockPolicy::Proceed => warn!(
                    "Lock for '{}' was abandoned by a previous holder ({}); device state may be inconsistent",
                    resource, previous
                ),
                AbandonedLockPolicy::Fail => {
                    if let Err(e) = FileExt::unlock(&file) {
                        warn!("Failed to unlock '{}': {}", resource, e);
                    }
                    return Err(DeviceError::LockAbandoned {
                        resource: resource.to_string(),
                        previous_owner: previous,
                    });
                }
            }
        }

        write_owner_record(&mut file).map_err(io_err)?;
        debug!("Acquired lock '{}' at {}", resource, path.display());

        Ok(LockHandle {
            resource: resource.to_string(),
            path,
            file: Some(file),
            abandoned,
        })
    }

    async fn wait_for(
        &self,
        file: &File,
        resource: &str,
        timeout: Duration,
    ) -> std::result::Result<(), WaitError> {
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);
        let poll = self.config.poll_interval.max(Duration::from_millis(1));

        loop {
            let now = Instant::now();
            let remaining = deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                return Err(WaitError::TimedOut);
            }

            let slice_end = deadline_after(now, self.config.progress_interval.min(remaining));
            while Instant::now() < slice_end {
                sleep(poll.min(slice_end.saturating_duration_since(Instant::now()))).await;
                if try_lock(file).map_err(WaitError::Io)? {
                    info!(
                        "Acquired '{}' after waiting {:.1}s",
                        resource,
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(());
                }
            }

            let elapsed = started.elapsed();
            info!(
                "Still waiting for '{}': {}s elapsed, {}s remaining",
                resource,
                elapsed.as_secs(),
                timeout.saturating_sub(elapsed).as_secs()
            );
        }
    }

    /// Release a lock. Never fails; problems are logged and the handle is closed regardless.
    pub fn release(handle: Option<LockHandle>) {
        let Some(mut handle) = handle else {
            debug!("No lock handle to release");
            return;
        };

        let Some(mut file) = handle.file.take() else {
            warn!("Lock '{}' was already released", handle.resource);
            return;
        };

        if let Err(e) = clear_owner_record(&mut file) {
            warn!(
                "Failed to clear ownership record for '{}': {}",
                handle.resource, e
            );
        }
        if let Err(e) = FileExt::unlock(&file) {
            warn!("Failed to unlock '{}': {}", handle.resource, e);
        }
        drop(file);
        debug!("Released lock '{}'", handle.resource);
    }
}

enum WaitError {
    Io(io::Error),
    TimedOut,
}

fn try_lock(file: &File) -> io::Result<bool> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(true),
        Err(e) if is_contended(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn read_owner_record(file: &mut File) -> io::Result<String> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut contents)?;
    Ok(contents.trim().to_string())
}

fn write_owner_record(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(
        file,
        "pid={} acquired={}",
        std::process::id(),
        Local::now().to_rfc3339()
    )?;
    file.sync_data()
}

fn clear_owner_record(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.sync_data()
}
