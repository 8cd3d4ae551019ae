//! Error types for device automation

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    // Configuration
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool '{tool}' not found (searched: {searched})")]
    ToolNotFound { tool: String, searched: String },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("{operation} is not supported on {platform}")]
    NotSupported { platform: String, operation: String },

    // Contention
    #[error("Timed out after {}s waiting for exclusive access to resource '{resource}'", timeout.as_secs())]
    LockTimeout { resource: String, timeout: Duration },

    #[error(
        "Lock for resource '{resource}' was abandoned by a previous holder ({previous_owner}); \
         check the device, then rerun with DEVICE_AGENT_ABANDONED_LOCK=proceed to take it over"
    )]
    LockAbandoned {
        resource: String,
        previous_owner: String,
    },

    #[error("Lock file error for resource '{resource}' at {}: {source}", path.display())]
    LockIo {
        resource: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Execution
    #[error("Action '{action}' timed out after {}s on each of {attempts} attempt(s)", elapsed.as_secs())]
    CommandTimeout {
        action: String,
        elapsed: Duration,
        attempts: u32,
    },

    #[error("Action '{action}' failed with exit code {exit_code:?}:\n{output}")]
    CommandFailed {
        action: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Failed to launch '{program}' for action '{action}': {source}")]
    Spawn {
        action: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Output transform for action '{action}' failed: {message}\nRaw output:\n{raw}")]
    Transform {
        action: String,
        raw: String,
        message: String,
    },

    #[error("Argument template {template:?} for action '{action}' is invalid: {message}")]
    Template {
        action: String,
        template: String,
        message: String,
    },

    // Target detection
    #[error("Found {count} {source_kind} targets; set a default target or pass one explicitly")]
    AmbiguousTargets { source_kind: String, count: usize },

    #[error("No targets found on the network; add a target manually with the platform's target manager")]
    NoTargetsFound,

    #[error("Target auto-detection did not settle within {}s", timeout.as_secs())]
    DetectionTimeout { timeout: Duration },

    // Session
    #[error("No active session; connect to a device first")]
    NoActiveSession,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl DeviceError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn not_supported(platform: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotSupported {
            platform: platform.into(),
            operation: operation.into(),
        }
    }

    /// True for errors produced by a command that exhausted its timeout budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. } | Self::LockTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
