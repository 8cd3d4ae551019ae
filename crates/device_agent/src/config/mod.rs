//! Configuration module for device_agent
//!
//! This module contains:
//! - `timing`: Timeouts and polling intervals for locks, commands and detection
//! - `LockConfig`: Where device locks live and how abandoned locks are treated

mod timing;

pub use timing::{
    deadline_after, CommandTimingConfig, DeviceTimingConfig, LockTimingConfig, TimingConfig,
    MAX_WAIT, TIMING_CONFIG,
};

use std::env;
use std::path::PathBuf;

/// Namespace prefix applied to every lock file name
pub const LOCK_NAMESPACE: &str = "DeviceAgent";

/// What to do when a lock is found abandoned by a holder that died
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbandonedLockPolicy {
    /// Take ownership and log a warning
    #[default]
    Proceed,
    /// Take ownership, then refuse with `DeviceError::LockAbandoned`
    Fail,
}

impl AbandonedLockPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "proceed" | "warn" => Some(Self::Proceed),
            "fail" | "error" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Configuration for the cross-process resource lock
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub dir: PathBuf,
    pub namespace: String,
    pub abandoned_policy: AbandonedLockPolicy,
    pub progress_interval: std::time::Duration,
    pub poll_interval: std::time::Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        let dir = env::var_os("DEVICE_AGENT_LOCK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("device-agent-locks"));
        let abandoned_policy = env::var("DEVICE_AGENT_ABANDONED_LOCK")
            .ok()
            .and_then(|v| AbandonedLockPolicy::parse(&v))
            .unwrap_or_default();

        Self {
            dir,
            namespace: LOCK_NAMESPACE.to_string(),
            abandoned_policy,
            progress_interval: TIMING_CONFIG.lock.progress_interval,
            poll_interval: TIMING_CONFIG.lock.poll_interval,
        }
    }
}

impl LockConfig {
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_abandoned_policy(mut self, policy: AbandonedLockPolicy) -> Self {
        self.abandoned_policy = policy;
        self
    }

    pub fn with_progress_interval(mut self, interval: std::time::Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abandoned_policy_parse() {
        assert_eq!(
            AbandonedLockPolicy::parse("Proceed"),
            Some(AbandonedLockPolicy::Proceed)
        );
        assert_eq!(
            AbandonedLockPolicy::parse(" fail "),
            Some(AbandonedLockPolicy::Fail)
        );
        assert_eq!(AbandonedLockPolicy::parse("maybe"), None);
    }

    #[test]
    fn test_lock_config_builder() {
        let config = LockConfig::default()
            .with_dir("/tmp/somewhere")
            .with_abandoned_policy(AbandonedLockPolicy::Fail);
        assert_eq!(config.dir, PathBuf::from("/tmp/somewhere"));
        assert_eq!(config.abandoned_policy, AbandonedLockPolicy::Fail);
        assert_eq!(config.namespace, LOCK_NAMESPACE);
    }
}
