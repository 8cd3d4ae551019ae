//! Timing configuration for locks, command supervision and target detection

use lazy_static::lazy_static;
use std::env;
use std::time::Duration;
use tokio::time::Instant;

/// Longest wait ever scheduled; larger timeouts are treated as this horizon
pub const MAX_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);

fn env_secs(name: &str, default: f64) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .and_then(|v| Duration::try_from_secs_f64(v).ok())
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}

/// `start + timeout` without overflowing; timeouts beyond [`MAX_WAIT`] are clamped
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout.min(MAX_WAIT))
        .or_else(|| start.checked_add(Duration::from_secs(86_400)))
        .unwrap_or(start)
}

/// Timing for exclusive device access
#[derive(Debug, Clone)]
pub struct LockTimingConfig {
    pub acquire_timeout: Duration,
    pub progress_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for LockTimingConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: env_secs("DEVICE_AGENT_LOCK_TIMEOUT", 1800.0),
            progress_interval: env_secs("DEVICE_AGENT_LOCK_PROGRESS_INTERVAL", 30.0),
            poll_interval: env_secs("DEVICE_AGENT_LOCK_POLL_INTERVAL", 0.25),
        }
    }
}

/// Timing for supervised command execution
#[derive(Debug, Clone)]
pub struct CommandTimingConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for CommandTimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: env_secs("DEVICE_AGENT_COMMAND_POLL_INTERVAL", 30.0),
            max_attempts: env::var("DEVICE_AGENT_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(3),
        }
    }
}

/// Timing for application runs and target detection
#[derive(Debug, Clone)]
pub struct DeviceTimingConfig {
    pub detect_timeout: Duration,
    pub run_timeout: Duration,
    pub process_start_grace: Duration,
    pub process_poll_interval: Duration,
}

impl Default for DeviceTimingConfig {
    fn default() -> Self {
        Self {
            detect_timeout: env_secs("DEVICE_AGENT_DETECT_TIMEOUT", 60.0),
            run_timeout: env_secs("DEVICE_AGENT_RUN_TIMEOUT", 3600.0),
            process_start_grace: env_secs("DEVICE_AGENT_PROCESS_START_GRACE", 10.0),
            process_poll_interval: env_secs("DEVICE_AGENT_PROCESS_POLL_INTERVAL", 2.0),
        }
    }
}

/// Master timing configuration
#[derive(Debug, Clone, Default)]
pub struct TimingConfig {
    pub lock: LockTimingConfig,
    pub command: CommandTimingConfig,
    pub device: DeviceTimingConfig,
}

lazy_static! {
    /// Global timing configuration instance
    pub static ref TIMING_CONFIG: TimingConfig = TimingConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_secs_falls_back_on_garbage() {
        env::set_var("DEVICE_AGENT_TEST_GARBAGE_SECS", "soon");
        assert_eq!(
            env_secs("DEVICE_AGENT_TEST_GARBAGE_SECS", 4.0),
            Duration::from_secs(4)
        );
        env::set_var("DEVICE_AGENT_TEST_GARBAGE_SECS", "-3");
        assert_eq!(
            env_secs("DEVICE_AGENT_TEST_GARBAGE_SECS", 4.0),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_env_secs_reads_fractions() {
        env::set_var("DEVICE_AGENT_TEST_FRACTION_SECS", "0.5");
        assert_eq!(
            env_secs("DEVICE_AGENT_TEST_FRACTION_SECS", 4.0),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_env_secs_falls_back_on_unrepresentable_values() {
        for value in ["1e30", "inf", "NaN"] {
            env::set_var("DEVICE_AGENT_TEST_HUGE_SECS", value);
            assert_eq!(
                env_secs("DEVICE_AGENT_TEST_HUGE_SECS", 4.0),
                Duration::from_secs(4),
                "value {value}"
            );
        }
    }

    #[test]
    fn test_deadline_after_clamps_huge_timeouts() {
        let start = Instant::now();
        assert_eq!(
            deadline_after(start, Duration::from_secs(5)),
            start + Duration::from_secs(5)
        );
        let far = deadline_after(start, Duration::from_secs(u64::MAX));
        assert!(far > start + Duration::from_secs(86_400));
        assert!(far <= start + MAX_WAIT);
    }

    #[test]
    fn test_max_attempts_is_at_least_one() {
        let config = TimingConfig::default();
        assert!(config.command.max_attempts >= 1);
    }
}
