//! device_agent: uniform lifecycle for game and app builds on heterogeneous devices
//!
//! This library provides:
//! - Cross-process exclusive access to a device (`lock`)
//! - Command tables and positional argument templates (`command`)
//! - Command execution with timeouts, device restart and retry (`exec`)
//! - The provider contract, target auto-detection and in-tree adapters (`provider`)
//! - The active session, pairing one provider with its device lock (`session`)
//!
//! # Example
//!
//! ```no_run
//! use device_agent::{LockConfig, LogType, SessionManager};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> device_agent::Result<()> {
//!     let mut sessions = SessionManager::new(LockConfig::default());
//!     sessions.connect("Mock", None, Duration::from_secs(60)).await?;
//!
//!     let run = sessions.run_application("test.exe", &[]).await?;
//!     println!("exit code: {:?}", run.exit_code);
//!
//!     let logs = sessions.get_logs(LogType::All, 10).await?;
//!     println!("{} log entries", logs.count);
//!
//!     sessions.disconnect(false).await;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod exec;
pub mod lock;
pub mod logging;
pub mod provider;
pub mod session;

pub use command::{BuiltCommand, CommandBuilder, CommandDescriptor, CommandTable, Invocation};
pub use config::{AbandonedLockPolicy, LockConfig, TimingConfig, TIMING_CONFIG};
pub use error::{DeviceError, Result};
pub use exec::{CommandRunner, ExecPolicy, Executor, ProcessRunner, RawOutput};
pub use lock::{resource_name, LockHandle, ResourceLock};
pub use provider::{
    create_provider, AdbProvider, DeviceProvider, DiagnosticsReport, LogEntry, LogReport, LogType,
    MockProvider, NativeProvider, Platform, ProviderCore, RunResult, StatusReport, Target,
    TargetManager,
};
pub use session::{ProviderFactory, SessionInfo, SessionManager};
