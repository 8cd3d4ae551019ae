//! devctl - run and diagnose builds on a device from the command line
//!
//! Usage:
//!     devctl --platform <PLATFORM> [OPTIONS] <COMMAND>
//!
//! Every command opens a session, performs one operation, prints the result
//! as JSON on stdout and disconnects.
//!
//! Environment Variables:
//!     DEVICE_AGENT_PLATFORM: Platform to connect to (e.g. Mock, AndroidAdb, Linux)
//!     DEVICE_AGENT_TARGET: Target name or address
//!     DEVICE_AGENT_LOCK_DIR: Directory holding device lock files
//!     DEVICE_AGENT_LOG: tracing filter directive (e.g. device_agent=debug)

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use device_agent::{LockConfig, LogType, Platform, SessionManager, TIMING_CONFIG};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

/// Device automation: run, inspect and diagnose builds on a target device
#[derive(Parser, Debug)]
#[command(name = "devctl", version)]
#[command(after_help = r#"Examples:
    # Run a build on the mock device
    devctl --platform Mock run test.exe

    # Fetch the last 50 application log lines from an attached Android device
    devctl --platform AndroidAdb logs --type application --max 50

    # Collect a diagnostics bundle and power the device off afterwards
    devctl --platform AndroidAdb --power-off diagnostics ./diag

    # List known platform names
    devctl platforms
"#)]
struct Cli {
    /// Platform to connect to
    #[arg(short, long, env = "DEVICE_AGENT_PLATFORM", global = true)]
    platform: Option<String>,

    /// Target name or address (auto-detected when omitted)
    #[arg(short, long, env = "DEVICE_AGENT_TARGET", global = true)]
    target: Option<String>,

    /// Seconds to wait for exclusive access to the device
    #[arg(long, value_name = "SECS", global = true)]
    lock_timeout: Option<u64>,

    /// Directory holding device lock files
    #[arg(long, env = "DEVICE_AGENT_LOCK_DIR", global = true)]
    lock_dir: Option<PathBuf>,

    /// Power the device off when disconnecting
    #[arg(long, global = true)]
    power_off: bool,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch an application and wait for it to finish
    Run {
        /// Executable, package or component to launch
        path: String,
        /// Arguments passed to the application
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Show device status
    Status,
    /// Fetch device logs
    Logs {
        /// all, system, application or crash
        #[arg(long = "type", default_value = "all")]
        log_type: String,
        /// Maximum number of entries
        #[arg(long, default_value_t = 100)]
        max: usize,
    },
    /// Capture a screenshot
    Screenshot {
        /// Output PNG path
        path: PathBuf,
    },
    /// Collect a diagnostics bundle
    Diagnostics {
        /// Output directory
        output_dir: PathBuf,
    },
    /// Check that the device responds
    Test,
    /// Power control
    Power {
        #[command(subcommand)]
        action: PowerAction,
    },
    /// Copy a local file onto the device
    Copy {
        source: PathBuf,
        destination: String,
    },
    /// List known platform names
    Platforms,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum PowerAction {
    On,
    Off,
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    device_agent::logging::init(cli.verbose);

    if let Command::Platforms = cli.command {
        let platforms: Vec<_> = Platform::ALL
            .iter()
            .map(|p| json!({ "name": p.as_str(), "locked": p.requires_lock() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&platforms)?);
        return Ok(());
    }

    let platform = cli
        .platform
        .clone()
        .ok_or_else(|| anyhow!("--platform is required (or set DEVICE_AGENT_PLATFORM)"))?;

    let mut config = LockConfig::default();
    if let Some(dir) = &cli.lock_dir {
        config = config.with_dir(dir);
    }
    let lock_timeout = cli
        .lock_timeout
        .map(Duration::from_secs)
        .unwrap_or(TIMING_CONFIG.lock.acquire_timeout);

    let mut sessions = SessionManager::new(config);
    let info = sessions
        .connect(&platform, cli.target.as_deref(), lock_timeout)
        .await
        .with_context(|| format!("Failed to connect to {}", platform))?;
    tracing::info!("Connected: {}", info.identifier);

    let outcome = dispatch(&sessions, &cli.command).await;
    sessions.disconnect(cli.power_off).await;

    let value = outcome?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn dispatch(sessions: &SessionManager, command: &Command) -> Result<serde_json::Value> {
    let value = match command {
        Command::Run { path, args } => {
            serde_json::to_value(sessions.run_application(path, args).await?)?
        }
        Command::Status => serde_json::to_value(sessions.get_status().await?)?,
        Command::Logs { log_type, max } => {
            let log_type = LogType::parse(log_type)
                .ok_or_else(|| anyhow!("Unknown log type: {}", log_type))?;
            serde_json::to_value(sessions.get_logs(log_type, *max).await?)?
        }
        Command::Screenshot { path } => {
            json!({ "screenshot": sessions.take_screenshot(path).await? })
        }
        Command::Diagnostics { output_dir } => {
            serde_json::to_value(sessions.get_diagnostics(output_dir).await?)?
        }
        Command::Test => json!({ "connected": sessions.test_connection().await? }),
        Command::Power { action } => {
            match action {
                PowerAction::On => sessions.start_device().await?,
                PowerAction::Off => sessions.stop_device().await?,
                PowerAction::Reset => sessions.restart_device().await?,
            }
            json!({ "power": format!("{:?}", action).to_lowercase() })
        }
        Command::Copy {
            source,
            destination,
        } => {
            sessions.copy_item(source, destination).await?;
            json!({ "copied": source, "to": destination })
        }
        Command::Platforms => json!(null),
    };
    Ok(value)
}
