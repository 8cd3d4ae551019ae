//! Logging configuration using tracing
//!
//! Events go to stderr so command output on stdout stays machine-readable.
//! The filter comes from `DEVICE_AGENT_LOG` when set, e.g.
//!
//! ```bash
//! DEVICE_AGENT_LOG=device_agent=debug devctl --platform Mock status
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding an `EnvFilter` directive
pub const LOG_ENV: &str = "DEVICE_AGENT_LOG";

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "device_agent=debug,info"
    } else {
        "device_agent=info,warn"
    }
}

/// Install the global subscriber. Calling it again is harmless.
pub fn init(verbose: bool) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_timer(fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string())),
        )
        .try_init();

    if installed.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        for verbose in [false, true] {
            assert!(default_directive(verbose).parse::<EnvFilter>().is_ok());
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
