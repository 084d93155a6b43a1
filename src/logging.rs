//! Tracing subscriber setup.
//!
//! Logs always go to stderr: with `stdio://` the protocol owns stdout.

use crate::config::LogFormat;
use crate::error::{Result, WakeservError};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(debug: bool) -> &'static str {
    if debug { "wakeserv=debug" } else { "wakeserv=info" }
}

/// Build the filter: `RUST_LOG` first, then the crate level.
pub fn env_filter(debug: bool) -> Result<EnvFilter> {
    let directive = default_directive(debug)
        .parse()
        .map_err(|e| WakeservError::Other(format!("Failed to parse tracing directive: {}", e)))?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Install the global subscriber. Calling it again is a no-op.
pub fn init(debug: bool, format: LogFormat) -> Result<()> {
    let filter = env_filter(debug)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().with_target(false).try_init(),
    }
    .is_ok();
    if !installed {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "wakeserv=info");
        assert_eq!(default_directive(true), "wakeserv=debug");
    }

    #[test]
    fn test_env_filter_builds() {
        assert!(env_filter(true).is_ok());
        assert!(env_filter(false).is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        assert!(init(false, LogFormat::Compact).is_ok());
        assert!(init(true, LogFormat::Full).is_ok());
    }
}
