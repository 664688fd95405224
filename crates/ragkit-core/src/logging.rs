//! Tracing initialization
//!
//! `RUST_LOG` wins over the configured level so operators can raise
//! verbosity without touching config files.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{RagkitError, Result};

/// Install the global tracing subscriber. Call once at startup.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.json_format {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| RagkitError::Config(format!("Failed to install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_fallible_not_panicking_when_called_twice() {
        let config = LoggingConfig::default();
        let first = init_tracing(&config);
        let second = init_tracing(&config);
        // Exactly one global subscriber can win; the second call must
        // report the conflict instead of panicking.
        assert!(first.is_ok() || second.is_err());
    }
}
