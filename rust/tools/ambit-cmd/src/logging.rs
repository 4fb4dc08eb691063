//! Log output for the command-line tool.
//!
//! The libraries log through the `log` facade; the subscriber installed here
//! bridges those records and writes them to stderr, so stdout stays reserved
//! for command output.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV_VAR: &str = "AMBIT_LOG";

const DEFAULT_FILTER: &str = "warn";

pub fn init(level: Option<&str>) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(level)?)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

fn filter(level: Option<&str>) -> Result<EnvFilter> {
    let directives = match level {
        Some(level) => level.to_string(),
        None => std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    };
    EnvFilter::try_new(&directives)
        .map_err(|e| anyhow::anyhow!("invalid log filter '{directives}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_is_parsed() {
        assert!(filter(Some("debug")).is_ok());
        assert!(filter(Some("ambit_executor=trace,warn")).is_ok());
    }

    #[test]
    fn test_invalid_level_is_reported() {
        let err = filter(Some("ambit_executor=loud")).unwrap_err();
        assert!(err.to_string().contains("invalid log filter"));
    }
}
