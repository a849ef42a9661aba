//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `RUNCTL_LOG` environment variable, in `EnvFilter` directive syntax
//!    (e.g. `info` or `runctl=debug`)
//! 3. default to `warn`
//!
//! Records go to stderr so stdout carries only command output.

use std::io;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Environment variable holding the fallback filter directives.
pub const LOG_ENV: &str = "RUNCTL_LOG";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum LoggingError {
    /// `RUNCTL_LOG` could not be parsed as filter directives.
    #[error("invalid RUNCTL_LOG value '{value}': {message}")]
    InvalidFilter {
        /// Raw environment value.
        value: String,
        /// Parser diagnostic.
        message: String,
    },
    /// A global subscriber was already installed.
    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Builds the filter for an optional explicit level and an optional
/// `RUNCTL_LOG` value.
///
/// # Errors
///
/// Returns [`LoggingError::InvalidFilter`] when `env_value` is not valid
/// directive syntax. An explicit level always wins, so the environment value
/// is not parsed in that case.
pub fn resolve_filter(
    level: Option<Level>,
    env_value: Option<&str>,
) -> Result<EnvFilter, LoggingError> {
    if let Some(explicit) = level {
        return Ok(EnvFilter::default().add_directive(LevelFilter::from_level(explicit).into()));
    }

    match env_value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(directives) => {
            EnvFilter::try_new(directives).map_err(|err| LoggingError::InvalidFilter {
                value: directives.to_owned(),
                message: err.to_string(),
            })
        }
        None => Ok(EnvFilter::default().add_directive(LevelFilter::WARN.into())),
    }
}

/// Initialise the global logging subscriber.
///
/// Call once at startup.
///
/// # Errors
///
/// Returns [`LoggingError`] when `RUNCTL_LOG` is malformed or a subscriber is
/// already installed.
pub fn init_logging(level: Option<Level>) -> Result<(), LoggingError> {
    let env_value = std::env::var(LOG_ENV).ok();
    let filter = resolve_filter(level, env_value.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|err| LoggingError::Init(err.to_string()))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some(Level::DEBUG), Some("error"), LevelFilter::DEBUG)]
    #[case(Some(Level::TRACE), None, LevelFilter::TRACE)]
    #[case(None, Some("info"), LevelFilter::INFO)]
    #[case(None, Some("  "), LevelFilter::WARN)]
    #[case(None, None, LevelFilter::WARN)]
    fn flag_then_env_then_default(
        #[case] level: Option<Level>,
        #[case] env_value: Option<&str>,
        #[case] expected: LevelFilter,
    ) {
        let filter = resolve_filter(level, env_value).expect("filter resolves");

        assert_eq!(filter.max_level_hint(), Some(expected));
    }

    #[rstest]
    fn malformed_env_value_is_reported() {
        let err = resolve_filter(None, Some("runctl=loudest")).expect_err("invalid level");

        let LoggingError::InvalidFilter { value, .. } = err else {
            panic!("expected InvalidFilter, got {err:?}");
        };
        assert_eq!(value, "runctl=loudest");
    }

    #[rstest]
    fn explicit_level_ignores_malformed_env_value() {
        assert!(resolve_filter(Some(Level::INFO), Some("runctl=loudest")).is_ok());
    }
}
