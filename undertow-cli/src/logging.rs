//! Console tracing setup
//!
//! Logs go to stderr so they never interleave with the status frames on
//! stdout. The default level is `warn`; `RUST_LOG` overrides it.

use std::fmt;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
pub fn init_tracing(console_level: CliLogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::debug!(
        "Tracing initialized: console={}",
        console_level.as_tracing_level()
    );
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliLogLevel::Error => write!(f, "error"),
            CliLogLevel::Warn => write!(f, "warn"),
            CliLogLevel::Info => write!(f, "info"),
            CliLogLevel::Debug => write!(f, "debug"),
            CliLogLevel::Trace => write!(f, "trace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(CliLogLevel::from_str("WARN", true), Ok(CliLogLevel::Warn));
        assert_eq!(CliLogLevel::Debug.as_tracing_level(), Level::DEBUG);
        assert!(CliLogLevel::from_str("loud", true).is_err());
    }

    #[test]
    fn test_filter_directive_matches_flag_value() {
        for level in CliLogLevel::value_variants() {
            let flag = level.to_possible_value().unwrap();
            assert_eq!(flag.get_name(), level.to_string());
        }
    }
}
