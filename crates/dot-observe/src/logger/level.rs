use std::{fmt, str::FromStr};

use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use crate::logger::error::LoggerError;

/// Prefix shared by every target the runner logs under (`dot.core.*`, `dot_cli::*`, ...).
const OWN_TARGETS: &str = "dot";

/// Validated log filter.
///
/// A bare level (`debug`) applies to the runner's own targets and keeps everything else
/// at `warn`; any other string must be a full `EnvFilter` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerLevel(String);

impl LoggerLevel {
    pub fn new(level: &str) -> Result<Self, LoggerError> {
        let level = level.trim();
        let directive = match level.parse::<LevelFilter>() {
            Ok(_) => format!("warn,{OWN_TARGETS}={}", level.to_ascii_lowercase()),
            Err(_) => level.to_string(),
        };
        EnvFilter::try_new(&directive).map_err(|source| LoggerError::InvalidLogLevel {
            level: level.to_string(),
            source,
        })?;
        Ok(Self(directive))
    }

    /// The full filter directive.
    pub fn directive(&self) -> &str {
        &self.0
    }

    pub(crate) fn filter(&self) -> EnvFilter {
        // Validated in `new`.
        EnvFilter::try_new(&self.0).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

impl Default for LoggerLevel {
    fn default() -> Self {
        Self(format!("warn,{OWN_TARGETS}=info"))
    }
}

impl FromStr for LoggerLevel {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for LoggerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_levels_are_scoped() {
        assert_eq!(LoggerLevel::new("debug").unwrap().directive(), "warn,dot=debug");
        assert_eq!(LoggerLevel::new(" INFO ").unwrap().directive(), "warn,dot=info");
        assert_eq!(LoggerLevel::default(), LoggerLevel::new("info").unwrap());
    }

    #[test]
    fn directives_pass_through() {
        let level: LoggerLevel = "bollard=trace,dot=info".parse().unwrap();
        assert_eq!(level.to_string(), "bollard=trace,dot=info");
    }

    #[test]
    fn invalid_level_is_rejected() {
        let err = LoggerLevel::new(" dot=loud ").unwrap_err();
        assert!(matches!(&err, LoggerError::InvalidLogLevel { level, .. } if level == "dot=loud"));
        assert!(err.to_string().starts_with("invalid log level \"dot=loud\": "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
