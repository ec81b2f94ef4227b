use crate::logger::{format::LoggerFormat, level::LoggerLevel};

/// How `dot` reports its own diagnostics.
///
/// Diagnostics always go to stderr so they never interleave with job output on stdout.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: LoggerLevel,
    /// Print event targets (`dot.core.runner`, ...) in text output.
    pub with_targets: bool,
    pub use_color: bool,
    /// `SYSLOG_IDENTIFIER` used by the journald format.
    pub syslog_identifier: String,
}

impl LoggerConfig {
    pub fn with_format(mut self, format: LoggerFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LoggerLevel) -> Self {
        self.level = level;
        self
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: LoggerLevel::default(),
            with_targets: false,
            use_color: atty::is(atty::Stream::Stderr),
            syslog_identifier: "dot".to_string(),
        }
    }
}
