use std::io;

use thiserror::Error;
use tracing_subscriber::filter::ParseError;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown log format {0:?}, expected text, json or journald")]
    InvalidFormat(String),
    /// Neither a bare level nor a valid `EnvFilter` directive.
    #[error("invalid log level {level:?}: {source}")]
    InvalidLogLevel {
        level: String,
        #[source]
        source: ParseError,
    },
    #[error("journald output needs Linux and the `journald` feature")]
    JournaldNotSupported,
    #[error("could not connect to journald: {0}")]
    Journald(#[source] io::Error),
    #[error("a global logger is already installed")]
    AlreadyInitialized,
    #[error("failed to initialize logger: {0}")]
    InitializationFailed(String),
}
