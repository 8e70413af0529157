use thiserror::Error;

/// Errors raised by the shared infrastructure
#[derive(Error, Debug)]
pub enum InfraError {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading a file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// The global subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for infrastructure operations
pub type Result<T> = std::result::Result<T, InfraError>;
