//! Error handling for the Vigil agent
//!
//! This module provides the error types for all agent operations:
//! measurement strategies, problem analysis, sample encoding, and
//! configuration loading. Nothing here is fatal to the hosting
//! process — scheduler loops catch and log every tick failure.

use std::io;

use thiserror::Error;

/// The main error type for the agent
#[derive(Error, Debug)]
pub enum AgentError {
    /// Measurement related errors
    #[error("Measurement error: {0}")]
    Measure(#[from] MeasureError),

    /// Problem analysis errors
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Sample wire codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Measurement strategy errors
#[derive(Error, Debug)]
pub enum MeasureError {
    /// The platform or capability is absent. Not a fault: callers
    /// surface this as a -1 / `None` sentinel.
    #[error("Measurement not supported on this host")]
    Unsupported,

    #[error("Counter source read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("Counter value could not be parsed: {reason}")]
    ParseFailed { reason: String },
}

/// Problem analysis errors
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Check '{check}' failed: {reason}")]
    CheckFailed { check: String, reason: String },

    #[error("Thread dump unavailable: {reason}")]
    ThreadDumpUnavailable { reason: String },
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },
}

/// Sample wire codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Truncated input: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: String },

    #[error("Invalid tag {tag} for {field}")]
    InvalidTag { field: String, tag: u8 },

    #[error("Length {len} exceeds limit for {field}")]
    LengthOverflow { field: String, len: u64 },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AgentError>;

/// A specialized result type for measurement operations
pub type MeasureResult<T> = std::result::Result<T, MeasureError>;

/// A specialized result type for analysis operations
pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// A specialized result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

impl AgentError {
    /// Check if this error is recoverable on the next tick
    pub fn is_recoverable(&self) -> bool {
        match self {
            AgentError::Measure(MeasureError::Unsupported) => false,
            AgentError::Measure(_) => true,
            AgentError::Analysis(_) => true,
            AgentError::Config(_) => false,
            AgentError::Codec(_) => false,
            AgentError::Io(io_error) => {
                matches!(io_error.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
            }
            AgentError::Generic(_) => true,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::Measure(_) => "measure",
            AgentError::Analysis(_) => "analysis",
            AgentError::Config(_) => "config",
            AgentError::Codec(_) => "codec",
            AgentError::Io(_) => "io",
            AgentError::Generic(_) => "generic",
        }
    }
}

impl From<String> for AgentError {
    fn from(msg: String) -> Self {
        AgentError::Generic(msg)
    }
}

impl From<&str> for AgentError {
    fn from(msg: &str) -> Self {
        AgentError::Generic(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let measure_error = AgentError::Measure(MeasureError::ReadFailed {
            reason: "counter file vanished".to_string(),
        });
        assert_eq!(measure_error.category(), "measure");
        assert!(measure_error.is_recoverable());

        let unsupported = AgentError::Measure(MeasureError::Unsupported);
        assert!(!unsupported.is_recoverable());

        let config_error = AgentError::Config(ConfigError::InvalidValue {
            field: "history.interval_ms".to_string(),
            value: "0".to_string(),
        });
        assert_eq!(config_error.category(), "config");
        assert!(!config_error.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let agent_error = AgentError::from("tick failed".to_string());
        assert!(matches!(agent_error, AgentError::Generic(_)));

        let agent_error = AgentError::from("tick failed");
        assert!(matches!(agent_error, AgentError::Generic(_)));
    }
}
