//! Error types for the hostlink library

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for hostlink operations
#[derive(Debug, Error)]
pub enum ExecError {
    /// The URI or option map was rejected before any I/O was attempted
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Lookup of an execution system that is not open
    #[error("no open execution system for {0}")]
    NotFound(String),

    /// A command was submitted through a provider that did not create it
    #[error("command bound to provider '{actual}' is incompatible with provider '{expected}'")]
    IncompatibleProvider {
        /// Tag of the provider the call was routed through
        expected: String,
        /// Tag the command actually carries
        actual: String,
    },

    /// Use of an execution system after `close()`
    #[error("execution system is closed")]
    SystemClosed,

    /// The transport's concurrent-channel limit was reached; retryable
    #[error("concurrent channel limit reached ({limit})")]
    ChannelExhausted {
        /// Configured channel limit of the execution system
        limit: usize,
    },

    /// Transport or connection error
    #[error("transport error: {0}")]
    Transport(String),

    /// Timeout during connection establishment
    #[error("timed out after {duration:?}")]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ExecError {
    /// Whether retrying the same call can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChannelExhausted { .. })
    }
}

/// Result type alias for hostlink operations
pub type Result<T> = std::result::Result<T, ExecError>;
