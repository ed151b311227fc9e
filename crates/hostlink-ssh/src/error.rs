//! SSH-specific error types

use hostlink::ExecError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the SSH channel provider
#[derive(Debug, Error)]
pub enum SshError {
    /// SSH connection error
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// The control master did not come up or went away
    #[error("control master unavailable: {0}")]
    ControlMaster(String),

    /// A remote invocation could not be started
    #[error("failed to start remote invocation: {0}")]
    Exec(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout during connection establishment
    #[error("timed out after {duration:?}")]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },
}

impl From<SshError> for ExecError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::Connection(msg) => Self::Transport(msg),
            SshError::ControlMaster(msg) => Self::Transport(msg),
            SshError::Exec(msg) => Self::Transport(msg),
            SshError::Io(e) => Self::Io(e),
            SshError::Timeout { duration } => Self::Timeout { duration },
        }
    }
}
