//! # Hostlink SSH
//!
//! SSH channel provider for hostlink, backed by the OpenSSH client.

#![warn(missing_docs)]

/// SSH client configuration
pub mod config;

/// OpenSSH subprocess transport
pub mod transport;

/// SSH connections and multiplexed channels
pub mod connection;

/// The SSH execution provider
pub mod provider;

/// SSH-specific error types
pub mod error;

pub use config::SshConfig;
pub use connection::{SshChannel, SshConnection};
pub use error::SshError;
pub use provider::{SshExecutionProvider, EXEC_SCHEME, SSH_TAG};
pub use transport::SshChannelProvider;
