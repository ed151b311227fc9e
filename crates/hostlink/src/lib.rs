//! # Hostlink
//!
//! URI-addressed remote command execution over shared, multiplexed
//! transport connections.
//!
//! A provider resolves a URI such as `ssh+exec://user@host:22` into an
//! [`ExecutionSystem`] backed by one shared connection per host identity.
//! Commands built against that system run remotely and are tracked as
//! cancellable [`RemoteProcess`] futures, many of them concurrently over
//! independent channels of the same connection.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Error types for the hostlink library
pub mod error;

/// System and per-execution configuration options
pub mod options;

/// Request descriptor: URI and option parsing
pub mod request;

/// Transport contract: connections and multiplexed channels
pub mod channel;

/// Immutable command descriptions
pub mod command;

/// Remote process futures
pub mod process;

/// Execution systems
pub mod system;

/// Filesystem view of a host pairing
pub mod fs;

/// Host contexts and the sharing registry
pub mod host;

/// Provider contract and registry
pub mod provider;

#[cfg(test)]
pub(crate) mod testutil;

pub use channel::{Channel, ChannelExit, ChannelProvider, Connection, ProcessSignal};
pub use command::{Command, CommandBuilder, ProviderTag};
pub use error::{ExecError, Result};
pub use fs::FileSystemView;
pub use host::{HostContext, HostRegistry, RegistryStats};
pub use options::{CommandContext, OptionMap, OutputRedirect, SystemOptions};
pub use process::{ProcessOutput, ProcessState, RemoteProcess};
pub use provider::{ExecutionProvider, ProviderRegistry};
pub use request::{ExecRequest, IdentityKey};
pub use system::ExecutionSystem;
