//! Transport contract: connections and multiplexed channels
//!
//! The cryptographic transport is an external collaborator. The core only
//! requires the three operations below: open an authenticated connection
//! for resolved coordinates, open a multiplexed channel on it, and drive
//! one invocation per channel.

use crate::{ExecRequest, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Signal delivered to a remote process on cancellation, best-effort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Polite termination request
    Terminate,
    /// Forceful kill
    Kill,
}

/// Exit information for one finished remote invocation
#[derive(Debug, Clone)]
pub struct ChannelExit {
    /// Numeric exit code reported by the remote process
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: Bytes,
    /// Captured standard error
    pub stderr: Bytes,
}

/// Opens authenticated transport connections on demand
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Open an authenticated connection for the request's coordinates,
    /// bounded by the request's `connect_timeout`
    async fn connect(&self, request: &ExecRequest) -> Result<Arc<dyn Connection>>;
}

/// One authenticated transport connection, shared by many channels
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a new multiplexed channel on this connection
    async fn open_channel(&self) -> Result<Box<dyn Channel>>;

    /// Close the connection and everything multiplexed over it
    async fn close(&self) -> Result<()>;
}

/// A multiplexed logical stream carrying one remote invocation.
///
/// Methods take `&self`; implementations guard their process state
/// internally so the driver can race `wait` against cancellation.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Start the remote invocation described by an already-rendered shell
    /// line. Returns once the invocation has been handed to the remote
    /// side.
    async fn exec(&self, command_line: &str) -> Result<()>;

    /// Wait for the invocation to finish and collect its exit information.
    /// Consumed once per channel.
    async fn wait(&self) -> Result<ChannelExit>;

    /// Deliver a signal to the remote process, best-effort
    async fn signal(&self, signal: ProcessSignal) -> Result<()>;

    /// Close the channel locally, regardless of the remote process state
    async fn close(&self) -> Result<()>;
}
