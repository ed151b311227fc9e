//! Execution systems: command dispatch over one shared connection

use crate::channel::Connection;
use crate::command::{Command, CommandBuilder, ProviderTag};
use crate::host::{HostContext, ViewKind};
use crate::process::RemoteProcess;
use crate::{CommandContext, ExecError, Result, SystemOptions};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tracing::{debug, info};
use uuid::Uuid;

type ProcessTable = Arc<Mutex<HashMap<Uuid, Option<RemoteProcess>>>>;

/// Owns zero or more open remote sessions over one connection and turns
/// commands into live remote invocations.
///
/// Many commands may execute concurrently; each gets its own multiplexed
/// channel. `close()` cancels every live future (best-effort remote
/// terminate, authoritative local channel close) and waits for each to
/// reach a terminal state before releasing the connection share.
pub struct ExecutionSystem {
    tag: ProviderTag,
    connection: Arc<dyn Connection>,
    options: SystemOptions,
    open: AtomicBool,
    processes: ProcessTable,
    host: OnceLock<Weak<HostContext>>,
}

impl ExecutionSystem {
    /// Construct the execution view on an already-established connection.
    ///
    /// This is the internal construction path, reachable only from the
    /// host context builder; external callers go through a provider's
    /// `new_execution_system`. The two paths being structurally distinct
    /// is what breaks the construction recursion. A probe channel is
    /// opened and closed so a connection that will not grant sessions is
    /// rejected here instead of at the first `execute`.
    pub(crate) async fn open_on(
        tag: ProviderTag,
        connection: Arc<dyn Connection>,
        options: SystemOptions,
    ) -> Result<Arc<Self>> {
        let probe = connection.open_channel().await?;
        probe.close().await?;

        debug!(%tag, "execution system opened");
        Ok(Arc::new(Self {
            tag,
            connection,
            options,
            open: AtomicBool::new(true),
            processes: Arc::new(Mutex::new(HashMap::new())),
            host: OnceLock::new(),
        }))
    }

    pub(crate) fn bind_host(&self, host: Weak<HostContext>) {
        let _ = self.host.set(host);
    }

    /// Provenance tag of the provider this system belongs to
    pub fn tag(&self) -> ProviderTag {
        self.tag
    }

    /// Whether the system still accepts commands
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Number of invocations currently in flight
    pub fn live_count(&self) -> usize {
        self.processes.lock().expect("process table poisoned").len()
    }

    /// Options this system was opened with
    pub fn options(&self) -> &SystemOptions {
        &self.options
    }

    /// Start building a command bound to this system
    pub fn command(self: Arc<Self>, program: impl Into<String>) -> CommandBuilder {
        CommandBuilder::new(self, program)
    }

    /// Execute a command under the given context.
    ///
    /// Fails with `SystemClosed` after `close()`, with `ChannelExhausted`
    /// when `channel_limit` invocations are already in flight (retryable),
    /// and with `IncompatibleProvider` for a command bound to a different
    /// system.
    pub async fn execute(
        &self,
        command: &Command,
        context: &CommandContext,
    ) -> Result<RemoteProcess> {
        if !command.is_bound_to(self) {
            return Err(ExecError::IncompatibleProvider {
                expected: self.tag.name().to_string(),
                actual: command.tag().name().to_string(),
            });
        }

        let id = Uuid::new_v4();

        // Reserve a slot before touching the transport so concurrent
        // execute calls cannot overshoot the channel limit.
        {
            let mut processes = self.processes.lock().expect("process table poisoned");
            if !self.is_open() {
                return Err(ExecError::SystemClosed);
            }
            if processes.len() >= self.options.channel_limit {
                return Err(ExecError::ChannelExhausted {
                    limit: self.options.channel_limit,
                });
            }
            processes.insert(id, None);
        }

        let channel = match self.connection.open_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                self.processes
                    .lock()
                    .expect("process table poisoned")
                    .remove(&id);
                return Err(e);
            }
        };

        let line = command.shell_line(context);
        debug!(%id, program = command.program(), "executing remote command");

        let table = Arc::clone(&self.processes);
        let process = RemoteProcess::spawn(
            id,
            channel,
            line,
            context.timeout,
            Box::new(move || {
                table.lock().expect("process table poisoned").remove(&id);
            }),
        );

        {
            let mut processes = self.processes.lock().expect("process table poisoned");
            if !self.is_open() {
                // A concurrent close() drained the table between the
                // reservation and here; this invocation must not outlive
                // the system.
                processes.remove(&id);
                drop(processes);
                process.cancel();
                return Err(ExecError::SystemClosed);
            }
            // The reservation is gone if the driver already reached a
            // terminal state and removed it; re-inserting would leak the
            // slot.
            if let Some(slot) = processes.get_mut(&id) {
                *slot = Some(process.clone());
            }
        }

        Ok(process)
    }

    /// Close the system.
    ///
    /// Cancels every live future and waits for each to reach a terminal
    /// state, then releases this system's share of the connection. The
    /// connection itself closes only when the paired filesystem view has
    /// also closed; a system without a host pairing owns its connection
    /// outright and closes it here.
    pub async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            let live: Vec<RemoteProcess> = {
                let mut processes = self.processes.lock().expect("process table poisoned");
                processes.drain().filter_map(|(_, p)| p).collect()
            };

            if !live.is_empty() {
                info!(count = live.len(), "cancelling in-flight invocations");
            }
            for process in &live {
                process.cancel();
            }
            for process in &live {
                process.await_terminal().await;
            }

            match self.host.get().and_then(Weak::upgrade) {
                Some(host) => host.view_closed(ViewKind::Execution).await?,
                None => self.connection.close().await?,
            }
            debug!(tag = %self.tag, "execution system closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for ExecutionSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSystem")
            .field("tag", &self.tag)
            .field("open", &self.is_open())
            .field("live", &self.live_count())
            .finish()
    }
}
