//! Remote process futures and their state machine

use crate::channel::{Channel, ProcessSignal};
use crate::{ExecError, Result};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// State of one remote invocation.
///
/// `Pending` and `Running` are transient; the other four are terminal and
/// are never left once entered. A non-zero exit code is a normal
/// `Completed` outcome, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Channel opened, invocation not yet acknowledged by the remote side
    Pending,
    /// Remote process started
    Running,
    /// Remote process exited on its own
    Completed {
        /// Numeric exit code of the remote process
        exit_code: i32,
    },
    /// Channel or connection error; distinct from a non-zero exit code
    Failed {
        /// Description of the transport or I/O error
        error: String,
    },
    /// Cancelled on explicit request
    Cancelled,
    /// Cancelled because the wait timeout from the command context expired
    TimedOut,
}

impl ProcessState {
    /// Whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Captured result of a completed invocation
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code of the remote process
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: Bytes,
    /// Captured standard error
    pub stderr: Bytes,
}

impl ProcessOutput {
    /// Whether the process exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output as a UTF-8 string
    pub fn stdout_string(&self) -> Result<String> {
        String::from_utf8(self.stdout.to_vec())
            .map_err(|e| ExecError::Transport(format!("invalid UTF-8 in stdout: {e}")))
    }

    /// Standard error as a UTF-8 string
    pub fn stderr_string(&self) -> Result<String> {
        String::from_utf8(self.stderr.to_vec())
            .map_err(|e| ExecError::Transport(format!("invalid UTF-8 in stderr: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelReason {
    User,
    Timeout,
}

struct ProcessShared {
    cancel: CancellationToken,
    reason: Mutex<Option<CancelReason>>,
    output: Mutex<Option<ProcessOutput>>,
}

/// Cancellable, waitable handle to one remote invocation.
///
/// Cloneable; every clone observes the same state. The handle's lifetime
/// is independent from the command that spawned it: dropping all handles
/// does not stop the remote process, and the invocation keeps running
/// until it exits or is cancelled.
#[derive(Clone)]
pub struct RemoteProcess {
    id: Uuid,
    timeout: Option<Duration>,
    state_rx: watch::Receiver<ProcessState>,
    shared: Arc<ProcessShared>,
}

impl RemoteProcess {
    /// Spawn the driver task for one invocation and return its handle.
    ///
    /// The driver is the only writer of the state channel, so transitions
    /// are strictly ordered and a terminal state is never re-entered.
    /// `on_terminal` runs exactly once, after the terminal state has been
    /// published.
    pub(crate) fn spawn(
        id: Uuid,
        channel: Box<dyn Channel>,
        command_line: String,
        timeout: Option<Duration>,
        on_terminal: Box<dyn FnOnce() + Send>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ProcessState::Pending);
        let shared = Arc::new(ProcessShared {
            cancel: CancellationToken::new(),
            reason: Mutex::new(None),
            output: Mutex::new(None),
        });

        let driver_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            drive(id, channel, command_line, state_tx, driver_shared).await;
            on_terminal();
        });

        Self {
            id,
            timeout,
            state_rx,
            shared,
        }
    }

    /// Unique id of this invocation
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    pub fn state(&self) -> ProcessState {
        self.state_rx.borrow().clone()
    }

    /// Whether the invocation has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Request cancellation.
    ///
    /// Best-effort at the remote side: a termination signal is attempted
    /// before the channel is closed, but the remote process may not honor
    /// it. Authoritative locally: the future is guaranteed to reach
    /// `Cancelled` once the channel is closed. A no-op on a future that is
    /// already terminal.
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::User);
    }

    /// Wait for a terminal state, honoring the timeout from the command
    /// context this invocation was executed under.
    ///
    /// Timeout expiry takes the same path as explicit cancellation but
    /// resolves to `TimedOut`, distinguishable from `Cancelled`.
    pub async fn wait(&self) -> ProcessState {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.await_terminal()).await {
                Ok(state) => state,
                Err(_) => {
                    debug!(id = %self.id, ?limit, "wait timeout expired, cancelling");
                    self.cancel_with(CancelReason::Timeout);
                    self.await_terminal().await
                }
            },
            None => self.await_terminal().await,
        }
    }

    /// Captured output, available once the invocation completed
    pub fn output(&self) -> Option<ProcessOutput> {
        self.shared.output.lock().expect("output lock poisoned").clone()
    }

    fn cancel_with(&self, reason: CancelReason) {
        if self.is_terminal() {
            return;
        }
        {
            let mut guard = self.shared.reason.lock().expect("reason lock poisoned");
            if guard.is_none() {
                *guard = Some(reason);
            }
        }
        self.shared.cancel.cancel();
    }

    pub(crate) async fn await_terminal(&self) -> ProcessState {
        let mut rx = self.state_rx.clone();
        loop {
            {
                let state = rx.borrow_and_update().clone();
                if state.is_terminal() {
                    return state;
                }
            }
            if rx.changed().await.is_err() {
                let state = rx.borrow().clone();
                if state.is_terminal() {
                    return state;
                }
                warn!(id = %self.id, "process driver dropped before a terminal state");
                return ProcessState::Failed {
                    error: "process driver terminated unexpectedly".to_string(),
                };
            }
        }
    }
}

impl std::fmt::Debug for RemoteProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

async fn drive(
    id: Uuid,
    channel: Box<dyn Channel>,
    command_line: String,
    state_tx: watch::Sender<ProcessState>,
    shared: Arc<ProcessShared>,
) {
    let cancelled_state = |shared: &ProcessShared| {
        match *shared.reason.lock().expect("reason lock poisoned") {
            Some(CancelReason::Timeout) => ProcessState::TimedOut,
            _ => ProcessState::Cancelled,
        }
    };

    // Pending -> Running, unless cancelled while the invocation is still
    // being handed to the remote side.
    tokio::select! {
        started = channel.exec(&command_line) => {
            if let Err(e) = started {
                warn!(id = %id, "failed to start remote invocation: {}", e);
                let _ = channel.close().await;
                state_tx.send_replace(ProcessState::Failed { error: e.to_string() });
                return;
            }
            state_tx.send_replace(ProcessState::Running);
        }
        _ = shared.cancel.cancelled() => {
            debug!(id = %id, "cancelled before the invocation started");
            let _ = channel.close().await;
            state_tx.send_replace(cancelled_state(&shared));
            return;
        }
    }

    // Running -> terminal.
    tokio::select! {
        result = channel.wait() => {
            match result {
                Ok(exit) => {
                    debug!(id = %id, exit_code = exit.exit_code, "remote process exited");
                    *shared.output.lock().expect("output lock poisoned") = Some(ProcessOutput {
                        exit_code: exit.exit_code,
                        stdout: exit.stdout,
                        stderr: exit.stderr,
                    });
                    let _ = channel.close().await;
                    state_tx.send_replace(ProcessState::Completed { exit_code: exit.exit_code });
                }
                Err(e) => {
                    warn!(id = %id, "channel error while waiting for exit: {}", e);
                    let _ = channel.close().await;
                    state_tx.send_replace(ProcessState::Failed { error: e.to_string() });
                }
            }
        }
        _ = shared.cancel.cancelled() => {
            debug!(id = %id, "cancelling running invocation");
            if let Err(e) = channel.signal(ProcessSignal::Terminate).await {
                debug!(id = %id, "termination signal not delivered: {}", e);
            }
            let _ = channel.close().await;
            state_tx.send_replace(cancelled_state(&shared));
        }
    }
}
