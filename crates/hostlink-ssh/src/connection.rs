//! SSH connections and multiplexed channels

use crate::SshError;
use async_trait::async_trait;
use bytes::Bytes;
use hostlink::{Channel, ChannelExit, Connection, ExecError, ProcessSignal, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One control-master connection to a host
pub struct SshConnection {
    base_args: Vec<String>,
    target: String,
    control_path: PathBuf,
    master: Mutex<Option<tokio::process::Child>>,
    closed: AtomicBool,
}

impl SshConnection {
    pub(crate) fn new(
        base_args: Vec<String>,
        target: String,
        control_path: PathBuf,
        master: tokio::process::Child,
    ) -> Self {
        Self {
            base_args,
            target,
            control_path,
            master: Mutex::new(Some(master)),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecError::Transport("connection closed".to_string()));
        }
        Ok(Box::new(SshChannel {
            base_args: self.base_args.clone(),
            target: self.target.clone(),
            exit_rx: StdMutex::new(None),
            kill: CancellationToken::new(),
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(target = %self.target, "closing SSH connection");
            let stopped = Command::new("ssh")
                .arg("-S")
                .arg(&self.control_path)
                .arg("-O")
                .arg("exit")
                .arg(&self.target)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .output()
                .await;
            if let Err(e) = stopped {
                warn!(target = %self.target, "control master exit request failed: {}", e);
            }
            if let Some(mut master) = self.master.lock().await.take() {
                let _ = master.start_kill();
                let _ = master.wait().await;
            }
            let _ = tokio::fs::remove_file(&self.control_path).await;
        }
        Ok(())
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        if let Some(mut master) = self.master.get_mut().take() {
            let _ = master.start_kill();
        }
    }
}

/// One multiplexed invocation over the control socket.
///
/// The local `ssh` child carries the remote process; its exit status is
/// the remote exit status, with 255 reserved by the client for its own
/// connection failures.
pub struct SshChannel {
    base_args: Vec<String>,
    target: String,
    exit_rx: StdMutex<Option<oneshot::Receiver<Result<ChannelExit>>>>,
    kill: CancellationToken,
}

#[async_trait]
impl Channel for SshChannel {
    async fn exec(&self, command_line: &str) -> Result<()> {
        let mut child = Command::new("ssh")
            .args(&self.base_args)
            .arg(&self.target)
            .arg("--")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SshError::Exec(e.to_string()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let kill = self.kill.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let out_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Some(mut stdout) = stdout {
                    let _ = stdout.read_to_end(&mut buf).await;
                }
                buf
            });
            let err_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Some(mut stderr) = stderr {
                    let _ = stderr.read_to_end(&mut buf).await;
                }
                buf
            });

            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill.cancelled() => None,
            };
            let status = match waited {
                Some(status) => status,
                None => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            let result = match status {
                Ok(status) => {
                    let exit_code = status.code().unwrap_or(-1);
                    let stderr = Bytes::from(err_task.await.unwrap_or_default());
                    if exit_code == 255 {
                        // ssh reserves 255 for its own failures
                        Err(ExecError::Transport(format!(
                            "ssh channel failed: {}",
                            String::from_utf8_lossy(&stderr).trim()
                        )))
                    } else {
                        Ok(ChannelExit {
                            exit_code,
                            stdout: Bytes::from(out_task.await.unwrap_or_default()),
                            stderr,
                        })
                    }
                }
                Err(e) => Err(ExecError::Transport(format!("wait failed: {e}"))),
            };
            let _ = tx.send(result);
        });

        *self.exit_rx.lock().expect("exit receiver poisoned") = Some(rx);
        Ok(())
    }

    async fn wait(&self) -> Result<ChannelExit> {
        let rx = self
            .exit_rx
            .lock()
            .expect("exit receiver poisoned")
            .take()
            .ok_or_else(|| ExecError::Transport("invocation not started".to_string()))?;
        rx.await
            .map_err(|_| ExecError::Transport("channel monitor dropped".to_string()))?
    }

    async fn signal(&self, signal: ProcessSignal) -> Result<()> {
        // OpenSSH does not forward signals to the remote process without a
        // PTY; killing the local child severs the channel and leaves the
        // remote side to notice the closed connection.
        debug!(?signal, "terminating ssh channel child");
        self.kill.cancel();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.kill.cancel();
        Ok(())
    }
}
