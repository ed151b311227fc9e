//! Local-process channel provider for end-to-end tests.
//!
//! Runs command lines through `sh -c` on the local machine, one child per
//! channel, so the full execute/wait/cancel path is exercised without a
//! network.

use async_trait::async_trait;
use bytes::Bytes;
use hostlink::{
    Channel, ChannelExit, ChannelProvider, Connection, ExecError, ExecRequest, ExecutionProvider,
    ExecutionSystem, HostRegistry, OptionMap, ProcessSignal, ProviderTag, Result,
};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub const LOCAL_SCHEME: &str = "local+exec";
pub const LOCAL_TAG: ProviderTag = ProviderTag::new("local");

#[derive(Default)]
pub struct LocalChannelProvider {
    pub connects: AtomicUsize,
}

#[async_trait]
impl ChannelProvider for LocalChannelProvider {
    async fn connect(&self, _request: &ExecRequest) -> Result<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LocalConnection))
    }
}

pub struct LocalConnection;

#[async_trait]
impl Connection for LocalConnection {
    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        Ok(Box::new(LocalChannel {
            exit_rx: Mutex::new(None),
            kill: CancellationToken::new(),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct LocalChannel {
    exit_rx: Mutex<Option<oneshot::Receiver<Result<ChannelExit>>>>,
    kill: CancellationToken,
}

#[async_trait]
impl Channel for LocalChannel {
    async fn exec(&self, command_line: &str) -> Result<()> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Transport(format!("failed to spawn shell: {e}")))?;

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
                Ok(status) => Ok(ChannelExit {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: Bytes::from(out_task.await.unwrap_or_default()),
                    stderr: Bytes::from(err_task.await.unwrap_or_default()),
                }),
                Err(e) => Err(ExecError::Transport(format!("wait failed: {e}"))),
            };
            let _ = tx.send(result);
        });

        *self.exit_rx.lock().unwrap() = Some(rx);
        Ok(())
    }

    async fn wait(&self) -> Result<ChannelExit> {
        let rx = self
            .exit_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ExecError::Transport("invocation not started".to_string()))?;
        rx.await
            .map_err(|_| ExecError::Transport("channel monitor dropped".to_string()))?
    }

    async fn signal(&self, _signal: ProcessSignal) -> Result<()> {
        self.kill.cancel();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.kill.cancel();
        Ok(())
    }
}

/// Execution provider over the local transport
pub struct LocalExecutionProvider {
    pub channels: Arc<LocalChannelProvider>,
    pub hosts: Arc<HostRegistry>,
}

impl LocalExecutionProvider {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(LocalChannelProvider::default()),
            hosts: HostRegistry::new(),
        }
    }
}

#[async_trait]
impl ExecutionProvider for LocalExecutionProvider {
    fn scheme(&self) -> &str {
        LOCAL_SCHEME
    }

    fn provenance(&self) -> ProviderTag {
        LOCAL_TAG
    }

    async fn new_execution_system(
        &self,
        uri: &str,
        options: &OptionMap,
    ) -> Result<Arc<ExecutionSystem>> {
        let request = ExecRequest::parse(uri, LOCAL_SCHEME, options)?;
        let host = self
            .hosts
            .get_or_build(self.channels.as_ref(), LOCAL_TAG, &request)
            .await?;
        Ok(Arc::clone(host.execution()))
    }

    async fn get_execution_system(&self, uri: &str) -> Result<Arc<ExecutionSystem>> {
        ExecRequest::parse(uri, LOCAL_SCHEME, &OptionMap::new())?;
        Err(ExecError::NotFound(uri.to_string()))
    }
}
