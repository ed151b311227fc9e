//! In-memory channel provider for unit tests, with observable
//! connection and channel counters.

use crate::channel::{Channel, ChannelExit, ChannelProvider, Connection, ProcessSignal};
use crate::{ExecError, ExecRequest, ExecutionProvider, ExecutionSystem, HostRegistry, OptionMap, ProviderTag, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Observable counters shared by a mock provider and its connections
#[derive(Default)]
pub(crate) struct MockStats {
    pub connects: AtomicUsize,
    pub open_connections: AtomicUsize,
    pub channels_opened: AtomicUsize,
    pub open_channels: AtomicUsize,
}

/// Scripted behavior for the next channel opened on a mock connection
#[derive(Debug, Clone, Copy)]
pub(crate) enum ChannelScript {
    /// Invocation runs for `delay`, then exits with the given result
    Exit {
        delay: Duration,
        exit_code: i32,
        stdout: &'static str,
        stderr: &'static str,
    },
    /// Invocation never finishes until the channel is closed
    Hang,
    /// `exec` itself fails
    FailExec(&'static str),
    /// `open_channel` fails
    FailOpen(&'static str),
}

impl ChannelScript {
    pub(crate) fn exit(exit_code: i32) -> Self {
        Self::Exit {
            delay: Duration::from_millis(0),
            exit_code,
            stdout: "",
            stderr: "",
        }
    }
}

pub(crate) struct MockChannelProvider {
    pub stats: Arc<MockStats>,
    scripts: Arc<Mutex<VecDeque<ChannelScript>>>,
    fail_connect: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
}

impl MockChannelProvider {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            stats: Arc::new(MockStats::default()),
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            fail_connect: AtomicBool::new(false),
            connect_delay: Mutex::new(None),
        })
    }

    /// Queue scripted behavior for upcoming channels, in open order
    pub(crate) fn script(&self, scripts: impl IntoIterator<Item = ChannelScript>) {
        self.scripts.lock().unwrap().extend(scripts);
    }

    pub(crate) fn fail_next_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub(crate) fn delay_connect(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ChannelProvider for MockChannelProvider {
    async fn connect(&self, _request: &ExecRequest) -> Result<Arc<dyn Connection>> {
        let connect_delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(ExecError::Transport("mock connect refused".to_string()));
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        self.stats.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            stats: Arc::clone(&self.stats),
            scripts: Arc::clone(&self.scripts),
            closed: AtomicBool::new(false),
        }))
    }
}

pub(crate) struct MockConnection {
    stats: Arc<MockStats>,
    scripts: Arc<Mutex<VecDeque<ChannelScript>>>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn open_channel(&self) -> Result<Box<dyn Channel>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecError::Transport("connection closed".to_string()));
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ChannelScript::exit(0));
        if let ChannelScript::FailOpen(message) = script {
            return Err(ExecError::Transport(message.to_string()));
        }
        self.stats.channels_opened.fetch_add(1, Ordering::SeqCst);
        self.stats.open_channels.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockChannel {
            stats: Arc::clone(&self.stats),
            script,
            exec_line: Mutex::new(None),
            signals: Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
            released: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub(crate) struct MockChannel {
    stats: Arc<MockStats>,
    script: ChannelScript,
    pub exec_line: Mutex<Option<String>>,
    pub signals: Mutex<Vec<ProcessSignal>>,
    closed: CancellationToken,
    released: AtomicBool,
}

#[async_trait]
impl Channel for MockChannel {
    async fn exec(&self, command_line: &str) -> Result<()> {
        *self.exec_line.lock().unwrap() = Some(command_line.to_string());
        match &self.script {
            ChannelScript::FailExec(message) => Err(ExecError::Transport(message.to_string())),
            _ => Ok(()),
        }
    }

    async fn wait(&self) -> Result<ChannelExit> {
        match &self.script {
            ChannelScript::Exit {
                delay,
                exit_code,
                stdout,
                stderr,
            } => {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => Ok(ChannelExit {
                        exit_code: *exit_code,
                        stdout: Bytes::from_static(stdout.as_bytes()),
                        stderr: Bytes::from_static(stderr.as_bytes()),
                    }),
                    _ = self.closed.cancelled() => {
                        Err(ExecError::Transport("channel closed".to_string()))
                    }
                }
            }
            _ => {
                self.closed.cancelled().await;
                Err(ExecError::Transport("channel closed".to_string()))
            }
        }
    }

    async fn signal(&self, signal: ProcessSignal) -> Result<()> {
        self.signals.lock().unwrap().push(signal);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        if !self.released.swap(true, Ordering::SeqCst) {
            self.stats.open_channels.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Full provider over the mock transport, for provider-level tests
pub(crate) struct MockExecutionProvider {
    scheme: &'static str,
    tag: ProviderTag,
    pub channels: Arc<MockChannelProvider>,
    pub hosts: Arc<HostRegistry>,
}

impl MockExecutionProvider {
    pub(crate) fn new(scheme: &'static str, tag: ProviderTag) -> Self {
        Self {
            scheme,
            tag,
            channels: MockChannelProvider::new(),
            hosts: HostRegistry::new(),
        }
    }
}

#[async_trait]
impl ExecutionProvider for MockExecutionProvider {
    fn scheme(&self) -> &str {
        self.scheme
    }

    fn provenance(&self) -> ProviderTag {
        self.tag
    }

    async fn new_execution_system(
        &self,
        uri: &str,
        options: &OptionMap,
    ) -> Result<Arc<ExecutionSystem>> {
        let request = ExecRequest::parse(uri, self.scheme, options)?;
        let host = self
            .hosts
            .get_or_build(self.channels.as_ref(), self.tag, &request)
            .await?;
        Ok(Arc::clone(host.execution()))
    }

    async fn get_execution_system(&self, uri: &str) -> Result<Arc<ExecutionSystem>> {
        ExecRequest::parse(uri, self.scheme, &OptionMap::new())?;
        Err(ExecError::NotFound(uri.to_string()))
    }
}

/// Open a bare execution system over the mock transport
pub(crate) async fn mock_system(
    provider: &MockChannelProvider,
    tag: ProviderTag,
) -> Arc<ExecutionSystem> {
    let request = ExecRequest::parse("mock://host.example.com", "mock", &OptionMap::new()).unwrap();
    // one probe channel is consumed by open_on
    let connection = provider.connect(&request).await.unwrap();
    ExecutionSystem::open_on(tag, connection, request.options().clone())
        .await
        .unwrap()
}
