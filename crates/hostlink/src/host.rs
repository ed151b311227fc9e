//! Host contexts and the process-wide sharing registry

use crate::channel::{ChannelProvider, Connection};
use crate::command::ProviderTag;
use crate::fs::FileSystemView;
use crate::request::{ExecRequest, IdentityKey};
use crate::system::ExecutionSystem;
use crate::{ExecError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OnceCell};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Which half of a host pairing is reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ViewKind {
    FileSystem,
    Execution,
}

struct ViewFlags {
    fs_open: bool,
    exec_open: bool,
    torn_down: bool,
}

/// The unit of connection sharing: one transport connection paired with a
/// filesystem view and an execution view for one host identity.
///
/// Both views co-own the connection; it closes when the last of the two
/// releases its share. Closing one view never interrupts the other.
pub struct HostContext {
    key: IdentityKey,
    connection: Arc<dyn Connection>,
    fs: Arc<FileSystemView>,
    exec: Arc<ExecutionSystem>,
    views: std::sync::Mutex<ViewFlags>,
    registry: Weak<HostRegistry>,
}

impl HostContext {
    /// Identity key this context is registered under
    pub fn identity(&self) -> &IdentityKey {
        &self.key
    }

    /// The filesystem half of the pairing
    pub fn filesystem(&self) -> &Arc<FileSystemView> {
        &self.fs
    }

    /// The execution half of the pairing
    pub fn execution(&self) -> &Arc<ExecutionSystem> {
        &self.exec
    }

    /// Close both views and tear the context down
    pub async fn close(&self) -> Result<()> {
        self.exec.close().await?;
        self.fs.close().await?;
        Ok(())
    }

    /// Called by a view when it releases its connection share. The last
    /// release deregisters the context and closes the connection.
    pub(crate) async fn view_closed(&self, view: ViewKind) -> Result<()> {
        let last = {
            let mut flags = self.views.lock().expect("view flags poisoned");
            match view {
                ViewKind::FileSystem => flags.fs_open = false,
                ViewKind::Execution => flags.exec_open = false,
            }
            let last = !flags.fs_open && !flags.exec_open && !flags.torn_down;
            if last {
                flags.torn_down = true;
            }
            last
        };

        if view == ViewKind::Execution {
            self.fs.notify_peer_closed();
        }

        if last {
            if let Some(registry) = self.registry.upgrade() {
                registry.deregister(&self.key, self).await;
            }
            debug!(key = %self.key, "last view closed, closing connection");
            self.connection.close().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext").field("key", &self.key).finish()
    }
}

/// Registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of host contexts currently registered
    pub open_hosts: usize,
}

/// Process-wide map from identity key to live host context.
///
/// Construction-or-fetch for one key is a single-flight critical section:
/// concurrent requesters for the same key await one in-flight build
/// instead of racing to open duplicate connections. Keys for different
/// hosts build concurrently.
pub struct HostRegistry {
    hosts: Mutex<HashMap<IdentityKey, Arc<OnceCell<Arc<HostContext>>>>>,
    me: Weak<HostRegistry>,
}

impl HostRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            hosts: Mutex::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// Return the live host context for the request's identity key,
    /// building it (filesystem view first, then execution view, full
    /// rollback on partial failure) if none is registered.
    pub async fn get_or_build(
        &self,
        provider: &dyn ChannelProvider,
        tag: ProviderTag,
        request: &ExecRequest,
    ) -> Result<Arc<HostContext>> {
        let key = request.identity();
        loop {
            let cell = {
                let mut hosts = self.hosts.lock().await;
                Arc::clone(hosts.entry(key.clone()).or_default())
            };

            let host = cell
                .get_or_try_init(|| self.build(provider, tag, request, &key))
                .await?;

            if host.execution().is_open() {
                return Ok(Arc::clone(host));
            }

            // The registered context's execution view has closed; drop the
            // stale entry and build a fresh pairing. The detached context
            // still closes its connection when its last view closes.
            debug!(key = %key, "dropping stale host context");
            let mut hosts = self.hosts.lock().await;
            if let Some(existing) = hosts.get(&key) {
                if Arc::ptr_eq(existing, &cell) {
                    hosts.remove(&key);
                }
            }
        }
    }

    /// Registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let hosts = self.hosts.lock().await;
        RegistryStats {
            open_hosts: hosts.values().filter(|cell| cell.get().is_some()).count(),
        }
    }

    pub(crate) async fn deregister(&self, key: &IdentityKey, host: &HostContext) {
        let mut hosts = self.hosts.lock().await;
        if let Some(cell) = hosts.get(key) {
            if let Some(existing) = cell.get() {
                if std::ptr::eq(Arc::as_ptr(existing), host) {
                    hosts.remove(key);
                    debug!(key = %key, "host context deregistered");
                }
            }
        }
    }

    async fn build(
        &self,
        provider: &dyn ChannelProvider,
        tag: ProviderTag,
        request: &ExecRequest,
        key: &IdentityKey,
    ) -> Result<Arc<HostContext>> {
        info!(key = %key, "building host context");

        let connect_timeout = request.options().connect_timeout;
        let connection = timeout(connect_timeout, provider.connect(request))
            .await
            .map_err(|_| ExecError::Timeout {
                duration: connect_timeout,
            })??;

        // Filesystem view first; the execution view assumes the
        // filesystem side is fully established before any execution-bound
        // session opens.
        let fs = match FileSystemView::open(Arc::clone(&connection)).await {
            Ok(fs) => fs,
            Err(e) => {
                warn!(key = %key, "filesystem view failed, rolling back: {}", e);
                let _ = connection.close().await;
                return Err(e);
            }
        };

        let exec = match ExecutionSystem::open_on(
            tag,
            Arc::clone(&connection),
            request.options().clone(),
        )
        .await
        {
            Ok(exec) => exec,
            Err(e) => {
                warn!(key = %key, "execution view failed, rolling back: {}", e);
                let _ = fs.close().await;
                let _ = connection.close().await;
                return Err(e);
            }
        };

        let host = Arc::new(HostContext {
            key: key.clone(),
            connection,
            fs: Arc::clone(&fs),
            exec: Arc::clone(&exec),
            views: std::sync::Mutex::new(ViewFlags {
                fs_open: true,
                exec_open: true,
                torn_down: false,
            }),
            registry: self.me.clone(),
        });
        fs.bind_host(Arc::downgrade(&host));
        exec.bind_host(Arc::downgrade(&host));

        info!(key = %key, "host context established");
        Ok(host)
    }
}
