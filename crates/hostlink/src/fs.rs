//! Filesystem view of a host pairing
//!
//! The remote filesystem layer itself is an external collaborator; this
//! type is its attachment point. It receives a handle to the shared
//! connection, holds the subsystem channel the filesystem layer drives,
//! and observes the notification fired when the execution view closes its
//! share.

use crate::channel::{Channel, Connection};
use crate::host::{HostContext, ViewKind};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Filesystem half of a host pairing, bound to the shared connection
pub struct FileSystemView {
    connection: Arc<dyn Connection>,
    channel: Mutex<Option<Box<dyn Channel>>>,
    open: AtomicBool,
    peer_closed: AtomicBool,
    host: OnceLock<Weak<HostContext>>,
}

impl FileSystemView {
    /// Open the view on an established connection, acquiring its
    /// subsystem channel. The channel must be granted before the view is
    /// exposed; a failure here is rolled back by the host context builder.
    pub(crate) async fn open(connection: Arc<dyn Connection>) -> Result<Arc<Self>> {
        let channel = connection.open_channel().await?;
        debug!("filesystem view opened");
        Ok(Arc::new(Self {
            connection,
            channel: Mutex::new(Some(channel)),
            open: AtomicBool::new(true),
            peer_closed: AtomicBool::new(false),
            host: OnceLock::new(),
        }))
    }

    pub(crate) fn bind_host(&self, host: Weak<HostContext>) {
        let _ = self.host.set(host);
    }

    pub(crate) fn notify_peer_closed(&self) {
        self.peer_closed.store(true, Ordering::Release);
    }

    /// Handle to the connection shared with the execution view
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Whether this view is still open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Whether the paired execution view has closed its connection share
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed.load(Ordering::Acquire)
    }

    /// Close the view and release its share of the connection.
    ///
    /// The connection itself closes only when the paired execution view
    /// has also closed.
    pub async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            if let Some(channel) = self.channel.lock().await.take() {
                if let Err(e) = channel.close().await {
                    warn!("error closing filesystem channel: {}", e);
                }
            }
            if let Some(host) = self.host.get().and_then(Weak::upgrade) {
                host.view_closed(ViewKind::FileSystem).await?;
            }
            debug!("filesystem view closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileSystemView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemView")
            .field("open", &self.is_open())
            .field("peer_closed", &self.is_peer_closed())
            .finish()
    }
}
