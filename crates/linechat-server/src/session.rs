//! Per-connection session state and its outbound forwarding task.

use std::sync::Arc;
use std::time::Instant;

use futures::SinkExt;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedWrite, LinesCodec};
use tracing::debug;
use uuid::Uuid;

/// Receiving end of a session's outbound queue.
pub type OutboundRx = mpsc::UnboundedReceiver<Arc<str>>;

/// One connected client.
///
/// The registry owns the canonical set of sessions; a session never refers
/// back to the server.
pub struct Session {
    id: Uuid,
    /// Remote endpoint, fixed for the session's lifetime.
    address: String,
    /// Display name. Only [`PresenceRegistry`](crate::registry::PresenceRegistry)
    /// changes it, while holding its lock.
    name: Mutex<String>,
    /// `None` once the session is closed.
    outbound: Mutex<Option<mpsc::UnboundedSender<Arc<str>>>>,
    connected_at: Instant,
}

impl Session {
    /// Create a session named after its remote address.
    pub fn new(address: impl Into<String>) -> (Arc<Self>, OutboundRx) {
        let address = address.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            id: Uuid::now_v7(),
            name: Mutex::new(address.clone()),
            address,
            outbound: Mutex::new(Some(tx)),
            connected_at: Instant::now(),
        };
        (Arc::new(session), rx)
    }

    /// Process-unique session ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote endpoint string.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current display name.
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.lock() = name;
    }

    /// `[address]name: text`, the public line format.
    pub fn announce(&self, text: &str) -> String {
        format!("[{}]{}: {}", self.address, self.name.lock(), text)
    }

    /// Queue a line for delivery. Never waits on the socket.
    ///
    /// Returns `false` if the session is closed or its forwarder is gone.
    pub fn send(&self, line: impl Into<Arc<str>>) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(line.into()).is_ok(),
            None => false,
        }
    }

    /// Close the outbound queue.
    ///
    /// Lines already queued are still flushed by the forwarder, which then
    /// shuts the connection's write side down. Returns `true` for the call
    /// that actually closed the session.
    pub fn close(&self) -> bool {
        self.outbound.lock().take().is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.outbound.lock().is_none()
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("name", &*self.name.lock())
            .finish_non_exhaustive()
    }
}

/// Spawn the task that drains `rx` onto `writer`, one `\n`-terminated line
/// per item.
///
/// Ends when the queue is closed (after flushing and shutting the writer
/// down) or when a write fails.
pub fn spawn_forwarder<W>(writer: W, mut rx: OutboundRx, session_id: Uuid) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, LinesCodec::new());
        while let Some(line) = rx.recv().await {
            if let Err(e) = sink.send(line).await {
                debug!(%session_id, error = %e, "write to client failed, forwarder stopping");
                return;
            }
        }
        if let Err(e) = SinkExt::<Arc<str>>::close(&mut sink).await {
            debug!(%session_id, error = %e, "failed to shut down client write side");
        }
    })
}
