//! Broadcast fan-out: one shared queue, one dispatch task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::PresenceRegistry;

/// Producer handle for the shared broadcast queue. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    tx: mpsc::UnboundedSender<Arc<str>>,
}

impl BroadcastHub {
    /// Create a hub and the dispatcher that consumes its queue.
    pub fn new(registry: Arc<PresenceRegistry>) -> (Self, BroadcastDispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, BroadcastDispatcher { rx, registry })
    }

    /// Enqueue an already formatted line for every online session.
    ///
    /// Returns `false` if the dispatcher has stopped.
    pub fn publish(&self, line: impl Into<Arc<str>>) -> bool {
        self.tx.send(line.into()).is_ok()
    }
}

/// Single consumer of the broadcast queue.
pub struct BroadcastDispatcher {
    rx: mpsc::UnboundedReceiver<Arc<str>>,
    registry: Arc<PresenceRegistry>,
}

impl BroadcastDispatcher {
    /// Deliver queued lines in FIFO order until cancelled or every
    /// [`BroadcastHub`] handle is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                line = self.rx.recv() => {
                    let Some(line) = line else { break };
                    let _ = fan_out(&self.registry, &line);
                }
                () = cancel.cancelled() => break,
            }
        }
        debug!("broadcast dispatcher stopped");
    }

    #[cfg(test)]
    pub(crate) fn queue_mut(&mut self) -> &mut mpsc::UnboundedReceiver<Arc<str>> {
        &mut self.rx
    }
}

/// Queue `line` on every registered session.
///
/// The registry lock is held for the whole pass so the recipient set is
/// fixed for one broadcast; each delivery is a non-blocking enqueue.
pub fn fan_out(registry: &PresenceRegistry, line: &Arc<str>) -> usize {
    let mut failed = 0usize;
    let recipients = registry.for_each(|session| {
        if !session.send(Arc::clone(line)) {
            failed += 1;
            warn!(session_id = %session.id(), "failed to queue broadcast for session");
        }
    });
    debug!(recipients, failed, "broadcast line");
    recipients - failed
}
