//! `ChatServer`: TCP listener, accept loop and server-wide shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastHub;
use crate::config::ServerConfig;
use crate::errors::{ServerError, bind_error};
use crate::registry::PresenceRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::supervisor::{ConnectionContext, run_connection};

/// Pause after a failed `accept` so a persistent error (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The relay server, before it is bound.
pub struct ChatServer {
    config: ServerConfig,
    registry: Arc<PresenceRegistry>,
}

impl ChatServer {
    /// Create a server with an empty registry.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(PresenceRegistry::new()),
        }
    }

    /// Bind the listener and start accepting clients.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| bind_error(&addr, e))?;
        let local_addr = listener.local_addr()?;

        let coordinator = Arc::new(ShutdownCoordinator::new());
        let (hub, dispatcher) = BroadcastHub::new(self.registry.clone());
        let dispatcher_stop = CancellationToken::new();
        let dispatcher_task = tokio::spawn(dispatcher.run(dispatcher_stop.clone()));

        let ctx = ConnectionContext::new(
            self.registry.clone(),
            hub,
            &self.config,
            coordinator.token(),
        );
        let accept_task = tokio::spawn(accept_loop(listener, ctx, coordinator.clone()));

        info!(%local_addr, idle_timeout = ?self.config.idle_timeout, "chat server listening");
        Ok(ServerHandle {
            local_addr,
            registry: self.registry,
            coordinator,
            accept_task,
            dispatcher_stop,
            dispatcher_task,
            grace: self.config.shutdown_grace,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<PresenceRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    accept_task: JoinHandle<()>,
    dispatcher_stop: CancellationToken,
    dispatcher_task: JoinHandle<()>,
    grace: Duration,
}

impl ServerHandle {
    /// Address the listener actually bound (resolves port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared presence registry.
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    /// Number of connections still being served.
    pub fn active_connections(&self) -> usize {
        self.coordinator.active_tasks()
    }

    /// Stop accepting, notify and close every client, then stop fan-out.
    ///
    /// Connections get twice the per-session grace period to drain before
    /// the server gives up on them.
    pub async fn shutdown(self) {
        info!("chat server shutting down");
        let drained = self.coordinator.graceful_shutdown(self.grace.saturating_mul(2)).await;
        if let Err(e) = self.accept_task.await {
            warn!(error = %e, "accept loop ended abnormally");
        }
        self.dispatcher_stop.cancel();
        if let Err(e) = self.dispatcher_task.await {
            warn!(error = %e, "broadcast dispatcher ended abnormally");
        }
        info!(drained, "chat server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: ConnectionContext,
    coordinator: Arc<ShutdownCoordinator>,
) {
    let stop = coordinator.token();
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if coordinator.is_shutting_down() {
                        debug!(%peer, "dropping connection accepted during shutdown");
                        break;
                    }
                    debug!(%peer, "accepted connection");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    let _ = coordinator.spawn(run_connection(stream, peer.to_string(), ctx.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("accept loop stopped");
}
