//! Per-connection lifecycle, from accept through teardown.
//!
//! 1. Creates the session (named after the remote address) and its forwarder
//! 2. Registers it and announces `online!`
//! 3. Spawns the read task, which feeds complete lines to the dispatcher
//! 4. Races read activity against the idle timer and server shutdown
//! 5. Tears down: unregister, announce `offline!`, close, flush
//!
//! Every exit route goes through the same teardown, so a session never
//! lingers in the registry after its connection is gone.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::broadcast::BroadcastHub;
use crate::config::ServerConfig;
use crate::errors::CommandError;
use crate::protocol::ProtocolDispatcher;
use crate::registry::PresenceRegistry;
use crate::session::{Session, spawn_forwarder};

/// Sent to a client right before it is dropped for inactivity.
pub const IDLE_NOTICE: &str = "Inactive, forced offline!";

/// Sent to every client when the server stops.
pub const SHUTDOWN_NOTICE: &str = "server is shutting down";

const ONLINE: &str = "online!";
const OFFLINE: &str = "offline!";

const READ_CHUNK: usize = 4096;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client closed its side of the stream.
    ClientClosed,
    /// Reading from the client failed.
    ReadError,
    /// No inbound activity within the idle timeout.
    IdleTimeout,
    /// Server is shutting down.
    Shutdown,
    /// The default name (remote address) was already taken.
    NameConflict,
}

/// Shared handles and limits every connection needs.
#[derive(Clone)]
pub struct ConnectionContext {
    registry: Arc<PresenceRegistry>,
    hub: BroadcastHub,
    dispatcher: ProtocolDispatcher,
    idle_timeout: Duration,
    max_line_length: usize,
    shutdown_grace: Duration,
    shutdown: CancellationToken,
}

impl ConnectionContext {
    /// Bundle shared state with the per-connection limits from `config`.
    pub fn new(
        registry: Arc<PresenceRegistry>,
        hub: BroadcastHub,
        config: &ServerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher: ProtocolDispatcher::new(registry.clone(), hub.clone()),
            registry,
            hub,
            idle_timeout: config.idle_timeout,
            max_line_length: config.max_line_length,
            shutdown_grace: config.shutdown_grace,
            shutdown,
        }
    }
}

enum ReadOutcome {
    Eof,
    Failed(std::io::Error),
}

/// Serve one client until it leaves, idles out, or the server stops.
#[instrument(skip_all, fields(addr = %address, session_id = tracing::field::Empty))]
pub async fn run_connection<S>(stream: S, address: String, ctx: ConnectionContext) -> DisconnectReason
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (session, outbound) = Session::new(address);
    let _ = tracing::Span::current().record("session_id", tracing::field::display(session.id()));
    let (read_half, write_half) = tokio::io::split(stream);
    let forwarder = spawn_forwarder(write_half, outbound, session.id());

    if let Err(err) = ctx.registry.register(session.clone()) {
        info!(error = %err, "default name already taken, rejecting client");
        let _ = session.send(CommandError::NameTaken.to_string());
        finish(&session, forwarder, ctx.shutdown_grace).await;
        return DisconnectReason::NameConflict;
    }
    info!("client online");
    let _ = ctx.hub.publish(session.announce(ONLINE));

    let activity = Arc::new(Notify::new());
    let mut reader = tokio::spawn(read_lines(
        read_half,
        session.clone(),
        ctx.dispatcher.clone(),
        activity.clone(),
        ctx.max_line_length,
    ));

    let reason = loop {
        tokio::select! {
            outcome = &mut reader => {
                break match outcome {
                    Ok(ReadOutcome::Eof) => DisconnectReason::ClientClosed,
                    Ok(ReadOutcome::Failed(e)) => {
                        warn!(error = %e, "read from client failed");
                        DisconnectReason::ReadError
                    }
                    Err(e) => {
                        warn!(error = %e, "read task ended abnormally");
                        DisconnectReason::ReadError
                    }
                };
            }
            () = activity.notified() => {}
            () = tokio::time::sleep(ctx.idle_timeout) => {
                info!(idle_timeout = ?ctx.idle_timeout, "client idle, forcing offline");
                let _ = session.send(IDLE_NOTICE);
                break DisconnectReason::IdleTimeout;
            }
            () = ctx.shutdown.cancelled() => {
                let _ = session.send(SHUTDOWN_NOTICE);
                break DisconnectReason::Shutdown;
            }
        }
    };
    reader.abort();

    if ctx.registry.unregister(&session) {
        let _ = ctx.hub.publish(session.announce(OFFLINE));
    }
    finish(&session, forwarder, ctx.shutdown_grace).await;
    info!(?reason, connected_for = ?session.age(), "client offline");
    reason
}

/// Close the outbound queue and give the forwarder `grace` to flush it.
async fn finish(session: &Session, forwarder: JoinHandle<()>, grace: Duration) {
    let _ = session.close();
    let abort = forwarder.abort_handle();
    if tokio::time::timeout(grace, forwarder).await.is_err() {
        warn!("client did not drain its queue in time, dropping connection");
        abort.abort();
    }
}

/// Read task: accumulate bytes, split complete lines, dispatch each.
///
/// Every successful read counts as activity, whether or not it completed a
/// line.
async fn read_lines<R>(
    mut reader: R,
    session: Arc<Session>,
    dispatcher: ProtocolDispatcher,
    activity: Arc<Notify>,
    max_line_length: usize,
) -> ReadOutcome
where
    R: AsyncRead + Unpin,
{
    let mut codec = LinesCodec::new_with_max_length(max_line_length);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                let tail = codec.decode_eof(&mut buf);
                handle_decoded(tail, &session, &dispatcher, max_line_length);
                return ReadOutcome::Eof;
            }
            Ok(_) => loop {
                match codec.decode(&mut buf) {
                    Ok(None) => break,
                    decoded => handle_decoded(decoded, &session, &dispatcher, max_line_length),
                }
            },
            Err(e) => return ReadOutcome::Failed(e),
        }
        activity.notify_one();
    }
}

fn handle_decoded(
    decoded: Result<Option<String>, LinesCodecError>,
    session: &Arc<Session>,
    dispatcher: &ProtocolDispatcher,
    max_line_length: usize,
) {
    let err = match decoded {
        Ok(Some(line)) => {
            dispatcher.handle_line(session, &line);
            return;
        }
        Ok(None) => return,
        Err(LinesCodecError::MaxLineLengthExceeded) => CommandError::LineTooLong {
            max: max_line_length,
        },
        // The codec only fails with I/O errors on invalid UTF-8; the line
        // has already been consumed.
        Err(LinesCodecError::Io(_)) => CommandError::InvalidUtf8,
    };
    let _ = session.send(err.to_string());
}
