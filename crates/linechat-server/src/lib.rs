//! # linechat-server
//!
//! Line-oriented TCP chat relay.
//!
//! - Presence registry keyed by display name, with atomic rename
//! - Line-command protocol: `who`, `rename|<name>`, `@<name>|<msg>`, broadcast
//! - Single-queue broadcast fan-out to every online session
//! - Per-connection supervision: idle timeout, teardown, `online!`/`offline!`
//! - Graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod broadcast;
pub mod config;
pub mod errors;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod supervisor;

pub use config::ServerConfig;
pub use errors::{CommandError, RegistryError, ServerError};
pub use server::{ChatServer, ServerHandle};
pub use supervisor::{DisconnectReason, IDLE_NOTICE, SHUTDOWN_NOTICE};
