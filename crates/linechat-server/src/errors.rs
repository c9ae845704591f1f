//! Error types for the relay.
//!
//! [`CommandError`] variants render as the exact line sent back to the
//! offending client; they never terminate a connection.

use thiserror::Error;

/// Fatal server-level failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Any other I/O failure on the listening socket.
    #[error("listener I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Presence registry conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another live session already holds the name.
    #[error("name `{0}` is already registered")]
    NameTaken(String),
    /// The session is not (or no longer) registered.
    #[error("session is not registered")]
    NotRegistered,
}

/// Protocol errors reported to the sending client only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// `rename|` with nothing after the separator.
    #[error("username cannot be empty!")]
    EmptyName,
    /// Requested name is held by another session.
    #[error("current username is already in use!")]
    NameTaken,
    /// `@...` line without a separator or with an empty target name.
    #[error("private message format is wrong! format:'@username|msg'")]
    PrivateFormat,
    /// Private message target is not online.
    #[error("username does not exist!")]
    UnknownUser,
    /// Private message with nothing after the separator.
    #[error("private message content cannot be empty!")]
    EmptyContent,
    /// Line exceeded the configured maximum and was discarded.
    #[error("line too long (max {max} bytes), discarded")]
    LineTooLong {
        /// Configured limit.
        max: usize,
    },
    /// Line was not valid UTF-8 and was discarded.
    #[error("line is not valid UTF-8, discarded")]
    InvalidUtf8,
    /// The session was torn down while the command ran.
    #[error("you are offline")]
    Offline,
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NameTaken(_) => Self::NameTaken,
            RegistryError::NotRegistered => Self::Offline,
        }
    }
}

/// Build a [`ServerError::Bind`] for `addr`.
pub(crate) fn bind_error(addr: &str, source: std::io::Error) -> ServerError {
    ServerError::Bind {
        addr: addr.to_string(),
        source,
    }
}
