use std::io;

use thiserror::Error;

/// Result type alias for redpipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to Redis.
///
/// Server `-ERR` replies to pipelined commands are usually *data*, returned
/// inline as [`Value::Error`](crate::Value::Error) so the rest of the batch
/// stays readable. The [`Error::Server`] variant is reserved for replies
/// where a fixed acknowledgement was required and the failure invalidates
/// the session state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The connection URL is malformed or uses an unknown scheme.
    #[error("config error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// Establishing a connection failed (resolve, connect, TLS handshake,
    /// AUTH or SELECT during the dial).
    #[error("connect error: {message}")]
    Connect {
        /// Description of the failure.
        message: String,
    },

    /// An IO error occurred on an established connection.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// An argument could not be coerced into a bulk string.
    #[error("encode error: {message}")]
    Encode {
        /// Description of the error.
        message: String,
    },

    /// The reply stream violated RESP framing.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The server returned an error where a fixed acknowledgement was
    /// required.
    #[error("server error: {message}")]
    Server {
        /// Error message from the server.
        message: String,
    },

    /// The API was used in an unsupported way (for example `EXEC` without
    /// `MULTI`, or queueing a command on a subscribed connection).
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the misuse.
        message: String,
    },

    /// The pool has been shut down; no further connections can be acquired.
    #[error("pool closed")]
    PoolClosed,
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn connect(message: impl Into<String>) -> Self {
        Error::Connect {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }
}
