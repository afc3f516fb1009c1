//! Error types for the loopback RPC link.
//!
//! `WireError` covers line framing failures: size limits and malformed JSON.
//! `RpcError` covers call failures seen by clients of the link; the front
//! treats `RpcError::Shutdown` as fatal because a relay task cannot recover
//! mid-stream without a back. `ServiceError` is the error string a served
//! endpoint sends back in a response record.

use std::fmt;
use std::io;

/// Error string returned by the front when the back refers to a
/// `(tag, index)` pair with no live socket. Non-fatal by contract: the back
/// races against client disconnects and must tolerate it.
pub const BAD_INDEX_MSG: &str = "incorrect connection index";

/// Errors that can occur when parsing a wire record from the link.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A single line exceeds the configured maximum size.
    ///
    /// Checked before JSON parsing to prevent allocation of oversized values.
    #[error("message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge {
        /// The configured maximum line size in bytes.
        max_bytes: usize,
    },

    /// The line is not valid JSON or does not match the record shape.
    #[error("malformed message: {reason}")]
    Malformed {
        /// Human-readable description of the parse failure.
        reason: String,
    },
}

/// Errors surfaced to callers of [`RpcClient::call`](super::client::RpcClient::call).
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The link has shut down: the connection closed underneath an in-flight
    /// call, or a call was issued against an already-closed handle.
    #[error("rpc link is shut down")]
    Shutdown,

    /// An IO error on the link transport.
    #[error("rpc transport error: {0}")]
    Transport(#[from] io::Error),

    /// The serving endpoint returned an error string.
    #[error("{0}")]
    Remote(String),

    /// A record failed to encode or decode.
    #[error("rpc wire error: {0}")]
    Wire(#[from] WireError),
}

impl RpcError {
    /// True when the link itself has shut down (the fatal case on the
    /// front's relay path).
    pub fn is_shutdown(&self) -> bool {
        matches!(self, RpcError::Shutdown)
    }

    /// True when the remote end reported an unknown connection index.
    pub fn is_bad_index(&self) -> bool {
        matches!(self, RpcError::Remote(msg) if msg == BAD_INDEX_MSG)
    }

    /// True for the transport errors expected while the back exits before
    /// replying to `Shutdown`. Matched against error kinds rather than
    /// OS-specific message text.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            RpcError::Shutdown => true,
            RpcError::Transport(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Error returned by a served endpoint; carried as a string in the response
/// record.
#[derive(Debug)]
pub struct ServiceError {
    message: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        ServiceError {
            message: message.into(),
        }
    }

    /// The bad-index error (see [`BAD_INDEX_MSG`]).
    pub fn bad_index() -> Self {
        ServiceError::new(BAD_INDEX_MSG)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ServiceError {}

impl From<io::Error> for ServiceError {
    fn from(e: io::Error) -> Self {
        ServiceError::new(e.to_string())
    }
}
