//! Error handling.

mod capacity_error;
mod deflate_error;
mod protocol_error;

pub use capacity_error::CapacityError;
pub use deflate_error::DeflateError;
pub use protocol_error::ProtocolError;

use crate::protocol::frame::coding::CloseCode;
use crate::protocol::frame::CloseFrame;
use std::{io, result, str, sync::Arc};
use thiserror::Error;

/// Result type of all scheelite library calls.
pub type Result<T, E = Error> = result::Result<T, E>;

/// Possible WebSocket errors.
///
/// The error is `Clone` so that the one-shot error stored on a connection can
/// both be handed to `on_close` and returned from any write attempted after
/// the connection terminated. I/O causes are shared through an `Arc` for the
/// same reason.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The connection terminated through the close handshake, carrying the
    /// close frame observed on the wire (or `None` for an empty Close).
    ///
    /// This is not an error as such: nothing went wrong, the peer or the
    /// local endpoint simply finished the conversation.
    #[error("connection closed{}", .0.as_ref().map(|f| format!(": {f}")).unwrap_or_default())]
    ConnectionClosed(Option<CloseFrame>),
    /// Trying to work with a connection that has already terminated without
    /// any close information having been recorded.
    #[error("trying to work with closed connection")]
    AlreadyClosed,
    /// Input-output error. Generally an error with the underlying transport;
    /// the connection is not usable afterwards.
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
    /// WebSocket protocol violation.
    #[error("WebSocket protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// A configured size limit was exceeded.
    #[error("space limit exceeded: {0}")]
    Capacity(#[from] CapacityError),
    /// The permessage-deflate layer failed.
    #[error("permessage-deflate error: {0}")]
    Deflate(#[from] DeflateError),
    /// Invalid UTF-8 in a text message or close reason.
    #[error("invalid UTF-8")]
    Utf8,
}

impl Error {
    /// The close code this error maps to.
    ///
    /// `Abnormal` (1006) marks conditions where the transport itself failed;
    /// it must never be written to the wire.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::ConnectionClosed(Some(frame)) => frame.code,
            Error::ConnectionClosed(None) | Error::AlreadyClosed => CloseCode::Normal,
            Error::Io(_) => CloseCode::Abnormal,
            Error::Protocol(_) => CloseCode::Protocol,
            Error::Capacity(_) => CloseCode::Size,
            Error::Deflate(_) => CloseCode::Error,
            Error::Utf8 => CloseCode::Invalid,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<str::Utf8Error> for Error {
    fn from(_: str::Utf8Error) -> Self {
        Error::Utf8
    }
}
