//! Stream-based WebSocket connection engine with permessage-deflate.
//!
//! scheelite picks up where the HTTP upgrade leaves off: hand it the
//! upgraded transport, the negotiated parameters and a [`Handler`], and it
//! speaks RFC 6455 framing and the RFC 7692 permessage-deflate extension,
//! including sliding-window context takeover and broadcast-safe compression.
//!
//! One thread per connection drives [`Conn::read_loop`]; writes may come
//! from any thread and are serialized internally. The handshake itself
//! (HTTP parsing, `Sec-WebSocket-Accept`, TLS) is deliberately out of
//! scope: any module that produces an [`Upgrade`] can sit in front.

#![deny(
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub mod error;
pub mod extensions;
pub mod protocol;

mod broadcast;
mod pool;
mod queue;
mod session;
mod stream;

pub use crate::{
    broadcast::Broadcaster,
    error::{Error, Result},
    extensions::deflate::PermessageDeflate,
    pool::BufferPool,
    protocol::{
        frame::coding::CloseCode, CloseFrame, Config, Conn, Handler, Message, Role, Upgrade,
        Utf8Bytes,
    },
    session::SessionStorage,
    stream::Transport,
};

pub use bytes::{Bytes, BytesMut};
