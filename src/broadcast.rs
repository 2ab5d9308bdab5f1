//! One payload, many peers.

use crate::error::{Error, Result};
use crate::extensions::deflate::{Deflater, MAX_WINDOW_BITS};
use crate::protocol::frame::coding::{Data, OpCode};
use crate::protocol::frame::Frame;
use crate::protocol::{Conn, Message, Role, Utf8Bytes};
use crate::stream::Transport;
use bytes::Bytes;
use flate2::Compression;
use std::sync::OnceLock;

/// Encodes a data message at most once per wire rendition, so every
/// recipient of a broadcast receives byte-identical frames.
///
/// Two renditions exist: plain, and compressed *without* a preset dictionary
/// (context takeover would make the bytes depend on per-peer history). The
/// compressed rendition uses the full 15-bit window; peers that negotiated a
/// smaller `server_max_window_bits` should not be mixed into a broadcast.
///
/// Fan-out is a server-side operation. On a client-role connection the
/// masking key makes frames unique per peer anyway, so [`Broadcaster::send`]
/// falls back to the ordinary write path there.
pub struct Broadcaster {
    opcode: Data,
    payload: Bytes,
    plain: OnceLock<Vec<u8>>,
    compressed: OnceLock<Result<Vec<u8>, Error>>,
}

impl Broadcaster {
    /// A broadcaster for a text message.
    pub fn text(payload: impl Into<Utf8Bytes>) -> Self {
        Self::from_parts(Data::Text, payload.into().into())
    }

    /// A broadcaster for a binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::from_parts(Data::Binary, payload.into())
    }

    fn from_parts(opcode: Data, payload: Bytes) -> Self {
        Broadcaster { opcode, payload, plain: OnceLock::new(), compressed: OnceLock::new() }
    }

    /// The payload being broadcast.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Send the message to one connection, reusing the cached wire bytes.
    pub fn send<T: Transport>(&self, conn: &Conn<T>) -> Result<()> {
        if conn.role() == Role::Client {
            return conn.send(self.message());
        }

        let pd = conn.permessage_deflate();
        if pd.enabled && self.payload.len() >= pd.threshold {
            let bytes = self
                .compressed
                .get_or_init(|| {
                    let mut deflater = Deflater::new(Compression::fast(), MAX_WINDOW_BITS);
                    let compressed = deflater.deflate(&self.payload, None)?;
                    Ok(self.encode(compressed, true))
                })
                .as_ref()
                .map_err(Error::clone)?;
            conn.write_preencoded(bytes, &self.payload, true)
        } else {
            let bytes =
                self.plain.get_or_init(|| self.encode(self.payload.clone(), false));
            conn.write_preencoded(bytes, &self.payload, false)
        }
    }

    fn encode(&self, payload: impl Into<Bytes>, rsv1: bool) -> Vec<u8> {
        let mut frame = Frame::message(payload, OpCode::Data(self.opcode), true);
        frame.header_mut().rsv1 = rsv1;
        let mut buf = Vec::with_capacity(frame.len());
        frame.format(&mut buf);
        buf
    }

    fn message(&self) -> Message {
        match self.opcode {
            // Only the text/binary constructors can build a broadcaster, and
            // `text` validated the payload.
            Data::Text => Message::Text(unsafe {
                Utf8Bytes::from_bytes_unchecked(self.payload.clone())
            }),
            _ => Message::Binary(self.payload.clone()),
        }
    }
}
