//! Utilities to work with raw WebSocket frames.

pub mod coding;

#[allow(clippy::module_inception)]
mod frame;
mod mask;
mod utf8;

use self::coding::OpCode;
use super::Role;
use crate::error::{CapacityError, Error, ProtocolError, Result};
use log::*;
use std::io::{BufReader, Cursor, Read};

pub use self::frame::{CloseFrame, Frame, FrameHeader};
pub use self::utf8::Utf8Bytes;
pub(crate) use self::mask::apply_mask;

/// Reads WebSocket frames from a buffered transport.
///
/// Bytes the handshake layer consumed past the end of the HTTP upgrade are
/// handed over in `leftover` and drained before the transport is read again.
#[derive(Debug)]
pub(crate) struct FrameReader<T> {
    leftover: Cursor<Vec<u8>>,
    stream: BufReader<T>,
}

impl<T: Read> FrameReader<T> {
    pub(crate) fn new(stream: T, leftover: Vec<u8>, buffer_size: usize) -> Self {
        FrameReader {
            leftover: Cursor::new(leftover),
            stream: BufReader::with_capacity(buffer_size, stream),
        }
    }

    /// Read and validate one frame, blocking until it is complete.
    ///
    /// Structural validation lives here: reserved bits against the deflate
    /// negotiation, control-frame rules, masking direction by role, and the
    /// frame-level payload limit. Payloads arrive unmasked.
    pub(crate) fn read_frame(
        &mut self,
        role: Role,
        max_payload: usize,
        deflate_negotiated: bool,
    ) -> Result<Frame> {
        let (mut header, length) =
            FrameHeader::read(self).map_err(frame::header_read_error)?;

        if header.rsv2 || header.rsv3 {
            return Err(Error::Protocol(ProtocolError::NonZeroReservedBits));
        }
        if header.rsv1 {
            if !deflate_negotiated {
                return Err(Error::Protocol(ProtocolError::CompressionNotNegotiated));
            }
            if matches!(header.opcode, OpCode::Control(_)) {
                return Err(Error::Protocol(ProtocolError::NonZeroReservedBits));
            }
        }

        if let OpCode::Control(_) = header.opcode {
            if !header.is_final {
                return Err(Error::Protocol(ProtocolError::FragmentedControlFrame));
            }
            if length > 125 {
                return Err(Error::Protocol(ProtocolError::ControlFrameTooBig));
            }
        }

        match role {
            Role::Server if header.mask.is_none() => {
                return Err(Error::Protocol(ProtocolError::UnmaskedFrameFromClient));
            }
            Role::Client if header.mask.is_some() => {
                return Err(Error::Protocol(ProtocolError::MaskedFrameFromServer));
            }
            _ => (),
        }

        if length > max_payload as u64 {
            return Err(Error::Capacity(CapacityError::MessageTooLong {
                size: length as usize,
                max_size: max_payload,
            }));
        }

        let mut payload = vec![0u8; length as usize];
        self.read_exact(&mut payload)?;
        if let Some(mask) = header.mask.take() {
            apply_mask(&mut payload, mask);
        }

        let frame = Frame::from_payload(header, payload.into());
        trace!("received frame {frame}");
        Ok(frame)
    }
}

impl<T: Read> Read for FrameReader<T> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.leftover.position() < self.leftover.get_ref().len() as u64 {
            return self.leftover.read(buf);
        }
        self.stream.read(buf)
    }
}
