use std::{
    fmt,
    io::{ErrorKind, Read},
};

use super::{
    coding::{CloseCode, Control, OpCode},
    mask::{apply_mask, generate_mask},
    Utf8Bytes,
};
use crate::error::{Error, ProtocolError, Result};
use bytes::{Bytes, BytesMut};

/// A struct representing the close command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CloseFrame {
    /// The reason as a code.
    pub code: CloseCode,
    /// The reason as text string.
    pub reason: Utf8Bytes,
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.code)
    }
}

/// A struct representing a WebSocket frame header.
#[allow(missing_copy_implementations)]
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    /// Indicates that the frame is the last one of a possibly fragmented message.
    pub is_final: bool,
    /// First reserved bit; carries the permessage-deflate compressed flag.
    pub rsv1: bool,
    /// Reserved for protocol extensions.
    pub rsv2: bool,
    /// Reserved for protocol extensions.
    pub rsv3: bool,
    /// WebSocket protocol opcode.
    pub opcode: OpCode,
    /// A frame mask, if any.
    pub mask: Option<[u8; 4]>,
}

impl Default for FrameHeader {
    fn default() -> Self {
        FrameHeader {
            is_final: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode: OpCode::Control(Control::Close),
            mask: None,
        }
    }
}

impl FrameHeader {
    /// Read a header from a stream, blocking until it is complete.
    ///
    /// The payload length is returned along with the header. Rejects
    /// reserved opcodes and extended lengths that are not minimally encoded.
    pub fn read(stream: &mut impl Read) -> Result<(Self, u64)> {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head)?;
        let (first, second) = (head[0], head[1]);

        let is_final = first & 0x80 != 0;
        let rsv1 = first & 0x40 != 0;
        let rsv2 = first & 0x20 != 0;
        let rsv3 = first & 0x10 != 0;
        let opcode = OpCode::from(first & 0x0F);

        if opcode.is_reserved() {
            return Err(Error::Protocol(ProtocolError::InvalidOpcode(first & 0x0F)));
        }

        let length = match second & 0x7F {
            126 => {
                let mut bytes = [0u8; 2];
                stream.read_exact(&mut bytes)?;
                let length = u64::from(u16::from_be_bytes(bytes));
                if length < 126 {
                    return Err(Error::Protocol(ProtocolError::NonMinimalLengthEncoding));
                }
                length
            }
            127 => {
                let mut bytes = [0u8; 8];
                stream.read_exact(&mut bytes)?;
                let length = u64::from_be_bytes(bytes);
                if length & (1u64 << 63) != 0 {
                    return Err(Error::Protocol(ProtocolError::InvalidPayloadLength));
                }
                if length < 65536 {
                    return Err(Error::Protocol(ProtocolError::NonMinimalLengthEncoding));
                }
                length
            }
            byte => u64::from(byte),
        };

        let mask = if second & 0x80 != 0 {
            let mut mask_bytes = [0u8; 4];
            stream.read_exact(&mut mask_bytes)?;
            Some(mask_bytes)
        } else {
            None
        };

        Ok((FrameHeader { is_final, rsv1, rsv2, rsv3, opcode, mask }, length))
    }

    /// Get the size of the header formatted with given payload length.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self, length: u64) -> usize {
        let extra = match length {
            0..=125 => 0,
            126..=65535 => 2,
            _ => 8,
        };
        2 + extra + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Format a header for the given payload size into `output`.
    pub fn format(&self, length: u64, output: &mut Vec<u8>) {
        let code: u8 = self.opcode.into();
        let one = code
            | if self.is_final { 0x80 } else { 0 }
            | if self.rsv1 { 0x40 } else { 0 }
            | if self.rsv2 { 0x20 } else { 0 }
            | if self.rsv3 { 0x10 } else { 0 };

        let masked = if self.mask.is_some() { 0x80 } else { 0 };
        match length {
            0..=125 => output.extend_from_slice(&[one, masked | length as u8]),
            126..=65535 => {
                output.extend_from_slice(&[one, masked | 126]);
                output.extend_from_slice(&(length as u16).to_be_bytes());
            }
            _ => {
                output.extend_from_slice(&[one, masked | 127]);
                output.extend_from_slice(&length.to_be_bytes());
            }
        }

        if let Some(ref mask) = self.mask {
            output.extend_from_slice(mask);
        }
    }

    /// Generate a random frame mask and store this in the header.
    ///
    /// Of course this does not change frame contents. It just generates a mask.
    pub(crate) fn set_random_mask(&mut self) {
        self.mask = Some(generate_mask());
    }
}

/// A struct representing a WebSocket frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    /// Get the length of the frame.
    /// This is the length of the header + the length of the payload.
    #[inline]
    pub fn len(&self) -> usize {
        let length = self.payload.len();
        self.header.len(length as u64) + length
    }

    /// Check if the frame is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a reference to the frame's header.
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Get a mutable reference to the frame's header.
    #[inline]
    pub fn header_mut(&mut self) -> &mut FrameHeader {
        &mut self.header
    }

    /// Get a reference to the frame's payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame into its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Generate a random mask for the frame.
    ///
    /// This just generates a mask, the payload is not changed. The actual
    /// masking is performed by `format()`.
    #[inline]
    pub(crate) fn set_random_mask(&mut self) {
        self.header.set_random_mask();
    }

    /// Consume the frame into a closing frame.
    ///
    /// The reason string is validated as UTF-8 only when `check_utf8` is set;
    /// the close code itself is returned as observed and is validated by the
    /// close handshake.
    pub(crate) fn into_close(self, check_utf8: bool) -> Result<Option<CloseFrame>> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(Error::Protocol(ProtocolError::InvalidCloseSequence)),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]).into();
                let data = self.payload.slice(2..);
                let reason = if check_utf8 {
                    Utf8Bytes::try_from(data)?
                } else {
                    // Checking disabled by configuration; the application
                    // takes responsibility for the encoding.
                    unsafe { Utf8Bytes::from_bytes_unchecked(data) }
                };
                Ok(Some(CloseFrame { code, reason }))
            }
        }
    }

    /// Create a new data frame.
    #[inline]
    pub fn message(data: impl Into<Bytes>, opcode: OpCode, is_final: bool) -> Frame {
        debug_assert!(matches!(opcode, OpCode::Data(_)), "Invalid opcode for data frame.");
        Frame {
            header: FrameHeader { is_final, opcode, ..FrameHeader::default() },
            payload: data.into(),
        }
    }

    /// Create a new Ping control frame.
    #[inline]
    pub fn ping(data: impl Into<Bytes>) -> Frame {
        Frame {
            header: FrameHeader { opcode: OpCode::Control(Control::Ping), ..FrameHeader::default() },
            payload: data.into(),
        }
    }

    /// Create a new Pong control frame.
    #[inline]
    pub fn pong(data: impl Into<Bytes>) -> Frame {
        Frame {
            header: FrameHeader { opcode: OpCode::Control(Control::Pong), ..FrameHeader::default() },
            payload: data.into(),
        }
    }

    /// Create a new Close control frame.
    #[inline]
    pub fn close(msg: Option<CloseFrame>) -> Frame {
        let payload = if let Some(CloseFrame { code, reason }) = msg {
            let mut p = BytesMut::with_capacity(reason.len() + 2);
            p.extend(u16::from(code).to_be_bytes());
            p.extend_from_slice(reason.as_bytes());
            p
        } else {
            <_>::default()
        };

        Frame { header: FrameHeader::default(), payload: payload.into() }
    }

    /// Create a frame from given header and data.
    pub fn from_payload(header: FrameHeader, payload: Bytes) -> Self {
        Frame { header, payload }
    }

    /// Write the frame into a buffer, applying the mask to the payload if one
    /// is set on the header.
    pub fn format(mut self, buf: &mut Vec<u8>) {
        buf.reserve(self.len());
        self.header.format(self.payload.len() as u64, buf);

        let start = buf.len();
        buf.extend_from_slice(&self.payload);
        if let Some(mask) = self.header.mask.take() {
            apply_mask(&mut buf[start..], mask);
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<FRAME opcode={} final={} rsv={}{}{} length={}>",
            self.header.opcode,
            self.header.is_final,
            u8::from(self.header.rsv1),
            u8::from(self.header.rsv2),
            u8::from(self.header.rsv3),
            self.payload.len(),
        )
    }
}

/// Distinguish a clean end-of-stream on a frame boundary from an I/O fault.
pub(super) fn header_read_error(err: Error) -> Error {
    match err {
        Error::Io(ref io) if io.kind() == ErrorKind::UnexpectedEof => {
            Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
        }
        err => err,
    }
}
