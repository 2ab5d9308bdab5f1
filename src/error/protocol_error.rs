use crate::protocol::frame::coding::Data;
use thiserror::Error;

/// Indicates the specific type/cause of a protocol error.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProtocolError {
    /// Reserved bits in the frame header are non-zero.
    #[error("reserved bits are non-zero")]
    NonZeroReservedBits,
    /// RSV1 is set but permessage-deflate was not negotiated.
    #[error("compressed frame received but permessage-deflate was not negotiated")]
    CompressionNotNegotiated,
    /// RSV1 may only be set on the first data frame of a message.
    #[error("continuation frame carries the compression bit")]
    CompressedContinuationFrame,
    /// Encountered an invalid opcode.
    #[error("encountered invalid opcode: {0}")]
    InvalidOpcode(u8),
    /// Control frames must not be fragmented.
    #[error("fragmented control frame")]
    FragmentedControlFrame,
    /// Control frames must have a payload of 125 bytes or less.
    #[error("control frame too big (payload must be 125 bytes or less)")]
    ControlFrameTooBig,
    /// The server must close the connection when an unmasked frame is received.
    #[error("received an unmasked frame from client")]
    UnmaskedFrameFromClient,
    /// The client must close the connection when a masked frame is received.
    #[error("received a masked frame from server")]
    MaskedFrameFromServer,
    /// Extended payload lengths must use the shortest possible encoding.
    #[error("payload length is not minimally encoded")]
    NonMinimalLengthEncoding,
    /// The 8-byte extended payload length must have its high bit clear.
    #[error("payload length has the most significant bit set")]
    InvalidPayloadLength,
    /// Received a continuation frame despite there being nothing to continue.
    #[error("continuation frame but nothing to continue")]
    UnexpectedContinuation,
    /// Received a new data frame while waiting for more fragments.
    #[error("received {0} frame while waiting for more fragments")]
    ExpectedContinuation(Data),
    /// The payload of a Close frame is a single byte.
    #[error("invalid close sequence")]
    InvalidCloseSequence,
    /// The close code is reserved or outside the ranges valid on the wire.
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),
    /// Connection closed without performing the closing handshake.
    #[error("connection reset without closing handshake")]
    ResetWithoutClosingHandshake,
}
