use std::fmt;

use super::frame::coding::{Data, OpCode};
use super::frame::{CloseFrame, Utf8Bytes};
use crate::error::{CapacityError, Error, Result};
use bytes::Bytes;

mod string_collect {
    use utf8::DecodeError;

    use crate::error::{Error, Result};

    /// Accumulates the text of a fragmented message, validating UTF-8
    /// incrementally so that a codepoint split across fragments is accepted
    /// once the whole sequence has arrived.
    #[derive(Debug)]
    pub struct StringCollector {
        data: String,
        incomplete: Option<utf8::Incomplete>,
    }

    impl StringCollector {
        pub fn new() -> Self {
            StringCollector { data: String::new(), incomplete: None }
        }

        pub fn len(&self) -> usize {
            self.data.len() + self.incomplete.map(|i| i.buffer_len as usize).unwrap_or(0)
        }

        pub fn extend<T: AsRef<[u8]>>(&mut self, tail: T) -> Result<()> {
            let mut input: &[u8] = tail.as_ref();

            if let Some(mut incomplete) = self.incomplete.take() {
                if let Some((result, rest)) = incomplete.try_complete(input) {
                    input = rest;
                    if let Ok(text) = result {
                        self.data.push_str(text);
                    } else {
                        return Err(Error::Utf8);
                    }
                } else {
                    input = &[];
                    self.incomplete = Some(incomplete);
                }
            }

            if !input.is_empty() {
                match utf8::decode(input) {
                    Ok(text) => {
                        self.data.push_str(text);
                    }
                    Err(DecodeError::Incomplete { valid_prefix, incomplete_suffix }) => {
                        self.data.push_str(valid_prefix);
                        self.incomplete = Some(incomplete_suffix);
                    }
                    Err(DecodeError::Invalid { valid_prefix, .. }) => {
                        self.data.push_str(valid_prefix);
                        return Err(Error::Utf8);
                    }
                }
            }

            Ok(())
        }

        pub fn into_string(self) -> Result<String> {
            if self.incomplete.is_some() {
                Err(Error::Utf8)
            } else {
                Ok(self.data)
            }
        }
    }
}

use self::string_collect::StringCollector;

/// The kind of data message being reassembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IncompleteMessageType {
    Text,
    Binary,
}

/// Reassembly state for a fragmented message.
///
/// The compressed flag is taken from RSV1 of the first fragment and is
/// independent of the aggregation buffer: a compressed text message collects
/// raw deflate bytes and is only validated after inflation.
#[derive(Debug)]
pub(crate) struct IncompleteMessage {
    kind: IncompleteMessageType,
    compressed: bool,
    collector: Collector,
}

#[derive(Debug)]
enum Collector {
    /// Binary data, compressed payloads awaiting inflation, or text with
    /// UTF-8 checking disabled.
    Bytes(Vec<u8>),
    /// Uncompressed text validated as it arrives.
    Text(StringCollector),
}

impl IncompleteMessage {
    pub fn new(kind: IncompleteMessageType, compressed: bool, check_utf8: bool) -> Self {
        let collector = if kind == IncompleteMessageType::Text && check_utf8 && !compressed {
            Collector::Text(StringCollector::new())
        } else {
            Collector::Bytes(Vec::new())
        };
        IncompleteMessage { kind, compressed, collector }
    }

    pub fn kind(&self) -> IncompleteMessageType {
        self.kind
    }

    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// Current size of the aggregation buffer.
    pub fn len(&self) -> usize {
        match &self.collector {
            Collector::Bytes(b) => b.len(),
            Collector::Text(t) => t.len(),
        }
    }

    /// Add more data, keeping the aggregate within `max_size`.
    pub fn extend<T: AsRef<[u8]>>(&mut self, tail: T, max_size: usize) -> Result<()> {
        let tail = tail.as_ref();
        let size = self.len().saturating_add(tail.len());
        if size > max_size {
            return Err(Error::Capacity(CapacityError::MessageTooLong { size, max_size }));
        }
        match &mut self.collector {
            Collector::Bytes(b) => {
                b.extend_from_slice(tail);
                Ok(())
            }
            Collector::Text(t) => t.extend(tail),
        }
    }

    /// Finish an uncompressed message. Compressed messages go through
    /// [`IncompleteMessage::into_bytes`] and inflation instead.
    pub fn complete(self, check_utf8: bool) -> Result<Message> {
        debug_assert!(!self.compressed, "compressed messages must be inflated first");
        match self.collector {
            Collector::Text(t) => Ok(Message::Text(t.into_string()?.into())),
            Collector::Bytes(b) => Message::data(self.kind, b, check_utf8),
        }
    }

    /// Surrender the raw aggregated bytes for inflation.
    pub fn into_bytes(self) -> Vec<u8> {
        match self.collector {
            Collector::Bytes(b) => b,
            Collector::Text(t) => t.into_string().map(String::into_bytes).unwrap_or_default(),
        }
    }
}

/// An enum representing the various forms of a WebSocket message.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Message {
    /// A text WebSocket message.
    Text(Utf8Bytes),
    /// A binary WebSocket message.
    Binary(Bytes),
    /// A ping message with the specified payload.
    Ping(Bytes),
    /// A pong message with the specified payload.
    Pong(Bytes),
    /// A close message with the optional close frame.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a new text WebSocket message from a stringable.
    pub fn text<S>(string: S) -> Message
    where
        S: Into<Utf8Bytes>,
    {
        Message::Text(string.into())
    }

    /// Create a new binary WebSocket message by converting to `Bytes`.
    pub fn binary<B>(bin: B) -> Message
    where
        B: Into<Bytes>,
    {
        Message::Binary(bin.into())
    }

    /// Build a data message from reassembled (and possibly inflated) bytes.
    pub(crate) fn data(kind: IncompleteMessageType, bytes: Vec<u8>, check_utf8: bool) -> Result<Message> {
        match kind {
            IncompleteMessageType::Binary => Ok(Message::Binary(bytes.into())),
            IncompleteMessageType::Text if check_utf8 => {
                Ok(Message::Text(Utf8Bytes::try_from(bytes).map_err(|_| Error::Utf8)?))
            }
            IncompleteMessageType::Text => {
                // Checking disabled by configuration; the application takes
                // responsibility for the encoding.
                Ok(Message::Text(unsafe { Utf8Bytes::from_bytes_unchecked(bytes.into()) }))
            }
        }
    }

    /// Indicates whether a message is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Indicates whether a message is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Indicates whether a message is a ping message.
    pub fn is_ping(&self) -> bool {
        matches!(self, Message::Ping(_))
    }

    /// Indicates whether a message is a pong message.
    pub fn is_pong(&self) -> bool {
        matches!(self, Message::Pong(_))
    }

    /// Indicates whether a message is a close message.
    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Get the length of the WebSocket message.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(string) => string.len(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data.len(),
            Message::Close(Some(frame)) => 2 + frame.reason.len(),
            Message::Close(None) => 0,
        }
    }

    /// Returns true if the WebSocket message has no content.
    /// For example, if the other side of the connection sent an empty string.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the WebSocket message and return it as binary data.
    pub fn into_data(self) -> Bytes {
        match self {
            Message::Text(string) => string.into(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data,
            Message::Close(Some(frame)) => frame.reason.into(),
            Message::Close(None) => Bytes::new(),
        }
    }

    /// Attempt to consume the WebSocket message and convert it to a `Utf8Bytes`.
    pub fn into_text(self) -> Result<Utf8Bytes> {
        match self {
            Message::Text(string) => Ok(string),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => {
                Ok(Utf8Bytes::try_from(data)?)
            }
            Message::Close(Some(frame)) => Ok(frame.reason),
            Message::Close(None) => Ok(Utf8Bytes::default()),
        }
    }

    /// The wire opcode of this message.
    pub fn opcode(&self) -> OpCode {
        use super::frame::coding::Control;
        match self {
            Message::Text(_) => OpCode::Data(Data::Text),
            Message::Binary(_) => OpCode::Data(Data::Binary),
            Message::Ping(_) => OpCode::Control(Control::Ping),
            Message::Pong(_) => OpCode::Control(Control::Pong),
            Message::Close(_) => OpCode::Control(Control::Close),
        }
    }
}

impl From<String> for Message {
    fn from(string: String) -> Self {
        Message::text(string)
    }
}

impl<'s> From<&'s str> for Message {
    fn from(string: &'s str) -> Self {
        Message::text(string)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::binary(data)
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::binary(data)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::Text(string) => write!(f, "{string}"),
            other => write!(f, "Binary Data<length={}>", other.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let t = Message::text("test");
        assert_eq!(t.to_string(), "test".to_owned());

        let bin = Message::binary(vec![0, 1, 3, 4, 241]);
        assert_eq!(bin.to_string(), "Binary Data<length=5>".to_owned());
    }

    #[test]
    fn binary_convert() {
        let bin = vec![6u8, 7, 8, 9, 10, 241];
        let msg = Message::from(bin);
        assert!(msg.is_binary());
        assert!(msg.into_text().is_err());
    }

    #[test]
    fn text_convert() {
        let msg = Message::from("kiwotsukete");
        assert!(msg.is_text());
        assert_eq!(msg.into_data(), Bytes::from_static(b"kiwotsukete"));
    }

    #[test]
    fn straddled_codepoint_validates_on_aggregation() {
        // U+20AC (€) is e2 82 ac; split it across three fragments.
        let mut msg = IncompleteMessage::new(IncompleteMessageType::Text, false, true);
        msg.extend([0xe2], usize::MAX).unwrap();
        msg.extend([0x82], usize::MAX).unwrap();
        msg.extend([0xac], usize::MAX).unwrap();
        match msg.complete(true).unwrap() {
            Message::Text(text) => assert_eq!(text, "\u{20ac}"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn truncated_codepoint_fails_on_completion() {
        let mut msg = IncompleteMessage::new(IncompleteMessageType::Text, false, true);
        msg.extend([0xe2, 0x82], usize::MAX).unwrap();
        assert!(matches!(msg.complete(true), Err(Error::Utf8)));
    }

    #[test]
    fn invalid_byte_fails_immediately() {
        let mut msg = IncompleteMessage::new(IncompleteMessageType::Text, false, true);
        assert!(matches!(msg.extend([0xff], usize::MAX), Err(Error::Utf8)));
    }

    #[test]
    fn aggregation_respects_limit() {
        let mut msg = IncompleteMessage::new(IncompleteMessageType::Binary, false, true);
        msg.extend([0u8; 10], 16).unwrap();
        assert!(matches!(
            msg.extend([0u8; 10], 16),
            Err(Error::Capacity(CapacityError::MessageTooLong { size: 20, max_size: 16 }))
        ));
    }

    #[test]
    fn compressed_collector_keeps_raw_bytes() {
        let mut msg = IncompleteMessage::new(IncompleteMessageType::Text, true, true);
        assert!(msg.compressed());
        // Raw deflate bytes are not UTF-8; they must be accepted untouched.
        msg.extend([0xff, 0x00, 0xab], usize::MAX).unwrap();
        assert_eq!(msg.into_bytes(), vec![0xff, 0x00, 0xab]);
    }
}
