//! Opcodes and close codes of the WebSocket wire protocol.

use std::fmt;

/// WebSocket message opcode as in RFC 6455.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OpCode {
    /// Data (text or binary).
    Data(Data),
    /// Control message (close, ping, pong).
    Control(Control),
}

/// Data opcodes as in RFC 6455.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Data {
    /// 0x0 denotes a continuation frame.
    Continue,
    /// 0x1 denotes a text frame.
    Text,
    /// 0x2 denotes a binary frame.
    Binary,
    /// 0x3-7 are reserved for further non-control frames.
    Reserved(u8),
}

/// Control opcodes as in RFC 6455.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Control {
    /// 0x8 denotes a connection close.
    Close,
    /// 0x9 denotes a ping.
    Ping,
    /// 0xa denotes a pong.
    Pong,
    /// 0xb-f are reserved for further control frames.
    Reserved(u8),
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Data::Continue => write!(f, "CONTINUE"),
            Data::Text => write!(f, "TEXT"),
            Data::Binary => write!(f, "BINARY"),
            Data::Reserved(x) => write!(f, "RESERVED_DATA_{x}"),
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Control::Close => write!(f, "CLOSE"),
            Control::Ping => write!(f, "PING"),
            Control::Pong => write!(f, "PONG"),
            Control::Reserved(x) => write!(f, "RESERVED_CONTROL_{x}"),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            OpCode::Data(d) => d.fmt(f),
            OpCode::Control(c) => c.fmt(f),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(code: OpCode) -> Self {
        match code {
            OpCode::Data(Data::Continue) => 0,
            OpCode::Data(Data::Text) => 1,
            OpCode::Data(Data::Binary) => 2,
            OpCode::Data(Data::Reserved(i)) => i,
            OpCode::Control(Control::Close) => 8,
            OpCode::Control(Control::Ping) => 9,
            OpCode::Control(Control::Pong) => 10,
            OpCode::Control(Control::Reserved(i)) => i,
        }
    }
}

impl From<u8> for OpCode {
    fn from(byte: u8) -> Self {
        match byte {
            0 => OpCode::Data(Data::Continue),
            1 => OpCode::Data(Data::Text),
            2 => OpCode::Data(Data::Binary),
            i @ 3..=7 => OpCode::Data(Data::Reserved(i)),
            8 => OpCode::Control(Control::Close),
            9 => OpCode::Control(Control::Ping),
            10 => OpCode::Control(Control::Pong),
            i @ 11..=15 => OpCode::Control(Control::Reserved(i)),
            _ => panic!("Bug: opcode out of the 4-bit range: {byte}"),
        }
    }
}

impl OpCode {
    /// Whether the opcode is in one of the two reserved ranges.
    pub fn is_reserved(self) -> bool {
        matches!(self, OpCode::Data(Data::Reserved(_)) | OpCode::Control(Control::Reserved(_)))
    }
}

/// Status code of a Close frame, as defined by RFC 6455 section 7.4.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CloseCode {
    /// Normal closure (1000), the purpose for which the connection was
    /// established has been fulfilled.
    Normal,
    /// 1001, an endpoint is "going away", such as a server going down.
    Away,
    /// 1002, a protocol error was detected.
    Protocol,
    /// 1003, the endpoint received a type of data it cannot accept.
    Unsupported,
    /// 1005. Reserved, designates that no status code was present. Must
    /// never appear on the wire.
    Status,
    /// 1006. Reserved, designates an abnormal closure. Must never appear on
    /// the wire.
    Abnormal,
    /// 1007, the received payload was inconsistent with the message type
    /// (e.g. non-UTF-8 data in a text message).
    Invalid,
    /// 1008, a message violated the endpoint's policy.
    Policy,
    /// 1009, a message was too big to process.
    Size,
    /// 1010, the client expected an extension the server did not negotiate.
    Extension,
    /// 1011, the server encountered an unexpected internal condition.
    Error,
    /// 1012, the service is restarting.
    Restart,
    /// 1013, try again later.
    Again,
    /// 1015. Reserved, designates a TLS handshake failure. Must never
    /// appear on the wire.
    Tls,
    /// Reserved protocol-range values: 1004, 1014 and 1016-2999.
    Reserved(u16),
    /// 3000-3999, registered with IANA for use by libraries and frameworks.
    Iana(u16),
    /// 4000-4999, reserved for private application use.
    Library(u16),
    /// Everything outside 1000-4999.
    Bad(u16),
}

impl CloseCode {
    /// Whether the code may legitimately appear in a Close frame on the
    /// wire. Accepts 1000-1003, 1007-1013 and the application ranges
    /// 3000-4999; everything else is a protocol violation.
    pub fn is_allowed(self) -> bool {
        matches!(u16::from(self), 1000..=1003 | 1007..=1013 | 3000..=4999)
    }

    /// The code used to acknowledge a peer's Close frame: application-range
    /// codes echo verbatim, everything accepted in the protocol range is
    /// answered with a normal closure.
    pub fn echo(self) -> CloseCode {
        match u16::from(self) {
            3000..=4999 => self,
            _ => CloseCode::Normal,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code) => code,
            CloseCode::Iana(code) => code,
            CloseCode::Library(code) => code,
            CloseCode::Bad(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1012 => CloseCode::Restart,
            1013 => CloseCode::Again,
            1015 => CloseCode::Tls,
            1004 | 1014 | 1016..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Iana(code),
            4000..=4999 => CloseCode::Library(code),
            _ => CloseCode::Bad(code),
        }
    }
}
