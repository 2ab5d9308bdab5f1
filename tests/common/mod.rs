//! Shared plumbing for the loopback integration tests.

#![allow(dead_code)]

use scheelite::{Bytes, Config, Conn, Error, Handler, Message, PermessageDeflate, Role, Upgrade};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the handler callbacks observe, in order.
#[derive(Debug, PartialEq)]
pub enum Event {
    Open,
    Message(Message),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Close code and reason derived from the stored error.
    Close(u16, String),
}

/// A handler that forwards every callback into a channel.
pub struct Events(Mutex<Sender<Event>>);

impl Events {
    pub fn new(tx: Sender<Event>) -> Box<Self> {
        Box::new(Events(Mutex::new(tx)))
    }

    fn emit(&self, event: Event) {
        let _ = self.0.lock().unwrap().send(event);
    }
}

impl Handler<TcpStream> for Events {
    fn on_open(&self, _conn: &Conn<TcpStream>) {
        self.emit(Event::Open);
    }

    fn on_close(&self, _conn: &Conn<TcpStream>, err: &Error) {
        let reason = match err {
            Error::ConnectionClosed(Some(frame)) => frame.reason.to_string(),
            Error::ConnectionClosed(None) => String::new(),
            other => other.to_string(),
        };
        self.emit(Event::Close(err.close_code().into(), reason));
    }

    fn on_message(&self, _conn: &Conn<TcpStream>, msg: Message) {
        self.emit(Event::Message(msg));
    }

    fn on_ping(&self, _conn: &Conn<TcpStream>, payload: Bytes) {
        self.emit(Event::Ping(payload.to_vec()));
    }

    fn on_pong(&self, _conn: &Conn<TcpStream>, payload: Bytes) {
        self.emit(Event::Pong(payload.to_vec()));
    }
}

/// Spawn a one-connection server driving its read loop on a fresh thread.
pub fn serve(config: Config, pd: PermessageDeflate) -> (SocketAddr, Receiver<Event>, JoinHandle<()>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = channel();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut upgrade = Upgrade::new(stream, Role::Server);
        upgrade.permessage_deflate = pd;
        let conn = Conn::new(upgrade, config, Events::new(tx)).unwrap();
        conn.read_loop();
        // Hold the socket so a trailing close frame is not cut off by a
        // reset before the peer drains it.
        thread::sleep(Duration::from_millis(200));
    });
    (addr, rx, handle)
}

/// Connect an engine-driven client to `addr` and spawn its read loop.
pub fn connect(
    addr: SocketAddr,
    config: Config,
    pd: PermessageDeflate,
) -> (Arc<Conn<TcpStream>>, Receiver<Event>, JoinHandle<()>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let stream = TcpStream::connect(addr).unwrap();
    let (tx, rx) = channel();
    let mut upgrade = Upgrade::new(stream, Role::Client);
    upgrade.permessage_deflate = pd;
    let conn = Conn::new(upgrade, config, Events::new(tx)).unwrap();
    let reader = Arc::clone(&conn);
    let handle = thread::spawn(move || reader.read_loop());
    (conn, rx, handle)
}

pub const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// Build one wire frame by hand.
pub fn build_frame(fin: bool, rsv1: bool, opcode: u8, mask: Option<[u8; 4]>, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(payload.len() + 14);
    raw.push(opcode | if fin { 0x80 } else { 0 } | if rsv1 { 0x40 } else { 0 });
    let masked = if mask.is_some() { 0x80 } else { 0 };
    match payload.len() {
        0..=125 => raw.push(masked | payload.len() as u8),
        126..=65535 => {
            raw.push(masked | 126);
            raw.extend((payload.len() as u16).to_be_bytes());
        }
        _ => {
            raw.push(masked | 127);
            raw.extend((payload.len() as u64).to_be_bytes());
        }
    }
    match mask {
        Some(key) => {
            raw.extend(key);
            raw.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i & 3]));
        }
        None => raw.extend(payload),
    }
    raw
}

/// A masked single-frame message, as a client would send it.
pub fn masked(opcode: u8, payload: &[u8]) -> Vec<u8> {
    build_frame(true, false, opcode, Some(MASK), payload)
}

/// A masked Close frame carrying `code` and `reason`.
pub fn masked_close(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend(reason.as_bytes());
    masked(0x8, &payload)
}

/// Read one unmasked server frame off the wire: (first byte, payload).
pub fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).unwrap();
    assert_eq!(head[1] & 0x80, 0, "server frames must not be masked");
    let len = match head[1] & 0x7f {
        126 => {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext).unwrap();
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext).unwrap();
            u64::from_be_bytes(ext) as usize
        }
        n => n as usize,
    };
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    (head[0], payload)
}

/// Read a server Close frame and return its code and reason.
pub fn read_close(stream: &mut TcpStream) -> (u16, String) {
    let (first, payload) = read_frame(stream);
    assert_eq!(first & 0x0f, 0x8, "expected a close frame");
    if payload.is_empty() {
        return (0, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    (code, String::from_utf8(payload[2..].to_vec()).unwrap())
}
