//! Generic WebSocket connection machinery.

pub mod frame;

mod message;

pub use self::frame::{CloseFrame, Utf8Bytes};
pub use self::message::Message;

use self::frame::coding::{CloseCode, Control as OpCtl, Data as OpData, OpCode};
use self::frame::{Frame, FrameReader};
use self::message::{IncompleteMessage, IncompleteMessageType};
use crate::error::{CapacityError, Error, ProtocolError, Result};
use crate::extensions::deflate::{Deflater, Inflater, PermessageDeflate, SlidingWindow};
use crate::pool::BufferPool;
use crate::queue::WorkQueue;
use crate::session::SessionStorage;
use crate::stream::Transport;
use bytes::Bytes;
use flate2::Compression;
use log::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// Indicates a Client or Server role of the websocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This socket is a server.
    Server,
    /// This socket is a client.
    Client,
}

/// Engine configuration.
///
/// The compression threshold travels with the negotiated
/// [`PermessageDeflate`] parameters instead, since it belongs to the
/// hand-off the handshake layer produces.
#[derive(Debug, Clone)]
pub struct Config {
    /// Inbound frames and reassembled messages larger than this terminate
    /// the connection with close code 1009.
    pub read_max_payload_size: usize,
    /// Upper bound for outbound message payloads.
    pub write_max_payload_size: usize,
    /// Validate text payloads and close reasons as UTF-8.
    ///
    /// When disabled, text messages are delivered without checking and the
    /// application takes responsibility for the encoding.
    pub check_utf8: bool,
    /// Run asynchronous write callbacks on more than one worker.
    pub parallel_enabled: bool,
    /// Maximum outstanding [`Conn::send_async`] jobs per connection when
    /// `parallel_enabled` is set.
    pub parallel_golimit: usize,
    /// Capacity of the buffered transport reader.
    pub read_buffer_size: usize,
    /// Initial capacity of the frame assembly buffer.
    pub write_buffer_size: usize,
    /// Compression level for outbound permessage-deflate messages.
    pub compression: Compression,
    /// Pool that server-role connections borrow sliding-window buffers from.
    pub window_pool: Option<Arc<BufferPool>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            read_max_payload_size: 16 << 20,
            write_max_payload_size: 16 << 20,
            check_utf8: true,
            parallel_enabled: false,
            parallel_golimit: 8,
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            compression: Compression::fast(),
            window_pool: None,
        }
    }
}

/// Everything the handshake layer hands to the engine after a successful
/// upgrade. The engine itself never speaks HTTP.
pub struct Upgrade<T: Transport> {
    /// The upgraded stream.
    pub transport: T,
    /// Whether this endpoint accepted or initiated the connection.
    pub role: Role,
    /// Bytes already read past the end of the HTTP upgrade, if any.
    pub leftover: Vec<u8>,
    /// The subprotocol agreed during the upgrade, if any.
    pub subprotocol: Option<String>,
    /// The negotiated permessage-deflate parameters.
    pub permessage_deflate: PermessageDeflate,
}

impl<T: Transport> Upgrade<T> {
    /// A plain upgrade with no leftover bytes, no subprotocol and no
    /// compression.
    pub fn new(transport: T, role: Role) -> Self {
        Upgrade {
            transport,
            role,
            leftover: Vec::new(),
            subprotocol: None,
            permessage_deflate: PermessageDeflate::default(),
        }
    }
}

/// Callbacks driven by the read loop.
///
/// All callbacks run on the thread driving [`Conn::read_loop`]; the reader
/// is not re-entered until the callback returns. Payloads may come from
/// pooled buffers, so implementations should not stash references beyond the
/// call.
pub trait Handler<T: Transport>: Send + Sync {
    /// The connection is live; fired exactly once, before any message.
    fn on_open(&self, _conn: &Conn<T>) {}

    /// The connection terminated; fired exactly once, after the last
    /// message, with the stored error (a [`Error::ConnectionClosed`] for a
    /// clean shutdown).
    fn on_close(&self, conn: &Conn<T>, err: &Error);

    /// A complete text or binary message arrived.
    fn on_message(&self, _conn: &Conn<T>, _msg: Message) {}

    /// A ping arrived; the engine has already queued the pong.
    fn on_ping(&self, _conn: &Conn<T>, _payload: Bytes) {}

    /// A pong arrived.
    fn on_pong(&self, _conn: &Conn<T>, _payload: Bytes) {}
}

/// A WebSocket connection after the upgrade handshake.
///
/// The connection is shared behind an [`Arc`]: exactly one thread drives
/// [`Conn::read_loop`] while any number of threads write. Writes are
/// serialized by an internal lock held for one frame at a time.
pub struct Conn<T: Transport> {
    /// Handle to the owning `Arc`, for jobs queued by `send_async`.
    me: Weak<Conn<T>>,
    transport: T,
    role: Role,
    config: Config,
    subprotocol: Option<String>,
    pd: PermessageDeflate,
    handler: Box<dyn Handler<T>>,
    reader: Mutex<ReadHalf<T>>,
    writer: Mutex<WriteHalf<T>>,
    queue: WorkQueue,
    session: SessionStorage,
    closed: AtomicBool,
    close_delivered: AtomicBool,
    err: OnceLock<Error>,
}

struct ReadHalf<T> {
    frames: FrameReader<T>,
    incomplete: Option<IncompleteMessage>,
    inflater: Option<Inflater>,
    window: Option<SlidingWindow>,
}

struct WriteHalf<T> {
    stream: T,
    buf: Vec<u8>,
    deflater: Option<Deflater>,
    window: Option<SlidingWindow>,
}

impl<T: Transport> Conn<T> {
    /// Build a connection from a finished upgrade.
    pub fn new(upgrade: Upgrade<T>, config: Config, handler: Box<dyn Handler<T>>) -> Result<Arc<Self>> {
        let Upgrade { transport, role, leftover, subprotocol, permessage_deflate: pd } = upgrade;
        let read_stream = transport.try_clone()?;
        let write_stream = transport.try_clone()?;

        let (inflater, recv_window, deflater, send_window) = if pd.enabled {
            let recv_bits = pd.decompress_window_bits(role);
            let send_bits = pd.compress_window_bits(role);
            (
                Some(Inflater::new(recv_bits)),
                pd.decompress_takeover(role).then(|| Self::window(&config, recv_bits)),
                Some(Deflater::new(config.compression, send_bits)),
                pd.compress_takeover(role).then(|| Self::window(&config, send_bits)),
            )
        } else {
            (None, None, None, None)
        };

        let limit = if config.parallel_enabled { config.parallel_golimit } else { 1 };
        let write_buffer_size = config.write_buffer_size;
        let read_buffer_size = config.read_buffer_size;

        Ok(Arc::new_cyclic(|me| Conn {
            me: me.clone(),
            reader: Mutex::new(ReadHalf {
                frames: FrameReader::new(read_stream, leftover, read_buffer_size),
                incomplete: None,
                inflater,
                window: recv_window,
            }),
            writer: Mutex::new(WriteHalf {
                stream: write_stream,
                buf: Vec::with_capacity(write_buffer_size),
                deflater,
                window: send_window,
            }),
            queue: WorkQueue::new(limit),
            session: SessionStorage::new(),
            closed: AtomicBool::new(false),
            close_delivered: AtomicBool::new(false),
            err: OnceLock::new(),
            transport,
            role,
            config,
            subprotocol,
            pd,
            handler,
        }))
    }

    fn window(config: &Config, bits: u8) -> SlidingWindow {
        match &config.window_pool {
            Some(pool) => SlidingWindow::from_buf(pool.get(), bits),
            None => SlidingWindow::new(bits),
        }
    }

    /// This endpoint's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The subprotocol agreed during the upgrade, if any.
    pub fn subprotocol(&self) -> Option<&str> {
        self.subprotocol.as_deref()
    }

    /// The negotiated permessage-deflate parameters.
    pub fn permessage_deflate(&self) -> &PermessageDeflate {
        &self.pd
    }

    /// Application state attached to this connection.
    pub fn session(&self) -> &SessionStorage {
        &self.session
    }

    /// The control handle of the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// The local endpoint address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    /// The peer endpoint address.
    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.transport.peer_addr()?)
    }

    /// Set both the read and the write deadline.
    pub fn set_timeout(&self, dur: Option<Duration>) -> Result<()> {
        self.transport.set_read_timeout(dur)?;
        self.transport.set_write_timeout(dur)?;
        Ok(())
    }

    /// Set the read deadline; an expiry surfaces as an I/O error that
    /// terminates the connection.
    pub fn set_read_timeout(&self, dur: Option<Duration>) -> Result<()> {
        Ok(self.transport.set_read_timeout(dur)?)
    }

    /// Set the write deadline.
    pub fn set_write_timeout(&self, dur: Option<Duration>) -> Result<()> {
        Ok(self.transport.set_write_timeout(dur)?)
    }

    /// Disable (or re-enable) Nagle's algorithm.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        Ok(self.transport.set_nodelay(nodelay)?)
    }

    /// Whether the connection has terminated (or is tearing down).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drive the connection until it terminates.
    ///
    /// Fires `on_open`, dispatches handler callbacks for everything the peer
    /// sends, answers pings and the close handshake, and finally fires
    /// `on_close` exactly once with the stored error. Sliding-window buffers
    /// go back to the configured pool on server-role connections.
    pub fn read_loop(&self) {
        self.handler.on_open(self);

        let mut reader = self.reader.lock();
        let err = loop {
            match self.advance(&mut reader) {
                Ok(()) => (),
                Err(err) => break err,
            }
        };
        drop(reader);

        debug!("read loop finished: {err}");
        if !self.close_delivered.swap(true, Ordering::SeqCst) {
            let stored = self.err.get().cloned().unwrap_or(Error::ConnectionClosed(None));
            self.handler.on_close(self, &stored);
        }
        self.release_windows();
    }

    /// Read one frame and dispatch it; every error path tears the
    /// connection down before propagating.
    fn advance(&self, r: &mut ReadHalf<T>) -> Result<()> {
        self.try_advance(r).map_err(|err| self.fail(err))
    }

    fn try_advance(&self, r: &mut ReadHalf<T>) -> Result<()> {
        let frame =
            r.frames.read_frame(self.role, self.config.read_max_payload_size, self.pd.enabled)?;
        match frame.header().opcode {
            OpCode::Control(ctl) => self.dispatch_control(ctl, frame),
            OpCode::Data(data) => self.dispatch_data(r, data, frame),
        }
    }

    fn dispatch_control(&self, ctl: OpCtl, frame: Frame) -> Result<()> {
        match ctl {
            OpCtl::Ping => {
                let payload = frame.into_payload();
                // The pong goes out before any further frame is read.
                self.write_control(OpCtl::Pong, payload.clone())?;
                self.handler.on_ping(self, payload);
                Ok(())
            }
            OpCtl::Pong => {
                self.handler.on_pong(self, frame.into_payload());
                Ok(())
            }
            OpCtl::Close => {
                let close = frame.into_close(self.config.check_utf8)?;
                Err(match close {
                    None => Error::ConnectionClosed(None),
                    Some(frame) if !frame.code.is_allowed() => {
                        warn!("peer sent reserved close code {}", frame.code);
                        Error::Protocol(ProtocolError::InvalidCloseCode(frame.code.into()))
                    }
                    Some(frame) => Error::ConnectionClosed(Some(frame)),
                })
            }
            OpCtl::Reserved(i) => Err(Error::Protocol(ProtocolError::InvalidOpcode(i))),
        }
    }

    fn dispatch_data(&self, r: &mut ReadHalf<T>, data: OpData, frame: Frame) -> Result<()> {
        let fin = frame.header().is_final;
        let rsv1 = frame.header().rsv1;
        match data {
            OpData::Continue => {
                if rsv1 {
                    return Err(Error::Protocol(ProtocolError::CompressedContinuationFrame));
                }
                let mut incomplete = r
                    .incomplete
                    .take()
                    .ok_or(Error::Protocol(ProtocolError::UnexpectedContinuation))?;
                incomplete.extend(frame.payload(), self.config.read_max_payload_size)?;
                if fin {
                    let msg = self.complete_message(incomplete, &mut r.inflater, &mut r.window)?;
                    self.handler.on_message(self, msg);
                } else {
                    r.incomplete = Some(incomplete);
                }
                Ok(())
            }
            OpData::Text | OpData::Binary => {
                if r.incomplete.is_some() {
                    return Err(Error::Protocol(ProtocolError::ExpectedContinuation(data)));
                }
                let kind = match data {
                    OpData::Text => IncompleteMessageType::Text,
                    _ => IncompleteMessageType::Binary,
                };
                let mut incomplete = IncompleteMessage::new(kind, rsv1, self.config.check_utf8);
                incomplete.extend(frame.payload(), self.config.read_max_payload_size)?;
                if fin {
                    let msg = self.complete_message(incomplete, &mut r.inflater, &mut r.window)?;
                    self.handler.on_message(self, msg);
                } else {
                    r.incomplete = Some(incomplete);
                }
                Ok(())
            }
            OpData::Reserved(i) => Err(Error::Protocol(ProtocolError::InvalidOpcode(i))),
        }
    }

    /// Turn a finished reassembly into a message, inflating it first when
    /// the initial fragment carried RSV1.
    fn complete_message(
        &self,
        incomplete: IncompleteMessage,
        inflater: &mut Option<Inflater>,
        window: &mut Option<SlidingWindow>,
    ) -> Result<Message> {
        if !incomplete.compressed() {
            return incomplete.complete(self.config.check_utf8);
        }
        let kind = incomplete.kind();
        let raw = incomplete.into_bytes();
        let inflater =
            inflater.as_mut().ok_or(Error::Protocol(ProtocolError::CompressionNotNegotiated))?;
        let data = inflater.inflate(
            &raw,
            window.as_ref().map(|w| w.dict()),
            self.config.read_max_payload_size,
        )?;
        if let Some(window) = window {
            window.advance(&data);
        }
        Message::data(kind, data, self.config.check_utf8)
    }

    /// Send a message, blocking until it is on the wire.
    ///
    /// Data messages are compressed when permessage-deflate was negotiated
    /// and the payload reaches the threshold. After the connection has
    /// terminated this returns the stored error.
    pub fn send(&self, msg: Message) -> Result<()> {
        match msg {
            Message::Text(text) => self.write_data(OpData::Text, text.into()),
            Message::Binary(data) => self.write_data(OpData::Binary, data),
            Message::Ping(data) => self.write_control(OpCtl::Ping, data),
            Message::Pong(data) => self.write_control(OpCtl::Pong, data),
            Message::Close(frame) => self.close_opt(frame),
        }
    }

    /// Enqueue a message on the per-connection work queue; `cb` observes the
    /// write result. Jobs on the same connection go out in submission order.
    pub fn send_async<F>(&self, msg: Message, cb: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let conn = self.me.upgrade().expect("Bug: connection outlived its owner");
        self.queue.push(Box::new(move || cb(conn.send(msg))));
    }

    /// Send a ping control frame; the payload must be at most 125 bytes.
    pub fn send_ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.write_control(OpCtl::Ping, payload.into())
    }

    /// Send a pong control frame; the payload must be at most 125 bytes.
    pub fn send_pong(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.write_control(OpCtl::Pong, payload.into())
    }

    /// Initiate the close handshake.
    ///
    /// Idempotent: the first caller (including the read loop acting on a
    /// peer's Close) sends the frame and shuts the transport down; later
    /// callers get the stored error.
    pub fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.close_opt(Some(CloseFrame { code, reason: reason.into() }))
    }

    fn close_opt(&self, frame: Option<CloseFrame>) -> Result<()> {
        if let Some(ref frame) = frame {
            if 2 + frame.reason.len() > 125 {
                return Err(Error::Protocol(ProtocolError::ControlFrameTooBig));
            }
        }
        if self.shut_down_with(Some(Frame::close(frame.clone())), Error::ConnectionClosed(frame)) {
            Ok(())
        } else {
            Err(self.sticky())
        }
    }

    fn write_data(&self, opcode: OpData, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(self.sticky());
        }
        if payload.len() > self.config.write_max_payload_size {
            return Err(Error::Capacity(CapacityError::SendPayloadTooLong {
                size: payload.len(),
                max_size: self.config.write_max_payload_size,
            }));
        }

        let mut w = self.writer.lock();
        let res = self.write_data_locked(&mut w, opcode, payload);
        drop(w);
        res.map_err(|err| self.fail(err))
    }

    fn write_data_locked(&self, w: &mut WriteHalf<T>, opcode: OpData, payload: Bytes) -> Result<()> {
        let WriteHalf { stream, buf, deflater, window } = w;
        let (payload, rsv1) = match deflater {
            Some(deflater) if payload.len() >= self.pd.threshold => {
                let compressed =
                    deflater.deflate(&payload, window.as_ref().map(|w| w.dict()))?;
                if let Some(window) = window {
                    window.advance(&payload);
                }
                (Bytes::from(compressed), true)
            }
            _ => (payload, false),
        };

        let mut frame = Frame::message(payload, OpCode::Data(opcode), true);
        frame.header_mut().rsv1 = rsv1;
        Self::write_frame_to(stream, buf, self.role, frame)
    }

    fn write_control(&self, ctl: OpCtl, payload: Bytes) -> Result<()> {
        if payload.len() > 125 {
            return Err(Error::Protocol(ProtocolError::ControlFrameTooBig));
        }
        if self.is_closed() {
            return Err(self.sticky());
        }
        let frame = match ctl {
            OpCtl::Ping => Frame::ping(payload),
            _ => Frame::pong(payload),
        };
        let mut w = self.writer.lock();
        let res = {
            let WriteHalf { stream, buf, .. } = &mut *w;
            Self::write_frame_to(stream, buf, self.role, frame)
        };
        drop(w);
        res.map_err(|err| self.fail(err))
    }

    /// Write bytes the [`crate::Broadcaster`] pre-encoded. The plaintext is
    /// what the peer will see after inflation; takeover-enabled connections
    /// advance their send window by it so later direct sends stay in sync.
    pub(crate) fn write_preencoded(
        &self,
        bytes: &[u8],
        plaintext: &[u8],
        compressed: bool,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(self.sticky());
        }
        let mut w = self.writer.lock();
        let res = (|| -> Result<()> {
            if compressed {
                if let Some(window) = &mut w.window {
                    window.advance(plaintext);
                }
            }
            w.stream.write_all(bytes)?;
            w.stream.flush()?;
            Ok(())
        })();
        drop(w);
        res.map_err(|err| self.fail(err))
    }

    /// Assemble and emit one frame: mask on the client side, a single
    /// buffered write to the transport, retried internally by `write_all`
    /// until complete.
    fn write_frame_to(stream: &mut T, buf: &mut Vec<u8>, role: Role, mut frame: Frame) -> Result<()> {
        if role == Role::Client {
            frame.set_random_mask();
        }
        trace!("writing frame {frame}");
        buf.clear();
        frame.format(buf);
        stream.write_all(buf)?;
        stream.flush()?;
        Ok(())
    }

    /// Tear the connection down because of `err` and hand the error back.
    fn fail(&self, err: Error) -> Error {
        let reply = match &err {
            Error::ConnectionClosed(None) => Some(Frame::close(None)),
            Error::ConnectionClosed(Some(frame)) => Some(Frame::close(Some(CloseFrame {
                code: frame.code.echo(),
                reason: Utf8Bytes::default(),
            }))),
            // The transport already failed; 1006 never goes on the wire.
            Error::Io(_) => None,
            err => Some(Frame::close(Some(CloseFrame {
                code: err.close_code(),
                reason: Utf8Bytes::default(),
            }))),
        };
        self.shut_down_with(reply, err.clone());
        err
    }

    /// The one-shot closing transition. Exactly one caller wins the flag,
    /// stores the error, emits the close frame and shuts the transport down.
    fn shut_down_with(&self, reply: Option<Frame>, err: Error) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let _ = self.err.set(err);
        if let Some(frame) = reply {
            let mut w = self.writer.lock();
            let WriteHalf { stream, buf, .. } = &mut *w;
            if let Err(err) = Self::write_frame_to(stream, buf, self.role, frame) {
                debug!("discarding close frame after write failure: {err}");
            }
        }
        let _ = self.transport.shutdown();
        true
    }

    /// The stored error, or `AlreadyClosed` when the connection terminated
    /// without recording one.
    fn sticky(&self) -> Error {
        self.err.get().cloned().unwrap_or(Error::AlreadyClosed)
    }

    fn release_windows(&self) {
        if self.role != Role::Server {
            return;
        }
        let Some(pool) = &self.config.window_pool else { return };
        if let Some(window) = self.reader.lock().window.take() {
            pool.put(window.into_buf());
        }
        if let Some(window) = self.writer.lock().window.take() {
            pool.put(window.into_buf());
        }
    }
}

impl<T: Transport> std::fmt::Debug for Conn<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("role", &self.role)
            .field("subprotocol", &self.subprotocol)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
