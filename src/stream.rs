//! Transport abstraction over the upgraded byte stream.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Capabilities the engine needs from an upgraded transport.
///
/// The connection keeps three handles to the same underlying stream: one for
/// the reader, one for the writer and one for control operations, which is
/// why `try_clone` is part of the contract. Deadlines and shutdown must act
/// on the shared stream so that an in-flight read observes them.
pub trait Transport: Read + Write + Send + Sync + Sized + 'static {
    /// An independent handle to the same underlying stream.
    fn try_clone(&self) -> io::Result<Self>;

    /// The local endpoint address.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// The peer endpoint address.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Deadline for blocking reads; `None` blocks forever.
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    /// Deadline for blocking writes; `None` blocks forever.
    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    /// Disable (or re-enable) Nagle's algorithm.
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;

    /// Tear the stream down in both directions, unblocking in-flight reads.
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}
