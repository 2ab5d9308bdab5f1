//! Permessage-deflate engine (RFC 7692).
//!
//! Messages travel as raw deflate streams. Context takeover is implemented
//! with explicit sliding windows: the compressor and decompressor are reset
//! for every message and primed with the retained window as a preset
//! dictionary, so the window alone carries the cross-message state. This is
//! what makes the broadcast path possible: skipping the dictionary for one
//! message yields bytes any peer can inflate, while the windows keep
//! advancing.

use crate::error::{CapacityError, DeflateError, Error, Result};
use crate::protocol::Role;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Appended to a message before inflation and stripped after deflation
/// (RFC 7692 7.2).
const TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// The minimum size of the LZ77 sliding window, in bits.
pub const MIN_WINDOW_BITS: u8 = 8;

/// The maximum size of the LZ77 sliding window, in bits. Absence of a
/// `max_window_bits` parameter during negotiation means a full 32 KiB
/// window (RFC 7692 7.1.2.1).
pub const MAX_WINDOW_BITS: u8 = 15;

/// How much headroom to add when a deflate call runs out of output space.
const GROW: usize = 4096;

/// Negotiated permessage-deflate parameters, handed over by the handshake
/// layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermessageDeflate {
    /// Whether the extension was negotiated at all.
    pub enabled: bool,
    /// Whether the server retains its compression context between messages.
    pub server_context_takeover: bool,
    /// Whether the client retains its compression context between messages.
    pub client_context_takeover: bool,
    /// The LZ77 sliding window size the server compresses with, 8-15.
    pub server_max_window_bits: u8,
    /// The LZ77 sliding window size the client compresses with, 8-15.
    pub client_max_window_bits: u8,
    /// Outbound payloads below this many bytes are sent uncompressed even
    /// when the extension is negotiated.
    pub threshold: usize,
}

impl Default for PermessageDeflate {
    fn default() -> Self {
        PermessageDeflate {
            enabled: false,
            server_context_takeover: true,
            client_context_takeover: true,
            server_max_window_bits: MAX_WINDOW_BITS,
            client_max_window_bits: MAX_WINDOW_BITS,
            threshold: 512,
        }
    }
}

impl PermessageDeflate {
    /// Whether this side keeps its deflate context between messages.
    ///
    /// Each side's *own* takeover flag governs its compressor; the peer
    /// decompresses with the matching state.
    pub(crate) fn compress_takeover(&self, role: Role) -> bool {
        match role {
            Role::Server => self.server_context_takeover,
            Role::Client => self.client_context_takeover,
        }
    }

    /// Whether this side keeps its inflate context between messages. Keyed
    /// on the *peer's* takeover flag, mirroring the peer's compressor.
    pub(crate) fn decompress_takeover(&self, role: Role) -> bool {
        match role {
            Role::Server => self.client_context_takeover,
            Role::Client => self.server_context_takeover,
        }
    }

    /// Window bits this side compresses with.
    pub(crate) fn compress_window_bits(&self, role: Role) -> u8 {
        match role {
            Role::Server => self.server_max_window_bits,
            Role::Client => self.client_max_window_bits,
        }
    }

    /// Window bits this side inflates with.
    pub(crate) fn decompress_window_bits(&self, role: Role) -> u8 {
        match role {
            Role::Server => self.client_max_window_bits,
            Role::Client => self.server_max_window_bits,
        }
    }
}

/// zlib cannot produce raw deflate streams with an 8-bit window; promote it
/// to 9 as the deflate implementations across the ecosystem do.
/// <https://github.com/madler/zlib/blob/cacf7f1d4e3d44d871b605da3b647f07d718623f/deflate.c#L303>
fn effective_window_bits(bits: u8) -> u8 {
    debug_assert!((MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits));
    bits.max(9)
}

/// The trailing bytes of transmitted or received plaintext, bounded by the
/// negotiated window size and used as the preset dictionary for the next
/// message when context takeover is enabled.
#[derive(Debug)]
pub(crate) struct SlidingWindow {
    buf: Vec<u8>,
    size: usize,
}

impl SlidingWindow {
    pub fn new(bits: u8) -> Self {
        Self::from_buf(Vec::new(), bits)
    }

    /// Rebuild a window around a pooled buffer.
    pub fn from_buf(mut buf: Vec<u8>, bits: u8) -> Self {
        buf.clear();
        SlidingWindow { buf, size: 1usize << effective_window_bits(bits) }
    }

    /// The current preset dictionary.
    pub fn dict(&self) -> &[u8] {
        &self.buf
    }

    /// Append plaintext, retaining only the trailing `size` bytes.
    pub fn advance(&mut self, payload: &[u8]) {
        if payload.len() >= self.size {
            self.buf.clear();
            self.buf.extend_from_slice(&payload[payload.len() - self.size..]);
        } else {
            let overflow = (self.buf.len() + payload.len()).saturating_sub(self.size);
            if overflow > 0 {
                self.buf.drain(..overflow);
            }
            self.buf.extend_from_slice(payload);
        }
    }

    /// Give the buffer back, e.g. to a pool.
    pub fn into_buf(self) -> Vec<u8> {
        self.buf
    }
}

/// Per-connection compressor. Owned by the write half and therefore
/// protected by the connection's write lock.
#[derive(Debug)]
pub(crate) struct Deflater {
    compress: Compress,
}

impl Deflater {
    pub fn new(level: Compression, window_bits: u8) -> Self {
        Deflater {
            compress: Compress::new_with_window_bits(level, false, effective_window_bits(window_bits)),
        }
    }

    /// Compress one message payload into a fresh buffer, with the trailing
    /// `00 00 FF FF` stripped (RFC 7692 7.2.1). `dict` primes the stream
    /// with the retained sliding window.
    pub fn deflate(&mut self, input: &[u8], dict: Option<&[u8]>) -> Result<Vec<u8>, DeflateError> {
        self.compress.reset();
        if let Some(dict) = dict.filter(|d| !d.is_empty()) {
            self.compress.set_dictionary(dict)?;
        }

        let mut output = Vec::with_capacity(input.len() / 2 + 64);
        let start_in = self.compress.total_in();

        loop {
            let consumed = (self.compress.total_in() - start_in) as usize;
            if consumed >= input.len() {
                break;
            }
            match self.compress.compress_vec(&input[consumed..], &mut output, FlushCompress::None)? {
                Status::Ok => (),
                Status::BufError => output.reserve(GROW),
                Status::StreamEnd => break,
            }
        }

        // Flush until the stream ends with the empty-block trailer.
        while !output.ends_with(&TRAILER) {
            output.reserve(8);
            match self.compress.compress_vec(&[], &mut output, FlushCompress::Sync)? {
                Status::Ok | Status::BufError => (),
                Status::StreamEnd => break,
            }
        }
        if !output.ends_with(&TRAILER) {
            return Err(DeflateError::MissingTrailer);
        }
        output.truncate(output.len() - TRAILER.len());
        Ok(output)
    }
}

/// Per-connection decompressor. Owned by the read half; only the single
/// reader touches it.
#[derive(Debug)]
pub(crate) struct Inflater {
    decompress: Decompress,
}

impl Inflater {
    pub fn new(window_bits: u8) -> Self {
        Inflater {
            decompress: Decompress::new_with_window_bits(false, effective_window_bits(window_bits)),
        }
    }

    /// Inflate one message. `input` is the raw payload without the trailer
    /// (it is appended here, RFC 7692 7.2.2); `dict` primes the stream with
    /// the retained sliding window; output beyond `max_size` fails with a
    /// capacity error.
    pub fn inflate(&mut self, input: &[u8], dict: Option<&[u8]>, max_size: usize) -> Result<Vec<u8>> {
        self.decompress.reset(false);
        if let Some(dict) = dict.filter(|d| !d.is_empty()) {
            self.decompress.set_dictionary(dict).map_err(DeflateError::from)?;
        }

        let mut output = Vec::with_capacity(input.len().saturating_mul(2).min(GROW * 2));
        self.run(input, &mut output, max_size)?;
        self.run(&TRAILER, &mut output, max_size)?;
        Ok(output)
    }

    fn run(&mut self, input: &[u8], output: &mut Vec<u8>, max_size: usize) -> Result<()> {
        let start_in = self.decompress.total_in();
        loop {
            let consumed = (self.decompress.total_in() - start_in) as usize;
            if consumed >= input.len() {
                return Ok(());
            }
            if output.len() > max_size {
                return Err(Error::Capacity(CapacityError::MessageTooLong {
                    size: output.len(),
                    max_size,
                }));
            }
            if output.len() == output.capacity() {
                output.reserve(GROW);
            }
            let status = self
                .decompress
                .decompress_vec(&input[consumed..], output, FlushDecompress::Sync)
                .map_err(DeflateError::from)?;
            match status {
                Status::Ok | Status::BufError => (),
                Status::StreamEnd => return Ok(()),
            }
        }
    }
}
