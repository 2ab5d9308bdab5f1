use flate2::{CompressError, DecompressError};
use thiserror::Error;

/// Indicates the specific type/cause of a permessage-deflate failure.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum DeflateError {
    /// An error produced while deflating a message.
    #[error("compression failed: {0}")]
    Deflate(String),
    /// An error produced while inflating a message.
    #[error("decompression failed: {0}")]
    Inflate(String),
    /// The deflate stream did not end with the empty-block trailer
    /// `00 00 FF FF` (RFC 7692 7.2.1).
    #[error("deflate stream missing the empty-block trailer")]
    MissingTrailer,
}

impl From<CompressError> for DeflateError {
    fn from(err: CompressError) -> Self {
        DeflateError::Deflate(err.to_string())
    }
}

impl From<DecompressError> for DeflateError {
    fn from(err: DecompressError) -> Self {
        DeflateError::Inflate(err.to_string())
    }
}
