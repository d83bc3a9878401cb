//! Error types for the sealing codec.

use std::io;
use thiserror::Error;

/// Result type for sealing operations.
pub type SealResult<T> = Result<T, SealError>;

/// Errors that can occur while sealing or opening a sealed stream.
#[derive(Debug, Error)]
pub enum SealError {
    /// I/O error from the underlying reader or writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream does not start with a recognized preamble.
    #[error("unsupported sealed stream format")]
    UnsupportedFormat,

    /// The supplied key does not match the key id recorded in the stream.
    #[error("seal key does not match the key id recorded in the stream")]
    WrongKey,

    /// A chunk failed authentication (wrong key, tampering, or corruption).
    #[error("sealed chunk failed authentication")]
    Authentication,

    /// The stream ended before its final chunk.
    #[error("sealed stream is truncated")]
    Truncated,

    /// A chunk declares an implausible length.
    #[error("sealed chunk length {length} exceeds the maximum of {max}")]
    ChunkTooLarge {
        /// Declared ciphertext length.
        length: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Encryption failed.
    #[error("encryption failed")]
    EncryptionFailed,
}

impl SealError {
    /// Wraps this error into an `std::io::Error` for use inside
    /// `Read`/`Write` trait impls.
    #[must_use]
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
