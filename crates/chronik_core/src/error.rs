//! Error types for Chronik core.

use std::io;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The on-disk journal belongs to a different configuration.
    ///
    /// Raised when a segment header carries a journal invariant that does
    /// not match the configured one. Fatal for this journal; retrying will
    /// not help.
    #[error("incompatible journal: {message}")]
    Incompatible {
        /// Description of the mismatch.
        message: String,
    },

    /// A segment header carries an unknown magic value.
    #[error("unsupported journal segment format version")]
    UnsupportedVersion,

    /// A segment file failed checksum or structural verification.
    ///
    /// Internal recovery signal: a corrupted draft is truncated to its last
    /// commit or deleted, a corrupted finalized or sealed segment aborts
    /// the read.
    #[error("corrupted journal segment file: {message}")]
    CorruptedFile {
        /// Description of the corruption.
        message: String,
    },

    /// A segment file disappeared between being catalogued and opened.
    ///
    /// Internal retry signal for the writer preparation loop.
    #[error("journal segment file is gone")]
    FileGone,

    /// An fsync failed; the journal writer cannot continue safely.
    #[error("fsync failed (unrecoverable without restart): {source}")]
    FsyncFailed {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// No configured seal key matches the key id of a sealed segment.
    #[error("missing seal key")]
    MissingSealKey,

    /// Sealing codec failure.
    #[error("seal error: {0}")]
    Seal(#[from] chronik_sealer::SealError),

    /// A compact timestamp string could not be parsed.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// A file name does not parse as a segment name.
    #[error("invalid segment file name {name:?} ({reason})")]
    InvalidSegmentName {
        /// The offending file name.
        name: String,
        /// What about it failed to parse.
        reason: &'static str,
    },

    /// The operation was cancelled via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Catalog initialization failed earlier; the failure is sticky until
    /// the state is reset.
    #[error("journal state initialization failed: {message}")]
    Initialization {
        /// Description of the original failure.
        message: String,
    },

    /// The journal writer failed earlier; all subsequent writer operations
    /// short-circuit with this error.
    #[error("journal writer previously failed: {message}")]
    WriterFailed {
        /// Description of the original failure.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl JournalError {
    /// Creates a corrupted file error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::CorruptedFile {
            message: message.into(),
        }
    }

    /// Creates an incompatible journal error.
    pub fn incompatible(message: impl Into<String>) -> Self {
        Self::Incompatible {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid segment name error.
    pub fn invalid_segment_name(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidSegmentName {
            name: name.into(),
            reason,
        }
    }

    /// Returns true for [`JournalError::CorruptedFile`].
    #[must_use]
    pub fn is_corrupted(&self) -> bool {
        matches!(self, Self::CorruptedFile { .. })
    }

    /// Returns true for [`JournalError::FileGone`].
    #[must_use]
    pub fn is_file_gone(&self) -> bool {
        matches!(self, Self::FileGone)
    }
}
