//! # Chronik Core
//!
//! An append-only, segmented, write-ahead journal for durable sequences of
//! opaque byte records. A journal is a directory of segment files; the
//! newest segment is the one being written to.
//!
//! Intended uses:
//!
//! - Database WAL files.
//! - Structured log files of various kinds.
//! - Archival of historical database records.
//!
//! Key properties:
//!
//! - Suitable for large numbers of very short records; per-record overhead
//!   can be as low as 2 bytes.
//! - Handles very large records in the same stream.
//! - Self-healing: checksums are verified on open and corrupted tails are
//!   truncated back to the last commit.
//! - Segments rotate automatically at a configurable size, and optionally
//!   by age.
//! - Finalized segments can be sealed (encrypted and authenticated) and
//!   their plaintext sources trimmed.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! let journal = Journal::new("/var/lib/app/journal", Options {
//!     file_name: "app-*.wal".to_string(),
//!     ..Options::default()
//! });
//! journal.start_writing();
//! journal.write_record(0, b"hello")?;
//! journal.commit()?;
//! for record in journal.records(Filter::default(), |err| eprintln!("{err}")) {
//!     println!("{}: {:?}", record.id, record.data);
//! }
//! journal.finish_writing()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod cursor;
mod error;
mod format;
mod journal;
mod merge;
mod reader;
mod seal;
mod segment;
mod set;
mod summary;
pub mod timestamp;
mod trash;
mod writer;

pub use cursor::{Cursor, Filter, Record, Records};
pub use error::{JournalError, JournalResult};
pub use format::{SegmentHeader, SEGMENT_HEADER_SIZE};
pub use journal::{
    CancelToken, Clock, Journal, Options, SegmentVerification, SystemClock,
    DEFAULT_MAX_FILE_SIZE,
};
pub use merge::{merged_records, MergedRecords, RecordWithSource};
pub use segment::{format_segment_name, parse_segment_name, Segment, Status};
pub use set::{Set, SetOptions, SetRunner};
pub use summary::{Meta, Summary};

pub use chronik_sealer::Key as SealKey;
