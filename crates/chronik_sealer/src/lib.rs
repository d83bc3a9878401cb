//! # Chronik Sealer
//!
//! Streaming authenticated encryption for sealed journal segments.
//!
//! A sealed segment keeps its 128-byte header in plaintext; everything after
//! it is a sealed stream produced by this crate. The stream is bound to the
//! header by passing the header bytes as associated data, so a sealed body
//! cannot be transplanted under a different header.
//!
//! ## Stream format
//!
//! ```text
//! preamble = magic (8) | key id (32) | nonce prefix (8)
//! chunk    = flag (1) | ciphertext length (4, LE) | ciphertext
//! ```
//!
//! Chunks are AES-256-GCM, each carrying its own authentication tag. The
//! nonce is `prefix || chunk counter`, so chunks cannot be reordered or
//! replayed within a stream. The last chunk is flagged final; a stream that
//! ends without one was truncated.
//!
//! ## Example
//!
//! ```rust,ignore
//! let key = Key::generate([7u8; 32]);
//! let mut sealed = Vec::new();
//! let mut w = seal(&mut sealed, &key, b"header", &SealOptions::default())?;
//! w.write_all(b"payload")?;
//! w.finish()?;
//!
//! let opener = prepare(&sealed[..], b"header")?;
//! let mut r = opener.open(&key)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;
mod stream;

pub use error::{SealError, SealResult};
pub use key::{Key, KEY_ID_SIZE, KEY_SIZE};
pub use stream::{prepare, seal, SealOpener, SealOptions, SealReader, SealWriter};
