//! # Chronik Testkit
//!
//! Test utilities for Chronik:
//!
//! - A deterministic fake clock.
//! - A byte-pattern DSL for constructing and asserting file contents in
//!   golden and corruption tests.
//! - A temp-dir journal harness with a fixed test configuration.
//! - Tracing initialization for tests.

#![deny(unsafe_code)]

pub mod bytes;
pub mod clock;
pub mod journal;
pub mod logging;

pub use bytes::{expand, hex_dump};
pub use clock::{FakeClock, TEST_EPOCH};
pub use journal::{recs_eq, test_seal_key, TestJournal};
pub use logging::init as init_logging;
