//! Temp-dir journal harness.

use std::fs;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use chronik_core::{timestamp, Clock, Filter, Journal, Options, Record, SealKey};

use crate::bytes::{assert_bytes_eq, expand};
use crate::clock::FakeClock;

/// The sealing key every test journal is configured with.
#[must_use]
pub fn test_seal_key() -> Arc<SealKey> {
    let mut id = [0u8; 32];
    id[0] = b'X';
    let mut material = [0u8; 32];
    for (i, b) in material.iter_mut().enumerate() {
        *b = i as u8 + 1;
    }
    Arc::new(SealKey::new(id, material))
}

/// A journal in a temp directory with a fake clock and a fixed test
/// configuration (`j*.wal` file names, sealing key, verbose logging).
pub struct TestJournal {
    /// The journal under test.
    pub journal: Arc<Journal>,
    /// The injected clock.
    pub clock: Arc<FakeClock>,
    dir: Arc<TempDir>,
}

impl TestJournal {
    /// Creates a journal in a fresh temp directory and starts writing.
    #[must_use]
    pub fn writable(options: Options) -> Self {
        crate::logging::init();
        let dir = Arc::new(TempDir::new().expect("failed to create temp dir"));
        let clock = FakeClock::new();
        Self::open(dir, clock, options)
    }

    /// Opens another journal over the same directory and clock, as if the
    /// process had restarted.
    #[must_use]
    pub fn reopen(&self, options: Options) -> Self {
        Self::open(Arc::clone(&self.dir), Arc::clone(&self.clock), options)
    }

    fn open(dir: Arc<TempDir>, clock: Arc<FakeClock>, mut options: Options) -> Self {
        options.file_name = "j*.wal".to_string();
        options.clock = Some(clock.clone() as Arc<dyn Clock>);
        options.seal_keys = vec![test_seal_key()];
        options.verbose = true;

        let journal = Arc::new(Journal::new(dir.path(), options));
        journal.start_writing();
        Self {
            journal,
            clock,
            dir,
        }
    }

    /// The journal directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Moves the clock forward.
    pub fn advance(&self, d: Duration) {
        self.clock.advance(d);
    }

    /// All file names in the directory, ordered by segment number (the
    /// status character is skipped when comparing, so `W`, `F` and `S`
    /// files of the same segment sort together).
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dir())
            .expect("failed to list journal dir")
            .map(|e| e.expect("dir entry"))
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort_by(|a, b| {
            let ka = a.get(2..).unwrap_or(a);
            let kb = b.get(2..).unwrap_or(b);
            ka.cmp(kb).then_with(|| a.cmp(b))
        });
        names
    }

    /// The raw contents of a file; empty if it does not exist.
    #[must_use]
    pub fn data(&self, name: &str) -> Vec<u8> {
        match fs::read(self.dir().join(name)) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => panic!("failed to read {name}: {err}"),
        }
    }

    /// Overwrites a file with expanded byte-pattern specs.
    pub fn put(&self, name: &str, specs: &[&str]) {
        fs::write(self.dir().join(name), expand(specs)).expect("failed to write file");
    }

    /// Asserts a file's contents against byte-pattern specs.
    pub fn assert_file(&self, name: &str, specs: &[&str]) {
        assert_bytes_eq(&self.data(name), &expand(specs));
    }

    /// Reads every record matching the filter, panicking on errors.
    #[must_use]
    pub fn all(&self, filter: Filter) -> Vec<Record> {
        let mut error = None;
        let records: Vec<Record> = self
            .journal
            .records(filter, |err| error = Some(err))
            .collect();
        if let Some(err) = error {
            panic!("journal error: {err}");
        }
        records
    }
}

impl Deref for TestJournal {
    type Target = Journal;

    fn deref(&self) -> &Journal {
        &self.journal
    }
}

/// Asserts that records have sequential ids starting at `first_id` and
/// match the `"<compact timestamp>:<utf8 data>"` expectations.
///
/// # Panics
///
/// Panics with a readable listing when anything differs.
pub fn recs_eq(records: &[Record], first_id: u64, expected: &[&str]) {
    let actual: Vec<String> = records
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let mut s = String::new();
            let want_id = first_id + i as u64;
            if rec.id != want_id {
                s.push_str(&format!("[**id={},wanted={}**]", rec.id, want_id));
            }
            s.push_str(&timestamp::format_compact(rec.timestamp));
            s.push(':');
            s.push_str(&String::from_utf8_lossy(&rec.data));
            s
        })
        .collect();
    let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    assert_eq!(actual, expected, "records mismatch");
}
