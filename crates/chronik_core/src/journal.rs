//! The journal: configuration and the single-writer facade.
//!
//! A [`Journal`] is a directory of segment files plus configuration. All
//! mutating writer operations serialize on one write lock; the catalog has
//! its own lock that is never held across I/O; seal and trim coordinate
//! through a dedicated try-lock (see `seal.rs`).
//!
//! Writing is lazy: `start_writing` prepares the writer by resuming the
//! last draft segment (running recovery if needed), and the first
//! `write_record` does the same when `start_writing` was skipped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, error};

use chronik_sealer::Key as SealKey;

use crate::catalog::Catalog;
use crate::cursor::{Cursor, Filter, Records};
use crate::error::{JournalError, JournalResult};
use crate::reader::{load_segment_header, SegmentReader};
use crate::segment::Segment;
use crate::summary::{Meta, Summary};
use crate::writer::{CloseMode, SegmentWriter};

/// Default rotation threshold.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// A source of wall-clock time, injectable for tests.
pub trait Clock: Send + Sync {
    /// Current time as milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A shareable cooperative cancellation flag.
///
/// Sealing checks it every ten records; background runners check it
/// between iterations. Cancellation is sticky.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Configuration for a journal.
#[derive(Clone)]
pub struct Options {
    /// File name template with one `*`, e.g. `"mydb-*.wal"`.
    pub file_name: String,
    /// Rotation threshold in bytes.
    pub max_file_size: u64,
    /// Name used in log messages.
    pub debug_name: String,
    /// Identifier written into every header; must match on read.
    pub journal_invariant: [u8; 32],
    /// Second identifier slot, checked the same way.
    pub segment_invariant: [u8; 32],
    /// Commit outstanding records after this long; zero disables.
    pub autocommit_interval: Duration,
    /// Rotate drafts older than this; zero disables.
    pub autorotate_interval: Duration,
    /// Sealing keys; empty disables sealing. The first key seals, reads
    /// pick by the key id recorded in the sealed file.
    pub seal_keys: Vec<Arc<SealKey>>,
    /// Injected clock; defaults to the system clock.
    pub clock: Option<Arc<dyn Clock>>,
    /// Root cancellation token.
    pub cancel: CancelToken,
    /// Where to move quarantined files; defaults to `<dir>/trash`.
    pub trash_dir: Option<PathBuf>,
    /// Enables chatty per-record debug logging.
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            file_name: "*".to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            debug_name: "journal".to_string(),
            journal_invariant: [0; 32],
            segment_invariant: [0; 32],
            autocommit_interval: Duration::ZERO,
            autorotate_interval: Duration::ZERO,
            seal_keys: Vec::new(),
            clock: None,
            cancel: CancelToken::new(),
            trash_dir: None,
            verbose: false,
        }
    }
}

/// Resolved configuration shared by every component of a journal.
pub(crate) struct JournalShared {
    pub(crate) dir: PathBuf,
    pub(crate) file_name_prefix: String,
    pub(crate) file_name_suffix: String,
    pub(crate) debug_name: String,
    pub(crate) max_file_size: u64,
    pub(crate) journal_invariant: [u8; 32],
    pub(crate) segment_invariant: [u8; 32],
    pub(crate) autocommit_interval: Duration,
    pub(crate) autorotate_interval: Duration,
    pub(crate) seal_keys: Vec<Arc<SealKey>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cancel: CancelToken,
    pub(crate) trash_dir: PathBuf,
    pub(crate) verbose: bool,
}

impl JournalShared {
    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn segment_path(&self, seg: &Segment) -> PathBuf {
        self.dir
            .join(seg.file_name(&self.file_name_prefix, &self.file_name_suffix))
    }

    pub(crate) fn find_seal_key(&self, id: &[u8; 32]) -> Option<&Arc<SealKey>> {
        self.seal_keys.iter().find(|k| k.id() == id)
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            dir: PathBuf::new(),
            file_name_prefix: String::new(),
            file_name_suffix: String::new(),
            debug_name: "test".to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            journal_invariant: [0; 32],
            segment_invariant: [0; 32],
            autocommit_interval: Duration::ZERO,
            autorotate_interval: Duration::ZERO,
            seal_keys: Vec::new(),
            clock: Arc::new(SystemClock),
            cancel: CancelToken::new(),
            trash_dir: PathBuf::from("trash"),
            verbose: false,
        }
    }
}

#[derive(Default)]
struct WriterState {
    writable: bool,
    write_err: Option<String>,
    seg_writer: Option<SegmentWriter>,
    /// Ordinal and record id for the next segment to start, valid while
    /// `writable` and no segment writer is open.
    next_segnum: u64,
    next_recnum: u64,
}

enum PrepareOutcome {
    Ready,
    Retry(Segment),
}

/// An append-only, segmented, self-healing journal of byte records.
///
/// Safe to share across threads: readers, the writer, and the seal engine
/// coordinate through internal locks.
pub struct Journal {
    shared: JournalShared,
    state: Mutex<Catalog>,
    writer: Mutex<WriterState>,
    pub(crate) seal_lock: Mutex<()>,
}

impl Journal {
    /// Creates a journal over a directory.
    ///
    /// Nothing is opened or checked until the first read or write; the
    /// directory must exist by then.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, options: Options) -> Self {
        let dir = dir.into();
        let (prefix, suffix) = match options.file_name.split_once('*') {
            Some((prefix, suffix)) => (prefix.to_string(), suffix.to_string()),
            None => (options.file_name.clone(), String::new()),
        };
        let trash_dir = options
            .trash_dir
            .clone()
            .unwrap_or_else(|| dir.join("trash"));
        let shared = JournalShared {
            dir,
            file_name_prefix: prefix,
            file_name_suffix: suffix,
            debug_name: options.debug_name,
            max_file_size: options.max_file_size,
            journal_invariant: options.journal_invariant,
            segment_invariant: options.segment_invariant,
            autocommit_interval: options.autocommit_interval,
            autorotate_interval: options.autorotate_interval,
            seal_keys: options.seal_keys,
            clock: options.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            cancel: options.cancel,
            trash_dir,
            verbose: options.verbose,
        };
        Self {
            shared,
            state: Mutex::new(Catalog::default()),
            writer: Mutex::new(WriterState::default()),
            seal_lock: Mutex::new(()),
        }
    }

    pub(crate) fn shared(&self) -> &JournalShared {
        &self.shared
    }

    /// The name this journal uses in log messages.
    #[must_use]
    pub fn debug_name(&self) -> &str {
        &self.shared.debug_name
    }

    /// Current time from the injected clock, in milliseconds.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.shared.now()
    }

    /// True when sealing keys are configured.
    #[must_use]
    pub fn can_seal(&self) -> bool {
        !self.shared.seal_keys.is_empty()
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Prepares the journal for writing.
    ///
    /// Resumes the last draft segment, running truncation recovery if the
    /// file is corrupted. Idempotent; a no-op after a writer failure. The
    /// first `write_record` performs the same preparation when this was
    /// not called, so calling it early only moves the latency.
    pub fn start_writing(&self) {
        let mut ws = self.writer.lock();
        if ws.writable || ws.write_err.is_some() {
            return;
        }
        match self.prepare_to_write(&mut ws) {
            Ok(()) => ws.writable = true,
            Err(err) => {
                self.fail(&mut ws, err);
            }
        }
    }

    /// Commits, fsyncs and closes the writer, leaving the draft resumable.
    pub fn finish_writing(&self) -> JournalResult<()> {
        let mut ws = self.writer.lock();
        self.finish_writing_locked(&mut ws, CloseMode::ContinueLater)
    }

    /// Appends one record.
    ///
    /// Empty payloads are a no-op. A zero timestamp is replaced with the
    /// current clock. Rotates to a new segment first when the record would
    /// push the current one past the size limit.
    pub fn write_record(&self, timestamp: u64, data: &[u8]) -> JournalResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let ts = if timestamp == 0 {
            self.now()
        } else {
            timestamp
        };

        let mut ws = self.writer.lock();
        self.ensure_prepared(&mut ws)?;

        if let Some(sw) = ws.seg_writer.as_ref() {
            if sw.should_rotate(data.len(), self.shared.max_file_size) {
                if self.shared.verbose {
                    debug!(
                        journal = %self.shared.debug_name,
                        segment = %sw.seg,
                        segment_size = sw.size,
                        data_size = data.len(),
                        "rotating segment"
                    );
                }
                self.close_writer_locked(&mut ws, CloseMode::Finalize)?;
            }
        }

        if ws.seg_writer.is_none() {
            let segnum = ws.next_segnum.max(1);
            let recnum = ws.next_recnum.max(1);
            if self.shared.verbose {
                debug!(
                    journal = %self.shared.debug_name,
                    segment = segnum,
                    record = recnum,
                    "starting segment"
                );
            }
            let sw = match SegmentWriter::start(&self.shared, segnum, ts, recnum) {
                Ok(sw) => sw,
                Err(err) => return Err(self.fail(&mut ws, err)),
            };
            self.state.lock().add_segment(&self.shared, sw.seg);
            ws.seg_writer = Some(sw);
        }

        let wall_now = self.shared.now();
        let sw = ws
            .seg_writer
            .as_mut()
            .expect("segment writer must be open after preparation");
        if let Err(err) = sw.write_record(ts, data, wall_now) {
            return Err(self.fail(&mut ws, err));
        }
        let meta = Meta {
            id: sw.next_rec - 1,
            timestamp: sw.ts,
        };
        self.state.lock().set_last_uncommitted(meta);
        Ok(())
    }

    /// Appends a commit marker covering all uncommitted records.
    ///
    /// A no-op when nothing is open or uncommitted. Does not fsync.
    pub fn commit(&self) -> JournalResult<()> {
        let mut ws = self.writer.lock();
        self.commit_locked(&mut ws)
    }

    /// Forces a segment boundary independent of the size limit.
    ///
    /// Finalizes the current draft; a no-op when there is none. The next
    /// record starts a new segment.
    pub fn rotate(&self) -> JournalResult<()> {
        let mut ws = self.writer.lock();
        self.ensure_prepared(&mut ws)?;
        self.close_writer_locked(&mut ws, CloseMode::Finalize)
    }

    /// Commits if records have been sitting uncommitted for at least the
    /// configured autocommit interval.
    ///
    /// `now` is the sweep's wall clock. The reference point is the wall
    /// clock captured when the first record of the batch was written, not
    /// the record's own timestamp. Returns whether a commit happened.
    pub fn autocommit(&self, now: u64) -> JournalResult<bool> {
        let interval = self.shared.autocommit_interval;
        if interval.is_zero() {
            return Ok(false);
        }
        let mut ws = self.writer.lock();
        let Some(sw) = ws.seg_writer.as_ref() else {
            return Ok(false);
        };
        if !sw.has_uncommitted() {
            return Ok(false);
        }
        let elapsed = Duration::from_millis(now.saturating_sub(sw.first_uncommitted_write_ts));
        if elapsed < interval {
            return Ok(false);
        }
        self.commit_locked(&mut ws)?;
        Ok(true)
    }

    /// Rotates if the current draft is older than the configured
    /// autorotate interval. Returns whether a rotation happened.
    pub fn autorotate(&self, now: u64) -> JournalResult<bool> {
        let interval = self.shared.autorotate_interval;
        if interval.is_zero() {
            return Ok(false);
        }
        let needs = {
            let mut state = self.state.lock();
            state.ensure_initialized(&self.shared)?;
            state.needs_rotation(now, interval)
        };
        if !needs {
            return Ok(false);
        }
        self.rotate()?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Opens a cursor over the records selected by `filter`.
    #[must_use]
    pub fn read(&self, filter: Filter) -> Cursor<'_> {
        Cursor::new(self, filter)
    }

    /// Iterates over the records selected by `filter`.
    ///
    /// Errors do not interrupt the signature: the iterator just ends, and
    /// `fail` receives the error that ended it.
    pub fn records<F>(&self, filter: Filter, fail: F) -> Records<'_, F>
    where
        F: FnMut(JournalError),
    {
        Records::new(self.read(filter), fail)
    }

    /// Returns the segments intersecting `filter`, initializing the
    /// catalog if needed.
    pub fn find_segments(&self, filter: Filter) -> JournalResult<Vec<Segment>> {
        let mut state = self.state.lock();
        state.ensure_initialized(&self.shared)?;
        Ok(state.find_known_segments(&filter))
    }

    /// A snapshot of the catalog, initializing it if needed.
    pub fn summary(&self) -> JournalResult<Summary> {
        let mut state = self.state.lock();
        state.ensure_initialized(&self.shared)?;
        Ok(state.summary())
    }

    /// Whatever is currently known, without touching the file system.
    #[must_use]
    pub fn quick_summary(&self) -> Summary {
        self.state.lock().summary()
    }

    /// Streams every known segment end to end, reporting per-segment
    /// record counts and the first error encountered in each.
    pub fn verify_segments(&self) -> JournalResult<Vec<SegmentVerification>> {
        let segments = self.find_segments(Filter::default())?;
        let mut result = Vec::with_capacity(segments.len());
        for seg in segments {
            let mut records = 0u64;
            let mut error = None;
            match SegmentReader::open(&self.shared, seg) {
                Ok(mut reader) => loop {
                    match reader.next() {
                        Ok(true) => records += 1,
                        Ok(false) => break,
                        Err(err) => {
                            error = Some(err.to_string());
                            break;
                        }
                    }
                },
                Err(err) => error = Some(err.to_string()),
            }
            result.push(SegmentVerification {
                segment: seg,
                records,
                error,
            });
        }
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Catalog access for the seal engine
    // ------------------------------------------------------------------

    pub(crate) fn next_to_seal(&self) -> JournalResult<Option<Segment>> {
        let mut state = self.state.lock();
        state.ensure_initialized(&self.shared)?;
        Ok(state.next_to_seal())
    }

    pub(crate) fn next_to_trim(&self) -> JournalResult<Option<Segment>> {
        let mut state = self.state.lock();
        state.ensure_initialized(&self.shared)?;
        Ok(state.next_to_trim())
    }

    pub(crate) fn set_sealing_temp(&self, seg: Option<Segment>) {
        self.state.lock().set_sealing_temp(seg);
    }

    pub(crate) fn note_segment_added(&self, seg: Segment) {
        self.state.lock().add_segment(&self.shared, seg);
    }

    pub(crate) fn note_segment_gone(&self, seg: Segment) {
        self.state.lock().remove_segment(seg);
    }

    // ------------------------------------------------------------------
    // Writer internals
    // ------------------------------------------------------------------

    fn ensure_prepared(&self, ws: &mut WriterState) -> JournalResult<()> {
        if let Some(message) = &ws.write_err {
            return Err(JournalError::WriterFailed {
                message: message.clone(),
            });
        }
        if ws.writable {
            return Ok(());
        }
        match self.prepare_to_write(ws) {
            Ok(()) => {
                ws.writable = true;
                Ok(())
            }
            Err(err) => Err(self.fail(ws, err)),
        }
    }

    fn prepare_to_write(&self, ws: &mut WriterState) -> JournalResult<()> {
        let mut failed: Option<Segment> = None;
        loop {
            match self.prepare_once(ws, failed)? {
                PrepareOutcome::Ready => return Ok(()),
                PrepareOutcome::Retry(seg) => failed = Some(seg),
            }
        }
    }

    fn prepare_once(
        &self,
        ws: &mut WriterState,
        failed: Option<Segment>,
    ) -> JournalResult<PrepareOutcome> {
        let last = {
            let mut state = self.state.lock();
            state.ensure_initialized(&self.shared)?;
            state.last()
        };
        if self.shared.verbose {
            debug!(
                journal = %self.shared.debug_name,
                last = last.map(|s| s.to_string()).unwrap_or_default(),
                "journal last segment"
            );
        }

        let Some(last) = last else {
            ws.next_segnum = 1;
            ws.next_recnum = 1;
            ws.seg_writer = None;
            return Ok(PrepareOutcome::Ready);
        };

        if failed == Some(last) {
            return Err(JournalError::invalid_operation(format!(
                "failed twice to continue with segment file {last}"
            )));
        }

        if last.status.is_draft() {
            match SegmentWriter::resume(&self.shared, last) {
                Ok(sw) => {
                    let meta = if sw.next_rec > last.recnum {
                        Meta {
                            id: sw.next_rec - 1,
                            timestamp: sw.ts,
                        }
                    } else {
                        Meta {
                            id: last.recnum.saturating_sub(1),
                            timestamp: last.ts,
                        }
                    };
                    self.state.lock().set_last_record(meta, meta);
                    ws.next_segnum = sw.seg.segnum + 1;
                    ws.next_recnum = sw.next_rec;
                    ws.seg_writer = Some(sw);
                    Ok(PrepareOutcome::Ready)
                }
                Err(JournalError::FileGone) => {
                    self.state.lock().reset();
                    Ok(PrepareOutcome::Retry(last))
                }
                Err(err) => Err(err),
            }
        } else {
            match load_segment_header(&self.shared, &last) {
                Ok(header) => {
                    let meta = Meta {
                        id: header.last_record_number,
                        timestamp: header.last_timestamp,
                    };
                    self.state.lock().set_last_record(meta, meta);
                    ws.next_segnum = last.segnum + 1;
                    ws.next_recnum = header.last_record_number + 1;
                    ws.seg_writer = None;
                    Ok(PrepareOutcome::Ready)
                }
                Err(JournalError::FileGone) => {
                    self.state.lock().reset();
                    Ok(PrepareOutcome::Retry(last))
                }
                Err(err) => Err(err),
            }
        }
    }

    fn commit_locked(&self, ws: &mut WriterState) -> JournalResult<()> {
        let Some(sw) = ws.seg_writer.as_mut() else {
            return Ok(());
        };
        match sw.commit() {
            Ok(()) => {
                self.state.lock().mark_committed();
                Ok(())
            }
            Err(err) => {
                self.state.lock().set_last_record_unknown();
                Err(self.fail(ws, err))
            }
        }
    }

    fn finish_writing_locked(
        &self,
        ws: &mut WriterState,
        mode: CloseMode,
    ) -> JournalResult<()> {
        ws.writable = false;
        self.close_writer_locked(ws, mode)
    }

    fn close_writer_locked(&self, ws: &mut WriterState, mode: CloseMode) -> JournalResult<()> {
        let Some(mut sw) = ws.seg_writer.take() else {
            return Ok(());
        };
        match sw.close(&self.shared, mode) {
            Ok(Some((old, new))) => {
                let mut state = self.state.lock();
                state.replace_segment(old, new);
                state.mark_committed();
                ws.next_segnum = new.segnum + 1;
                ws.next_recnum = sw.next_rec;
                Ok(())
            }
            Ok(None) => {
                if mode != CloseMode::WithoutCommitting {
                    self.state.lock().mark_committed();
                }
                Ok(())
            }
            Err(err) => {
                if matches!(err, JournalError::FsyncFailed { .. }) {
                    // TODO: persist a totally-failed sentinel file so the
                    // failure survives restarts.
                    error!(
                        journal = %self.shared.debug_name,
                        error = %err,
                        "fsync failed, journal writer disabled"
                    );
                    if ws.write_err.is_none() {
                        ws.write_err = Some(err.to_string());
                    }
                }
                Err(err)
            }
        }
    }

    /// Records the first writer failure, closes the writer without
    /// committing, and returns the error for propagation.
    fn fail(&self, ws: &mut WriterState, err: JournalError) -> JournalError {
        error!(
            journal = %self.shared.debug_name,
            error = %err,
            "journal writer failed"
        );
        ws.writable = false;
        if let Some(mut sw) = ws.seg_writer.take() {
            let _ = sw.close(&self.shared, CloseMode::WithoutCommitting);
        }
        if ws.write_err.is_none() {
            ws.write_err = Some(err.to_string());
        }
        err
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("debug_name", &self.shared.debug_name)
            .field("dir", &self.shared.dir)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.shared.debug_name)
    }
}

/// Result of verifying one segment via [`Journal::verify_segments`].
#[derive(Debug, Clone)]
pub struct SegmentVerification {
    /// The segment that was verified.
    pub segment: Segment,
    /// Records successfully decoded before the end or the first error.
    pub records: u64,
    /// The error that stopped verification, if any.
    pub error: Option<String>,
}
