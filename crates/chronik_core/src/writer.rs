//! Segment writer.
//!
//! Owns the draft segment's file handle. A writer is either started fresh
//! (new draft with a placeholder header) or resumed from an existing draft,
//! in which case the file is verified and, when corrupted past the last
//! commit, truncated back to it.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::{debug, warn};
use xxhash_rust::xxh64::Xxh64;

use crate::error::{JournalError, JournalResult};
use crate::format::{
    append_record_header, SegmentHeader, COMMIT_LEN, MAGIC_V1_DRAFT, MAGIC_V1_FINALIZED,
    MAX_RECORD_HEADER_LEN, RECORD_FLAG_COMMIT, SEGMENT_HEADER_SIZE,
};
use crate::journal::JournalShared;
use crate::reader::verify_segment;
use crate::segment::{Segment, Status};

/// How a segment writer is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseMode {
    /// Commit and fsync; the draft stays a draft for later resumption.
    ContinueLater,
    /// Close the handle without committing; used on error paths.
    WithoutCommitting,
    /// Commit, fsync, rewrite the header and rename the draft to finalized.
    Finalize,
}

impl CloseMode {
    fn should_commit(self) -> bool {
        self != Self::WithoutCommitting
    }

    fn should_finalize(self) -> bool {
        self == Self::Finalize
    }
}

/// Writer over a single draft segment.
pub(crate) struct SegmentWriter {
    file: Option<fs::File>,
    path: PathBuf,
    pub(crate) seg: Segment,
    /// Running timestamp of the last written record.
    pub(crate) ts: u64,
    /// Id the next record will receive.
    pub(crate) next_rec: u64,
    /// Current segment size in bytes, header included.
    pub(crate) size: u64,
    data_hash: Xxh64,
    uncommitted: bool,
    modified: bool,
    /// Wall clock captured when the first record of the current uncommitted
    /// batch was written; drives autocommit.
    pub(crate) first_uncommitted_write_ts: u64,
    scratch: Vec<u8>,
}

impl std::fmt::Debug for SegmentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter").finish_non_exhaustive()
    }
}

impl SegmentWriter {
    /// Creates a new draft segment and writes its placeholder header.
    ///
    /// On failure the partially created file is removed. The caller is
    /// responsible for adding the returned segment to the catalog.
    pub(crate) fn start(
        j: &JournalShared,
        segnum: u64,
        ts: u64,
        rec: u64,
    ) -> JournalResult<Self> {
        let seg = Segment {
            segnum,
            recnum: rec,
            ts,
            status: Status::Draft,
        };
        let path = j.segment_path(&seg);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut hbuf = [0u8; SEGMENT_HEADER_SIZE];
        draft_header(j, &seg).encode(&mut hbuf);

        if let Err(err) = file.write_all(&hbuf) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(err.into());
        }

        Ok(Self {
            file: Some(file),
            path,
            seg,
            ts,
            next_rec: rec,
            size: SEGMENT_HEADER_SIZE as u64,
            data_hash: Xxh64::new(0),
            uncommitted: false,
            modified: true,
            first_uncommitted_write_ts: 0,
            scratch: Vec::with_capacity(MAX_RECORD_HEADER_LEN),
        })
    }

    /// Resumes writing to an existing draft segment.
    ///
    /// Verifies the file first. A file that is corrupted but has at least
    /// one committed record is truncated back to the committed prefix and
    /// re-verified; a file with nothing committed is deleted and reported
    /// as [`JournalError::FileGone`] so the caller can retry against the
    /// new last segment.
    pub(crate) fn resume(j: &JournalShared, seg: Segment) -> JournalResult<Self> {
        let path = j.segment_path(&seg);
        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(JournalError::FileGone)
            }
            Err(err) => return Err(err.into()),
        };

        let mut outcome = verify_segment(j, &mut file, seg)?;

        if let Some(corruption) = outcome.corruption.take() {
            if outcome.committed_rec == 0 {
                warn!(
                    journal = %j.debug_name,
                    segment = %seg,
                    error = %corruption,
                    "deleting completely corrupted draft"
                );
                drop(file);
                fs::remove_file(&path)?;
                return Err(JournalError::FileGone);
            }

            warn!(
                journal = %j.debug_name,
                segment = %seg,
                record = outcome.committed_rec,
                error = %corruption,
                "recovering corrupted draft by truncation"
            );
            file.set_len(outcome.committed_size)?;
            file.seek(SeekFrom::Start(0))?;

            outcome = verify_segment(j, &mut file, seg)?;
            if let Some(err) = outcome.corruption {
                return Err(JournalError::invalid_operation(format!(
                    "failed to recover corrupted draft segment {seg}: {err}"
                )));
            }
            assert_eq!(
                outcome.size, outcome.committed_size,
                "segment recovery verification mismatch"
            );
            if j.verbose {
                debug!(journal = %j.debug_name, segment = %seg, "segment recovered");
            }
        }

        file.seek(SeekFrom::Start(outcome.committed_size))?;

        if j.verbose {
            debug!(
                journal = %j.debug_name,
                segment = %seg,
                record = outcome.committed_rec,
                timestamp = outcome.committed_ts,
                size = outcome.committed_size,
                "draft resumed"
            );
        }

        Ok(Self {
            file: Some(file),
            path,
            seg,
            ts: outcome.ts,
            next_rec: outcome.rec + 1,
            size: outcome.committed_size,
            data_hash: outcome.data_hash,
            uncommitted: false,
            modified: false,
            first_uncommitted_write_ts: 0,
            scratch: Vec::with_capacity(MAX_RECORD_HEADER_LEN),
        })
    }

    /// Appends one record.
    ///
    /// `wall_now` is the current wall clock, captured for autocommit when
    /// this record opens a new uncommitted batch.
    pub(crate) fn write_record(
        &mut self,
        ts: u64,
        data: &[u8],
        wall_now: u64,
    ) -> JournalResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(JournalError::invalid_operation(
                "segment writer is closed",
            ));
        };

        // Timestamps never run backwards within a segment; late records are
        // clamped to the running timestamp by writing a zero delta.
        let mut ts_delta = 0;
        if ts > self.ts {
            ts_delta = ts - self.ts;
            self.ts = ts;
        }

        self.scratch.clear();
        append_record_header(&mut self.scratch, data.len(), ts_delta);

        self.data_hash.update(&self.scratch);
        file.write_all(&self.scratch)?;

        self.data_hash.update(data);
        file.write_all(data)?;

        if !self.uncommitted {
            self.first_uncommitted_write_ts = wall_now;
        }
        self.uncommitted = true;
        self.modified = true;
        self.next_rec += 1;
        self.size += (self.scratch.len() + data.len()) as u64;
        Ok(())
    }

    /// Appends a commit marker covering everything since the last one.
    ///
    /// No-op when nothing is uncommitted. Does not fsync; durability comes
    /// from [`SegmentWriter::close`].
    pub(crate) fn commit(&mut self) -> JournalResult<()> {
        if !self.uncommitted {
            return Ok(());
        }
        let Some(file) = self.file.as_mut() else {
            return Err(JournalError::invalid_operation(
                "segment writer is closed",
            ));
        };

        self.uncommitted = false;
        self.modified = true;
        self.size += COMMIT_LEN as u64;

        let value = self.data_hash.digest() | u64::from(RECORD_FLAG_COMMIT);
        let buf = value.to_le_bytes();
        self.data_hash.update(&buf);
        file.write_all(&buf)?;
        Ok(())
    }

    /// Returns true when there are records not yet covered by a commit.
    pub(crate) fn has_uncommitted(&self) -> bool {
        self.uncommitted
    }

    /// Closes the writer.
    ///
    /// Returns the `(old, new)` segment pair when the draft was finalized,
    /// so the caller can update the catalog. The file handle is closed in
    /// every case, including errors.
    pub(crate) fn close(
        &mut self,
        j: &JournalShared,
        mode: CloseMode,
    ) -> JournalResult<Option<(Segment, Segment)>> {
        if self.file.is_none() {
            return Ok(None);
        }
        let result = self.close_inner(j, mode);
        self.file = None;
        result
    }

    fn close_inner(
        &mut self,
        j: &JournalShared,
        mode: CloseMode,
    ) -> JournalResult<Option<(Segment, Segment)>> {
        if !mode.should_commit() {
            return Ok(None);
        }

        self.commit()?;
        if self.modified {
            let Some(file) = self.file.as_mut() else {
                return Ok(None);
            };
            file.sync_all()
                .map_err(|source| JournalError::FsyncFailed { source })?;
        }

        if !mode.should_finalize() || self.seg.status != Status::Draft {
            return Ok(None);
        }

        let mut hbuf = [0u8; SEGMENT_HEADER_SIZE];
        SegmentHeader {
            magic: MAGIC_V1_FINALIZED,
            segment_number: self.seg.segnum,
            first_timestamp: self.seg.ts,
            first_record_number: self.seg.recnum,
            last_timestamp: self.ts,
            last_record_number: self.next_rec - 1,
            journal_invariant: j.journal_invariant,
            segment_invariant: j.segment_invariant,
            unsealed_data_size: 0,
            header_checksum: 0,
        }
        .encode(&mut hbuf);

        {
            let Some(file) = self.file.as_mut() else {
                return Ok(None);
            };
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&hbuf)?;
        }
        // Close before the rename; some platforms refuse to rename open
        // files.
        self.file = None;

        let old_seg = self.seg;
        self.seg.status = Status::Finalized;
        let new_path = j.segment_path(&self.seg);
        fs::rename(&self.path, &new_path)?;
        self.path = new_path;

        Ok(Some((old_seg, self.seg)))
    }

    /// True when appending `size` more bytes would exceed the limit.
    pub(crate) fn should_rotate(&self, size: usize, max_file_size: u64) -> bool {
        self.size + size as u64 > max_file_size
    }
}

fn draft_header(j: &JournalShared, seg: &Segment) -> SegmentHeader {
    SegmentHeader {
        magic: MAGIC_V1_DRAFT,
        segment_number: seg.segnum,
        first_timestamp: seg.ts,
        first_record_number: seg.recnum,
        last_timestamp: 0,
        last_record_number: 0,
        journal_invariant: j.journal_invariant,
        segment_invariant: j.segment_invariant,
        unsealed_data_size: 0,
        header_checksum: 0,
    }
}
