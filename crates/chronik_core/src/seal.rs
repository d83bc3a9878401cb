//! Seal and trim: converting finalized segments into sealed copies.
//!
//! Sealing streams a finalized segment through the sealing codec into a
//! `T…` temp file, then renames it to `S…` atomically. Trimming deletes a
//! finalized segment once its sealed copy exists. Both operations are
//! opportunistic: they take a try-lock and simply return when another seal
//! or trim is running, expecting to be reinvoked by the next sweep. Both
//! are idempotent.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use chronik_sealer::SealOptions;

use crate::error::{JournalError, JournalResult};
use crate::format::{
    append_sealed_record_header, SegmentHeader, MAGIC_V1_SEALED, MAX_RECORD_HEADER_LEN,
    SEGMENT_HEADER_SIZE,
};
use crate::journal::{CancelToken, Journal, JournalShared};
use crate::reader::SegmentReader;
use crate::segment::{Segment, Status};

impl Journal {
    /// Seals the next finalized segment, if any.
    ///
    /// A no-op returning `Ok(None)` when sealing is not configured, there
    /// is nothing to seal, or another seal/trim is in progress. On any
    /// failure the temp file is removed and the finalized source is left
    /// untouched.
    pub fn seal(&self, cancel: &CancelToken) -> JournalResult<Option<Segment>> {
        if !self.can_seal() {
            return Ok(None);
        }

        let Some(next) = self.next_to_seal()? else {
            return Ok(None);
        };
        if !next.status.can_seal() {
            return Ok(None);
        }

        let Some(_guard) = self.seal_lock.try_lock() else {
            return Ok(None);
        };

        // Somebody may have sealed it while we were taking the lock.
        let Some(next) = self.next_to_seal()? else {
            return Ok(None);
        };
        if !next.status.can_seal() {
            return Ok(None);
        }

        if cancel.is_cancelled() {
            return Err(JournalError::Cancelled);
        }

        let started = Instant::now();
        let j = self.shared();
        let key = Arc::clone(&j.seal_keys[0]);

        let mut source = SegmentReader::open(j, next)?;
        let in_size = fs::metadata(j.segment_path(&next))?.len();

        let temp_seg = next.with_status(Status::SealingTemp);
        let final_seg = next.with_status(Status::Sealed);
        let temp_path = j.segment_path(&temp_seg);
        let final_path = j.segment_path(&final_seg);

        self.set_sealing_temp(Some(temp_seg));
        let result = seal_stream(j, &mut source, &key, &temp_seg, &temp_path, cancel);
        self.set_sealing_temp(None);

        match result {
            Ok(out_size) => {
                fs::rename(&temp_path, &final_path)?;
                debug!(
                    journal = %j.debug_name,
                    segment = %final_seg,
                    duration_ms = started.elapsed().as_millis() as u64,
                    in_size,
                    out_size,
                    "segment sealed"
                );
                self.note_segment_added(final_seg);
                Ok(Some(final_seg))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                Err(err)
            }
        }
    }

    /// Deletes the next finalized segment that already has a sealed copy.
    ///
    /// Returns the removed segment, or `Ok(None)` when there is nothing to
    /// trim or another seal/trim is in progress.
    pub fn trim(&self) -> JournalResult<Option<Segment>> {
        let Some(next) = self.next_to_trim()? else {
            return Ok(None);
        };
        if !next.status.can_seal() {
            return Ok(None);
        }

        let Some(_guard) = self.seal_lock.try_lock() else {
            return Ok(None);
        };

        let Some(next) = self.next_to_trim()? else {
            return Ok(None);
        };
        if !next.status.can_seal() {
            return Ok(None);
        }

        fs::remove_file(self.shared().segment_path(&next))?;
        self.note_segment_gone(next);
        Ok(Some(next))
    }

    /// One seal attempt followed by one trim attempt.
    ///
    /// Returns the number of actions performed (0 to 2).
    pub fn seal_and_trim_once(&self, cancel: &CancelToken) -> JournalResult<usize> {
        let mut actions = 0;
        if !cancel.is_cancelled() && self.seal(cancel)?.is_some() {
            actions += 1;
        }
        if !cancel.is_cancelled() && self.trim()?.is_some() {
            actions += 1;
        }
        Ok(actions)
    }

    /// Seals and trims until there is nothing left to do.
    ///
    /// Returns the number of actions performed.
    pub fn seal_and_trim_all(&self, cancel: &CancelToken) -> JournalResult<usize> {
        let mut actions = 0;
        while !cancel.is_cancelled() {
            if self.seal(cancel)?.is_none() {
                break;
            }
            actions += 1;
        }
        while !cancel.is_cancelled() {
            if self.trim()?.is_none() {
                break;
            }
            actions += 1;
        }
        Ok(actions)
    }
}

/// Streams the source segment through the sealing codec into `temp_path`.
///
/// Returns the size of the sealed output file.
fn seal_stream(
    j: &JournalShared,
    source: &mut SegmentReader<'_>,
    key: &chronik_sealer::Key,
    temp_seg: &Segment,
    temp_path: &std::path::Path,
    cancel: &CancelToken,
) -> JournalResult<u64> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_path)?;

    // The sealed header repeats the source identity and carries the last
    // record meta copied from the finalized source. It doubles as the
    // associated data binding the sealed stream to this exact segment.
    let mut hbuf = [0u8; SEGMENT_HEADER_SIZE];
    SegmentHeader {
        magic: MAGIC_V1_SEALED,
        segment_number: temp_seg.segnum,
        first_timestamp: temp_seg.ts,
        first_record_number: temp_seg.recnum,
        last_timestamp: source.header.last_timestamp,
        last_record_number: source.header.last_record_number,
        journal_invariant: j.journal_invariant,
        segment_invariant: j.segment_invariant,
        unsealed_data_size: 0,
        header_checksum: 0,
    }
    .encode(&mut hbuf);
    file.write_all(&hbuf)?;

    let mut sealer = chronik_sealer::seal(&mut file, key, &hbuf, &SealOptions::default())?;

    let mut ts = temp_seg.ts;
    let mut count = 0u64;
    let mut scratch = Vec::with_capacity(MAX_RECORD_HEADER_LEN);
    while source.next()? {
        let ts_delta = if source.ts > ts {
            let delta = source.ts - ts;
            ts = source.ts;
            delta
        } else {
            0
        };

        scratch.clear();
        append_sealed_record_header(&mut scratch, source.data().len(), ts_delta);
        sealer.write_plaintext(&scratch)?;
        sealer.write_plaintext(source.data())?;

        count += 1;
        if count % 10 == 0 && cancel.is_cancelled() {
            return Err(JournalError::Cancelled);
        }
    }

    sealer.finish()?;
    file.sync_all()?;
    Ok(file.metadata()?.len())
}
