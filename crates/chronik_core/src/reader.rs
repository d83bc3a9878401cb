//! Streaming segment reader.
//!
//! Reads one segment file item by item, maintaining the running record id,
//! timestamp and rolling hash, and tracking the last *committed* position.
//! The writer uses the committed position to decide between truncation
//! recovery and deleting an unrecoverable file; cursors use the record
//! stream directly.
//!
//! # Recovery policy
//!
//! Conditions that look like a crash mid-write (missing commit, truncated
//! framing or payload, commit checksum mismatch) are reported as
//! [`JournalError::CorruptedFile`] so the caller can truncate back to the
//! committed prefix. Conditions that can never result from a crash of this
//! code (unknown magic, foreign journal invariant) are fatal instead.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tracing::debug;
use xxhash_rust::xxh64::Xxh64;

use crate::error::{JournalError, JournalResult};
use crate::format::{
    header_checksum, uvarint, SegmentHeader, COMMIT_LEN, MAGIC_V1_DRAFT, MAGIC_V1_FINALIZED,
    MAGIC_V1_SEALED, MAX_RECORD_HEADER_LEN, RECORD_FLAG_COMMIT, RECORD_FLAG_SHIFT,
    SEGMENT_HEADER_SIZE,
};
use crate::journal::JournalShared;
use crate::segment::{Segment, Status};

/// Initial read buffer size; grows for oversized records.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Rounds an allocation up to a power of two, at least 64 KiB.
fn alloc_size(size: usize) -> usize {
    let mut r = 64 * 1024;
    while r < size {
        r <<= 1;
    }
    r
}

/// Streaming reader over a single segment.
pub(crate) struct SegmentReader<'j> {
    j: &'j JournalShared,
    src: Box<dyn Read + 'j>,
    buf: Vec<u8>,
    pos: usize,
    len: usize,

    pub(crate) header: SegmentHeader,
    pub(crate) seg: Segment,

    /// Id of the most recently decoded record.
    pub(crate) rec: u64,
    /// Running timestamp after the most recent record.
    pub(crate) ts: u64,
    /// Bytes of the segment consumed so far, header included.
    pub(crate) size: u64,
    records_in_seg: u64,

    /// Id of the last record covered by a verified commit.
    pub(crate) committed_rec: u64,
    /// Timestamp at the last verified commit.
    pub(crate) committed_ts: u64,
    /// Segment size at the last verified commit.
    pub(crate) committed_size: u64,

    /// Payload of the most recently decoded record; reused across calls.
    data: Vec<u8>,
    pub(crate) data_hash: Xxh64,

    /// Total file size when known; bounds-checks record sizes.
    file_len: Option<u64>,
    unsealed: bool,
}

impl std::fmt::Debug for SegmentReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader").finish_non_exhaustive()
    }
}

impl<'j> SegmentReader<'j> {
    /// Opens a segment for reading, decrypting sealed segments on the fly.
    ///
    /// Returns [`JournalError::FileGone`] if the file no longer exists.
    pub(crate) fn open(j: &'j JournalShared, seg: Segment) -> JournalResult<Self> {
        let path = j.segment_path(&seg);
        let mut file = open_existing(&path)?;
        let file_len = file.metadata()?.len();

        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        read_header_bytes(&mut file, &mut header_bytes)?;
        let header = validate_header(j, &header_bytes, &seg)?;

        let src: Box<dyn Read + 'j> = if seg.status.is_sealed() {
            let opener = chronik_sealer::prepare(file, &header_bytes)?;
            let key = j
                .find_seal_key(opener.key_id())
                .ok_or(JournalError::MissingSealKey)?;
            Box::new(opener.open(key)?)
        } else {
            Box::new(file)
        };

        Ok(Self::from_parts(
            j,
            seg,
            header,
            src,
            // Sealed payload sizes are unrelated to the ciphertext size.
            if seg.status.is_sealed() {
                None
            } else {
                Some(file_len)
            },
        ))
    }

    fn from_parts(
        j: &'j JournalShared,
        seg: Segment,
        header: SegmentHeader,
        src: Box<dyn Read + 'j>,
        file_len: Option<u64>,
    ) -> Self {
        Self {
            j,
            src,
            buf: vec![0u8; READ_BUFFER_SIZE],
            pos: 0,
            len: 0,
            header,
            seg,
            rec: seg.recnum.saturating_sub(1),
            ts: seg.ts,
            size: SEGMENT_HEADER_SIZE as u64,
            records_in_seg: 0,
            committed_rec: 0,
            committed_ts: 0,
            committed_size: SEGMENT_HEADER_SIZE as u64,
            data: Vec::new(),
            data_hash: Xxh64::new(0),
            file_len,
            unsealed: !seg.status.is_sealed(),
        }
    }

    /// Payload of the most recently decoded record.
    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the next record.
    ///
    /// Returns `Ok(true)` when a record was decoded, `Ok(false)` at a clean
    /// end of the segment. Commit markers are consumed and verified
    /// transparently.
    pub(crate) fn next(&mut self) -> JournalResult<bool> {
        loop {
            let available = self.ensure_buffered(MAX_RECORD_HEADER_LEN)?;
            if available == 0 {
                if !self.unsealed || self.size == self.committed_size {
                    return Ok(false);
                }
                self.debug_corruption("end of file without a commit");
                return Err(JournalError::corrupted("end of file without a commit"));
            }

            if self.unsealed && self.buf[self.pos] & RECORD_FLAG_COMMIT != 0 {
                self.read_commit()?;
                continue;
            }

            return self.read_record(available);
        }
    }

    fn read_commit(&mut self) -> JournalResult<()> {
        let available = self.ensure_buffered(COMMIT_LEN)?;
        if available < COMMIT_LEN {
            self.debug_corruption("end of file in the middle of a commit");
            return Err(JournalError::corrupted(
                "end of file in the middle of a commit",
            ));
        }

        let mut commit = [0u8; COMMIT_LEN];
        commit.copy_from_slice(&self.buf[self.pos..self.pos + COMMIT_LEN]);
        self.pos += COMMIT_LEN;

        let actual = u64::from_le_bytes(commit);
        let expected = self.data_hash.digest() | u64::from(RECORD_FLAG_COMMIT);
        // The marker itself becomes part of the running state so that
        // subsequent commits chain.
        self.data_hash.update(&commit);

        if actual != expected {
            self.debug_corruption("commit checksum mismatch");
            return Err(JournalError::corrupted("commit checksum mismatch"));
        }

        self.size += COMMIT_LEN as u64;
        if self.records_in_seg == 0 {
            self.debug_corruption("commit without a prior record");
            return Err(JournalError::corrupted("commit without a prior record"));
        }

        self.committed_rec = self.rec;
        self.committed_ts = self.ts;
        self.committed_size = self.size;
        if self.j.verbose {
            debug!(journal = %self.j.debug_name, segment = %self.seg, "commit decoded");
        }
        Ok(())
    }

    fn read_record(&mut self, available: usize) -> JournalResult<bool> {
        let window_len = available.min(MAX_RECORD_HEADER_LEN);
        let window = &self.buf[self.pos..self.pos + window_len];

        let Some((raw_size, n1)) = uvarint(window) else {
            self.debug_corruption("cannot decode record size");
            return Err(JournalError::corrupted("cannot decode record size"));
        };
        let data_size = if self.unsealed {
            (raw_size >> RECORD_FLAG_SHIFT) as usize
        } else {
            raw_size as usize
        };

        let Some((ts_delta, n2)) = uvarint(&window[n1..]) else {
            self.debug_corruption("cannot decode record timestamp");
            return Err(JournalError::corrupted("cannot decode record timestamp"));
        };

        let n = n1 + n2;
        if let Some(file_len) = self.file_len {
            if self.size + (n + data_size) as u64 > file_len {
                self.debug_corruption("record size exceeds file size");
                return Err(JournalError::corrupted("record size exceeds file size"));
            }
        }

        if self.unsealed {
            self.data_hash.update(&self.buf[self.pos..self.pos + n]);
        }
        self.pos += n;

        self.read_payload(data_size)?;

        self.records_in_seg += 1;
        self.rec += 1;
        self.ts += ts_delta;
        self.size += (n + data_size) as u64;

        if self.unsealed {
            self.data_hash.update(&self.data);
        } else {
            self.committed_rec = self.rec;
            self.committed_ts = self.ts;
            self.committed_size = self.size;
        }

        if self.j.verbose {
            debug!(
                journal = %self.j.debug_name,
                segment = %self.seg,
                record = self.rec,
                size = data_size,
                "record decoded"
            );
        }
        Ok(true)
    }

    fn read_payload(&mut self, size: usize) -> JournalResult<()> {
        if self.data.capacity() < size {
            self.data = Vec::with_capacity(alloc_size(size));
        }
        self.data.clear();

        let from_buf = size.min(self.len - self.pos);
        self.data
            .extend_from_slice(&self.buf[self.pos..self.pos + from_buf]);
        self.pos += from_buf;

        if from_buf < size {
            self.data.resize(size, 0);
            match self.src.read_exact(&mut self.data[from_buf..]) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    self.debug_corruption("end of file while reading record data");
                    return Err(JournalError::corrupted(
                        "end of file while reading record data",
                    ));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Makes up to `want` bytes available at the buffer position; returns
    /// how many actually are. Zero means the source is exhausted.
    fn ensure_buffered(&mut self, want: usize) -> io::Result<usize> {
        let mut available = self.len - self.pos;
        if available >= want {
            return Ok(available);
        }

        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.len, 0);
            self.len = available;
            self.pos = 0;
        }
        if want > self.buf.len() {
            self.buf.resize(want.next_power_of_two(), 0);
        }

        while self.len < self.buf.len() && self.len - self.pos < want {
            match self.src.read(&mut self.buf[self.len..]) {
                Ok(0) => break,
                Ok(n) => self.len += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }

        available = self.len - self.pos;
        Ok(available)
    }

    fn debug_corruption(&self, what: &str) {
        if self.j.verbose {
            debug!(
                journal = %self.j.debug_name,
                segment = %self.seg,
                offset = self.size,
                "corrupted record: {what}"
            );
        }
    }
}

/// Outcome of running a reader over an entire segment.
///
/// Carries everything the writer needs to resume: the running decode state
/// and the last committed position, plus the corruption that stopped the
/// scan, if any.
pub(crate) struct VerifyOutcome {
    pub(crate) rec: u64,
    pub(crate) ts: u64,
    pub(crate) committed_rec: u64,
    pub(crate) committed_ts: u64,
    pub(crate) committed_size: u64,
    pub(crate) size: u64,
    pub(crate) data_hash: Xxh64,
    pub(crate) corruption: Option<JournalError>,
}

/// Scans a segment file to its end or to the first corruption.
///
/// Header-level corruption counts as corruption with nothing committed;
/// incompatibility and unsupported versions propagate as hard errors.
pub(crate) fn verify_segment(
    j: &JournalShared,
    file: &mut File,
    seg: Segment,
) -> JournalResult<VerifyOutcome> {
    let file_len = file.metadata()?.len();

    let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
    if let Err(err) = read_header_bytes(file, &mut header_bytes) {
        return match err {
            JournalError::CorruptedFile { .. } => Ok(VerifyOutcome {
                rec: seg.recnum.saturating_sub(1),
                ts: seg.ts,
                committed_rec: 0,
                committed_ts: 0,
                committed_size: 0,
                size: 0,
                data_hash: Xxh64::new(0),
                corruption: Some(err),
            }),
            other => Err(other),
        };
    }

    let header = match validate_header(j, &header_bytes, &seg) {
        Ok(header) => header,
        Err(err @ JournalError::CorruptedFile { .. }) => {
            return Ok(VerifyOutcome {
                rec: seg.recnum.saturating_sub(1),
                ts: seg.ts,
                committed_rec: 0,
                committed_ts: 0,
                committed_size: 0,
                size: SEGMENT_HEADER_SIZE as u64,
                data_hash: Xxh64::new(0),
                corruption: Some(err),
            })
        }
        Err(other) => return Err(other),
    };

    let mut reader =
        SegmentReader::from_parts(j, seg, header, Box::new(&mut *file), Some(file_len));

    let corruption = loop {
        match reader.next() {
            Ok(true) => {}
            Ok(false) => break None,
            Err(err @ JournalError::CorruptedFile { .. }) => break Some(err),
            Err(other) => return Err(other),
        }
    };

    Ok(VerifyOutcome {
        rec: reader.rec,
        ts: reader.ts,
        committed_rec: reader.committed_rec,
        committed_ts: reader.committed_ts,
        committed_size: reader.committed_size,
        size: reader.size,
        data_hash: reader.data_hash.clone(),
        corruption,
    })
}

/// Loads and validates only the header of a segment.
///
/// Returns [`JournalError::FileGone`] if the file no longer exists.
pub(crate) fn load_segment_header(
    j: &JournalShared,
    seg: &Segment,
) -> JournalResult<SegmentHeader> {
    let path = j.segment_path(seg);
    let mut file = open_existing(&path)?;
    let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
    read_header_bytes(&mut file, &mut header_bytes)?;
    validate_header(j, &header_bytes, seg)
}

fn open_existing(path: &Path) -> JournalResult<File> {
    match File::open(path) {
        Ok(file) => Ok(file),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(JournalError::FileGone),
        Err(err) => Err(err.into()),
    }
}

fn read_header_bytes(
    file: &mut File,
    buf: &mut [u8; SEGMENT_HEADER_SIZE],
) -> JournalResult<()> {
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            Err(JournalError::corrupted("truncated segment header"))
        }
        Err(err) => Err(err.into()),
    }
}

/// Validates header bytes against the expected segment identity.
///
/// The checks mirror the recovery policy: unknown magic is
/// [`JournalError::UnsupportedVersion`], a foreign journal invariant is
/// [`JournalError::Incompatible`], everything else is corruption. A draft
/// file may carry the finalized magic because a crash can land between the
/// header rewrite and the rename.
pub(crate) fn validate_header(
    j: &JournalShared,
    buf: &[u8; SEGMENT_HEADER_SIZE],
    seg: &Segment,
) -> JournalResult<SegmentHeader> {
    let header = SegmentHeader::decode(buf);

    if header.magic != MAGIC_V1_DRAFT
        && header.magic != MAGIC_V1_FINALIZED
        && header.magic != MAGIC_V1_SEALED
    {
        if j.verbose {
            debug!(journal = %j.debug_name, "incompatible header: unknown magic");
        }
        return Err(JournalError::UnsupportedVersion);
    }

    let magic_ok = match seg.status {
        Status::Sealed => header.magic == MAGIC_V1_SEALED,
        Status::Draft => {
            header.magic == MAGIC_V1_DRAFT || header.magic == MAGIC_V1_FINALIZED
        }
        Status::Finalized => header.magic == MAGIC_V1_FINALIZED,
        Status::SealingTemp => false,
    };
    if !magic_ok {
        if j.verbose {
            debug!(journal = %j.debug_name, segment = %seg, "wrong header magic for status");
        }
        return Err(JournalError::corrupted("wrong header magic for status"));
    }

    let checksum = header_checksum(buf);
    if checksum != header.header_checksum {
        if j.verbose {
            debug!(
                journal = %j.debug_name,
                actual = format_args!("{:016x}", header.header_checksum),
                expected = format_args!("{checksum:016x}"),
                "corrupted header: checksum"
            );
        }
        return Err(JournalError::corrupted("header checksum mismatch"));
    }
    if seg.segnum != header.segment_number {
        return Err(JournalError::corrupted("header segment ordinal mismatch"));
    }
    if seg.ts != header.first_timestamp {
        return Err(JournalError::corrupted("header first timestamp mismatch"));
    }
    if seg.recnum != header.first_record_number {
        return Err(JournalError::corrupted("header first record mismatch"));
    }
    if header.journal_invariant != j.journal_invariant {
        if j.verbose {
            debug!(journal = %j.debug_name, "incompatible header: journal invariant");
        }
        return Err(JournalError::incompatible("journal invariant mismatch"));
    }

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::writer::{CloseMode, SegmentWriter};

    fn shared(dir: &tempfile::TempDir) -> JournalShared {
        let mut j = JournalShared::for_tests();
        j.dir = dir.path().to_path_buf();
        j.file_name_suffix = ".wal".to_string();
        j
    }

    /// Writes a committed draft with the given records and returns its
    /// segment.
    fn committed_draft(j: &JournalShared, records: &[&[u8]]) -> Segment {
        let mut sw = SegmentWriter::start(j, 1, 1_000, 1).unwrap();
        for (i, data) in records.iter().enumerate() {
            sw.write_record(1_000 + i as u64, data, 1_000).unwrap();
        }
        sw.commit().unwrap();
        let seg = sw.seg;
        sw.close(j, CloseMode::ContinueLater).unwrap();
        seg
    }

    #[test]
    fn streams_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let j = shared(&dir);
        let seg = committed_draft(&j, &[b"a", b"bb", b"ccc"]);

        let mut reader = SegmentReader::open(&j, seg).unwrap();
        let mut seen = Vec::new();
        while reader.next().unwrap() {
            seen.push((reader.rec, reader.data().to_vec()));
        }
        assert_eq!(
            seen,
            vec![
                (1, b"a".to_vec()),
                (2, b"bb".to_vec()),
                (3, b"ccc".to_vec()),
            ]
        );
        assert_eq!(reader.committed_rec, 3);
        assert_eq!(reader.committed_size, reader.size);
    }

    #[test]
    fn record_larger_than_read_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let j = shared(&dir);
        let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let seg = committed_draft(&j, &[&big, b"tail"]);

        let mut reader = SegmentReader::open(&j, seg).unwrap();
        assert!(reader.next().unwrap());
        assert_eq!(reader.data(), &big[..]);
        assert!(reader.next().unwrap());
        assert_eq!(reader.data(), b"tail");
        assert!(!reader.next().unwrap());
    }

    #[test]
    fn uncommitted_tail_is_reported_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let j = shared(&dir);

        let mut sw = SegmentWriter::start(&j, 1, 1_000, 1).unwrap();
        sw.write_record(1_000, b"committed", 1_000).unwrap();
        sw.commit().unwrap();
        sw.write_record(1_001, b"dangling", 1_001).unwrap();
        let seg = sw.seg;
        sw.close(&j, CloseMode::WithoutCommitting).unwrap();

        let mut reader = SegmentReader::open(&j, seg).unwrap();
        assert!(reader.next().unwrap());
        assert!(reader.next().unwrap());
        let err = reader.next().unwrap_err();
        assert!(err.is_corrupted(), "{err}");
        assert_eq!(reader.committed_rec, 1);
    }

    #[test]
    fn header_checksum_corruption_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let j = shared(&dir);
        let seg = committed_draft(&j, &[b"x"]);

        let path = j.segment_path(&seg);
        let mut data = fs::read(&path).unwrap();
        data[16] ^= 0xFF; // first timestamp field
        fs::write(&path, &data).unwrap();

        let err = SegmentReader::open(&j, seg).unwrap_err();
        assert!(err.is_corrupted(), "{err}");
    }

    #[test]
    fn filename_header_mismatch_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let j = shared(&dir);
        let seg = committed_draft(&j, &[b"x"]);

        // Pretend the file belongs to segment 2.
        let impostor = Segment { segnum: 2, ..seg };
        fs::rename(j.segment_path(&seg), j.segment_path(&impostor)).unwrap();

        let err = SegmentReader::open(&j, impostor).unwrap_err();
        assert!(err.is_corrupted(), "{err}");
    }

    #[test]
    fn foreign_journal_invariant_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let j = shared(&dir);
        let seg = committed_draft(&j, &[b"x"]);

        let mut foreign = shared(&dir);
        foreign.journal_invariant = [0xEE; 32];
        let err = SegmentReader::open(&foreign, seg).unwrap_err();
        assert!(matches!(err, JournalError::Incompatible { .. }), "{err}");
    }

    #[test]
    fn open_missing_file_is_file_gone() {
        let dir = tempfile::tempdir().unwrap();
        let j = shared(&dir);
        let seg = Segment {
            segnum: 1,
            recnum: 1,
            ts: 1_000,
            status: Status::Finalized,
        };
        let err = SegmentReader::open(&j, seg).unwrap_err();
        assert!(err.is_file_gone(), "{err}");
    }

    #[test]
    fn commit_markers_keep_their_low_bit() {
        // The low bit distinguishes commits from records; the reader must
        // compare with the bit set rather than masking it off.
        let dir = tempfile::tempdir().unwrap();
        let j = shared(&dir);
        let seg = committed_draft(&j, &[b"x"]);

        let path = j.segment_path(&seg);
        let mut data = fs::read(&path).unwrap();
        let commit_at = data.len() - 8;
        assert_eq!(data[commit_at] & 1, 1);

        // Clearing the bit turns the marker into record framing, which
        // must not verify as a commit.
        data[commit_at] &= !1;
        fs::write(&path, &data).unwrap();

        let mut reader = SegmentReader::open(&j, seg).unwrap();
        assert!(reader.next().unwrap());
        assert!(reader.next().is_err());
    }
}
