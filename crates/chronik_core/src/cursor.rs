//! Reading records back: filters, cursors and the records iterator.

use std::collections::VecDeque;

use crate::error::{JournalError, JournalResult};
use crate::journal::Journal;
use crate::reader::SegmentReader;
use crate::segment::Segment;

/// Bounds for reading records.
///
/// Zero-valued bounds are unbounded. `limit` caps the number of records
/// returned; combined with `latest` it selects the *newest* `limit`
/// committed records instead of the oldest ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filter {
    /// Lowest record id to return.
    pub min_record_id: u64,
    /// Lowest timestamp to return, milliseconds.
    pub min_timestamp: u64,
    /// Highest record id to return; 0 means unbounded.
    pub max_record_id: u64,
    /// Highest timestamp to return; 0 means unbounded.
    pub max_timestamp: u64,
    /// Maximum number of records to return; 0 means unbounded.
    pub limit: usize,
    /// With `limit`, select the newest records instead of the oldest.
    pub latest: bool,
}

/// One journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record id, monotonically increasing from 1 within a journal.
    pub id: u64,
    /// Record timestamp, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Opaque payload.
    pub data: Vec<u8>,
}

/// A streaming cursor over the records selected by a [`Filter`].
///
/// Created by [`Journal::read`]. Segments are opened lazily, one at a
/// time, in ascending ordinal order. An error ends the cursor; subsequent
/// calls return `Ok(None)`.
pub struct Cursor<'j> {
    j: &'j Journal,
    filter: Filter,
    effective: Filter,
    segments: VecDeque<Segment>,
    reader: Option<SegmentReader<'j>>,
    remaining: Option<usize>,
    started: bool,
    done: bool,
}

impl<'j> Cursor<'j> {
    pub(crate) fn new(j: &'j Journal, filter: Filter) -> Self {
        Self {
            j,
            filter,
            effective: filter,
            segments: VecDeque::new(),
            reader: None,
            remaining: None,
            started: false,
            done: false,
        }
    }

    /// Advances to the next matching record.
    ///
    /// Returns `Ok(None)` at the end of the selection. After an error the
    /// cursor is finished and keeps returning `Ok(None)`.
    pub fn next(&mut self) -> JournalResult<Option<Record>> {
        if self.done {
            return Ok(None);
        }
        match self.advance() {
            Ok(record) => {
                if record.is_none() {
                    self.done = true;
                }
                Ok(record)
            }
            Err(err) => {
                self.done = true;
                self.reader = None;
                Err(err)
            }
        }
    }

    fn advance(&mut self) -> JournalResult<Option<Record>> {
        if !self.started {
            self.start()?;
        }

        if matches!(self.remaining, Some(0)) {
            return Ok(None);
        }

        loop {
            if self.reader.is_none() {
                let Some(seg) = self.segments.pop_front() else {
                    return Ok(None);
                };
                self.reader = Some(SegmentReader::open(self.j.shared(), seg)?);
            }

            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            if !reader.next()? {
                self.reader = None;
                continue;
            }

            let id = reader.rec;
            let timestamp = reader.ts;
            let f = &self.effective;
            if id < f.min_record_id || timestamp < f.min_timestamp {
                continue;
            }
            if f.max_record_id > 0 && id > f.max_record_id {
                continue;
            }
            if f.max_timestamp > 0 && timestamp > f.max_timestamp {
                continue;
            }

            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Ok(Some(Record {
                id,
                timestamp,
                data: reader.data().to_vec(),
            }));
        }
    }

    /// Resolves limit/latest against the summary and builds the segment
    /// list.
    fn start(&mut self) -> JournalResult<()> {
        self.started = true;
        let mut filter = self.filter;

        if filter.limit > 0 {
            let summary = self.j.summary()?;
            if filter.latest {
                let last = summary.last_committed.id;
                let min = last.saturating_sub(filter.limit as u64 - 1).max(1);
                filter.min_record_id = filter.min_record_id.max(min);
            } else {
                let first = filter.min_record_id.max(summary.first_record.id).max(1);
                filter.min_record_id = first;
                let max = first + filter.limit as u64 - 1;
                filter.max_record_id = if filter.max_record_id == 0 {
                    max
                } else {
                    filter.max_record_id.min(max)
                };
            }
            self.remaining = Some(filter.limit);
        }

        self.effective = filter;
        self.segments = self.j.find_segments(filter)?.into();
        Ok(())
    }
}

/// Iterator over records that reports errors through a callback.
///
/// Produced by [`Journal::records`]. The callback receives the error that
/// ended the iteration, if any, after the sequence stops.
pub struct Records<'j, F>
where
    F: FnMut(JournalError),
{
    cursor: Cursor<'j>,
    fail: F,
}

impl<'j, F> Records<'j, F>
where
    F: FnMut(JournalError),
{
    pub(crate) fn new(cursor: Cursor<'j>, fail: F) -> Self {
        Self { cursor, fail }
    }
}

impl<'j, F> Iterator for Records<'j, F>
where
    F: FnMut(JournalError),
{
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        match self.cursor.next() {
            Ok(record) => record,
            Err(err) => {
                (self.fail)(err);
                None
            }
        }
    }
}
