//! Merging records from multiple journals.
//!
//! A k-way heap merge over per-journal cursors. Records come out ordered
//! by timestamp, then by source id for stability, then by record id.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::cursor::{Cursor, Filter, Record};
use crate::error::JournalError;
use crate::journal::Journal;

/// A record together with the id of the journal it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordWithSource {
    /// The record itself.
    pub record: Record,
    /// Caller-assigned id of the source journal.
    pub source: u64,
}

struct HeapEntry<'j> {
    key: (u64, u64, u64),
    record: Record,
    source: u64,
    cursor: Cursor<'j>,
}

impl<'j> HeapEntry<'j> {
    fn new(source: u64, record: Record, cursor: Cursor<'j>) -> Self {
        Self {
            key: (record.timestamp, source, record.id),
            record,
            source,
            cursor,
        }
    }
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Iterator over the merged records of several journals.
///
/// Produced by [`merged_records`]. A journal whose cursor fails is dropped
/// from the merge after reporting the error; the remaining journals keep
/// going.
pub struct MergedRecords<'j, F>
where
    F: FnMut(JournalError),
{
    heap: BinaryHeap<Reverse<HeapEntry<'j>>>,
    fail: F,
    done: bool,
}

/// Merges the filtered records of several journals into one ordered
/// stream.
///
/// `journals` pairs a caller-assigned source id with each journal; the id
/// breaks ordering ties and is reported back on every record. Errors go to
/// `fail`; an error while opening the merge aborts it, an error on an
/// already-merging journal only removes that journal.
pub fn merged_records<'j, I, F>(journals: I, filter: Filter, fail: F) -> MergedRecords<'j, F>
where
    I: IntoIterator<Item = (u64, &'j Journal)>,
    F: FnMut(JournalError),
{
    let mut merged = MergedRecords {
        heap: BinaryHeap::new(),
        fail,
        done: false,
    };

    for (source, journal) in journals {
        let mut cursor = journal.read(filter);
        match cursor.next() {
            Ok(Some(record)) => {
                merged
                    .heap
                    .push(Reverse(HeapEntry::new(source, record, cursor)));
            }
            Ok(None) => {}
            Err(err) => {
                (merged.fail)(err);
                merged.done = true;
                return merged;
            }
        }
    }
    merged
}

impl<F> Iterator for MergedRecords<'_, F>
where
    F: FnMut(JournalError),
{
    type Item = RecordWithSource;

    fn next(&mut self) -> Option<RecordWithSource> {
        if self.done {
            return None;
        }
        let Reverse(mut entry) = self.heap.pop()?;

        let result = RecordWithSource {
            record: entry.record.clone(),
            source: entry.source,
        };

        match entry.cursor.next() {
            Ok(Some(record)) => {
                entry.key = (record.timestamp, entry.source, record.id);
                entry.record = record;
                self.heap.push(Reverse(entry));
            }
            Ok(None) => {}
            Err(err) => (self.fail)(err),
        }

        Some(result)
    }
}
