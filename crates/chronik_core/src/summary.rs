//! Read-only snapshots of journal state.

use crate::segment::Segment;

/// Id and timestamp of a record, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Meta {
    /// Record id; 0 when unknown.
    pub id: u64,
    /// Record timestamp in milliseconds; 0 when unknown.
    pub timestamp: u64,
}

/// A snapshot of the catalog plus last-record metadata.
///
/// Segment fields are `None` while the corresponding sequence is empty.
/// The last-record metas are zero until the writer has prepared (they are
/// recovered from the last segment on the first write preparation).
#[derive(Debug, Clone, Copy, Default)]
pub struct Summary {
    /// Lowest-ordinal sealed segment.
    pub first_sealed_segment: Option<Segment>,
    /// Highest-ordinal sealed segment.
    pub last_sealed_segment: Option<Segment>,
    /// Lowest-ordinal unsealed (draft or finalized) segment.
    pub first_unsealed_segment: Option<Segment>,
    /// Highest-ordinal unsealed segment.
    pub last_unsealed_segment: Option<Segment>,
    /// Total number of catalogued segments.
    pub segment_count: usize,
    /// First record known to the journal.
    pub first_record: Meta,
    /// Last record covered by a commit.
    pub last_committed: Meta,
    /// Last record written, committed or not.
    pub last_uncommitted: Meta,
}
