//! Segment identity: status, ordinals, and the file name codec.
//!
//! Everything the catalog needs to know about a segment is encoded in its
//! file name, so the directory can be indexed without opening a single
//! file:
//!
//! ```text
//! <prefix><status><segnum:010>-<YYYYMMDDTHHMMSSMMM>-<recnum:012><suffix>
//! ```
//!
//! The status character orders drafts, finalized and sealed copies of the
//! same ordinal apart; past the prefix and status, lexicographic order is
//! segment-number order.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{JournalError, JournalResult};
use crate::summary::Meta;
use crate::timestamp;

/// Lifecycle status of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    /// The segment is being written to.
    Draft,
    /// The segment is complete; its header carries the last record meta.
    Finalized,
    /// An authenticated, encrypted copy produced by the sealer.
    Sealed,
    /// Transient output of an in-progress seal; never read by consumers.
    SealingTemp,
}

impl Status {
    /// Returns true for sealed segments.
    #[must_use]
    pub const fn is_sealed(self) -> bool {
        matches!(self, Self::Sealed)
    }

    /// Returns true for draft segments.
    #[must_use]
    pub const fn is_draft(self) -> bool {
        matches!(self, Self::Draft)
    }

    /// Returns true if a segment in this status can be sealed.
    #[must_use]
    pub const fn can_seal(self) -> bool {
        matches!(self, Self::Finalized)
    }

    pub(crate) const fn prefix(self) -> char {
        match self {
            Self::Draft => 'W',
            Self::Finalized => 'F',
            Self::Sealed => 'S',
            Self::SealingTemp => 'T',
        }
    }

    pub(crate) const fn from_prefix(c: char) -> Option<Self> {
        match c {
            'W' => Some(Self::Draft),
            'F' => Some(Self::Finalized),
            'S' => Some(Self::Sealed),
            'T' => Some(Self::SealingTemp),
            _ => None,
        }
    }
}

/// A segment as known to the catalog: ordinal, first record meta, status.
///
/// This is a small value type derived from the file name alone. The
/// `recnum` and `ts` fields describe the segment's *first* record; the
/// last record is only known from the header of a finalized segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    /// Segment ordinal, strictly increasing across the journal, from 1.
    pub segnum: u64,
    /// Id of the first record in the segment.
    pub recnum: u64,
    /// Timestamp of the first record, milliseconds.
    pub ts: u64,
    /// Lifecycle status.
    pub status: Status,
}

impl Segment {
    /// The first record's id and timestamp.
    #[must_use]
    pub fn first_record(&self) -> Meta {
        Meta {
            id: self.recnum,
            timestamp: self.ts,
        }
    }

    /// Returns a copy of this segment with a different status.
    #[must_use]
    pub(crate) fn with_status(self, status: Status) -> Self {
        Self { status, ..self }
    }

    /// Renders the file name for this segment under the given template.
    #[must_use]
    pub fn file_name(&self, prefix: &str, suffix: &str) -> String {
        format_segment_name(prefix, suffix, self)
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segnum
            .cmp(&other.segnum)
            .then_with(|| self.status.cmp(&other.status))
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_segment_name("", "", self))
    }
}

/// Formats a segment file name.
#[must_use]
pub fn format_segment_name(prefix: &str, suffix: &str, seg: &Segment) -> String {
    format!(
        "{prefix}{}{:010}-{}-{:012}{suffix}",
        seg.status.prefix(),
        seg.segnum,
        timestamp::format_compact(seg.ts),
        seg.recnum,
    )
}

/// Parses a segment file name produced by [`format_segment_name`].
pub fn parse_segment_name(prefix: &str, suffix: &str, name: &str) -> JournalResult<Segment> {
    let bad = |reason| JournalError::invalid_segment_name(name, reason);

    let rest = name
        .strip_prefix(prefix)
        .ok_or_else(|| bad("missing prefix"))?;
    let rest = rest
        .strip_suffix(suffix)
        .ok_or_else(|| bad("missing suffix"))?;

    let mut chars = rest.chars();
    let status = chars
        .next()
        .and_then(Status::from_prefix)
        .ok_or_else(|| bad("invalid status"))?;
    let rest = chars.as_str();

    let (seg_str, rest) = rest.split_once('-').ok_or_else(|| bad("missing parts"))?;
    let segnum: u64 = seg_str
        .parse()
        .map_err(|_| bad("invalid segment number"))?;

    let (ts_str, id_str) = rest.split_once('-').ok_or_else(|| bad("missing parts"))?;
    let ts =
        timestamp::parse_compact(ts_str).map_err(|_| bad("invalid timestamp"))?;
    let recnum: u64 = id_str
        .parse()
        .map_err(|_| bad("invalid record identifier"))?;

    Ok(Segment {
        segnum,
        recnum,
        ts,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name() {
        let seg = parse_segment_name("", "", "F0000000123-20230101T000000123-000000000444").unwrap();
        assert_eq!(seg.segnum, 123);
        assert_eq!(seg.ts, 1_672_531_200_123);
        assert_eq!(seg.recnum, 444);
        assert_eq!(seg.status, Status::Finalized);
    }

    #[test]
    fn parse_accepts_unpadded_numbers() {
        let seg = parse_segment_name("", "", "F123-20230101T000000123-444").unwrap();
        assert_eq!(seg.segnum, 123);
        assert_eq!(seg.recnum, 444);
    }

    #[test]
    fn format_name() {
        let seg = Segment {
            segnum: 123,
            recnum: 444,
            ts: 1_672_531_260_987,
            status: Status::Sealed,
        };
        assert_eq!(
            format_segment_name("x", "y", &seg),
            "xS0000000123-20230101T000100987-000000000444y"
        );
    }

    #[test]
    fn round_trip_with_template() {
        let seg = Segment {
            segnum: 5,
            recnum: 9,
            ts: 1_704_067_211_000,
            status: Status::Draft,
        };
        let name = format_segment_name("j", ".wal", &seg);
        assert_eq!(name, "jW0000000005-20240101T000011000-000000000009.wal");
        assert_eq!(parse_segment_name("j", ".wal", &name).unwrap(), seg);
    }

    #[test]
    fn parse_rejects_bad_names() {
        for name in [
            "",
            "X123-20230101T000000123-444",
            "F123-20230101T000000123",
            "F123",
            "Fabc-20230101T000000123-444",
            "F123-garbage-444",
            "F123-20230101T000000123-xyz",
        ] {
            assert!(
                parse_segment_name("", "", name).is_err(),
                "accepted {name:?}"
            );
        }
    }

    #[test]
    fn parse_rejects_wrong_template() {
        assert!(parse_segment_name("j", ".wal", "F123-20230101T000000123-444").is_err());
        assert!(
            parse_segment_name("j", ".wal", "jF123-20230101T000000123-444.tmp").is_err()
        );
    }

    #[test]
    fn ordering_is_by_segnum_then_status() {
        let base = Segment {
            segnum: 1,
            recnum: 1,
            ts: 0,
            status: Status::Draft,
        };
        let finalized = base.with_status(Status::Finalized);
        let sealed = base.with_status(Status::Sealed);
        let next = Segment { segnum: 2, ..base };
        assert!(base < finalized);
        assert!(finalized < sealed);
        assert!(sealed < next);
    }

    proptest::proptest! {
        #[test]
        fn name_codec_round_trip(
            segnum in 1u64..=u32::MAX as u64,
            recnum in 1u64..1_000_000_000_000u64,
            ts in 0u64..4_102_444_800_000u64, // before the year 2100
            status_idx in 0usize..4,
        ) {
            let status = [
                Status::Draft,
                Status::Finalized,
                Status::Sealed,
                Status::SealingTemp,
            ][status_idx];
            let seg = Segment { segnum, recnum, ts, status };
            let name = format_segment_name("j", ".wal", &seg);
            let parsed = parse_segment_name("j", ".wal", &name).unwrap();
            proptest::prop_assert_eq!(parsed, seg);
        }
    }

    #[test]
    fn lexicographic_order_matches_segnum_order() {
        let a = Segment {
            segnum: 9,
            recnum: 900,
            ts: 0,
            status: Status::Finalized,
        };
        let b = Segment {
            segnum: 10,
            recnum: 1000,
            ts: 0,
            status: Status::Finalized,
        };
        let name_a = format_segment_name("j", ".wal", &a);
        let name_b = format_segment_name("j", ".wal", &b);
        assert!(name_a[2..] < name_b[2..]);
    }
}
