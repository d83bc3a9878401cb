//! In-memory catalog of known segments.
//!
//! Two ordered sequences keyed by segment ordinal: `unsealed` (drafts and
//! finalized segments) and `sealed`, plus a transient slot for the file an
//! in-progress seal is writing. The catalog initializes itself lazily from
//! a directory listing, never touching file contents, and caches either
//! success or the initialization error until explicitly reset.
//!
//! All access goes through the journal's state mutex; the catalog itself
//! is plain data.

use std::fs;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cursor::Filter;
use crate::error::{JournalError, JournalResult};
use crate::journal::JournalShared;
use crate::segment::{parse_segment_name, Segment, Status};
use crate::summary::{Meta, Summary};

#[derive(Default)]
pub(crate) struct Catalog {
    initialized: bool,
    init_err: Option<String>,

    unsealed: Vec<Segment>,
    sealed: Vec<Segment>,
    sealing_temp: Option<Segment>,

    /// Set once the writer has prepared; not by plain initialization.
    last_known: bool,
    last_committed: Meta,
    last_uncommitted: Meta,
}

impl Catalog {
    /// Initializes from the directory listing if not done yet.
    ///
    /// The first failure is sticky: subsequent calls keep returning an
    /// initialization error until [`Catalog::reset`].
    pub(crate) fn ensure_initialized(&mut self, j: &JournalShared) -> JournalResult<()> {
        if let Some(message) = &self.init_err {
            return Err(JournalError::Initialization {
                message: message.clone(),
            });
        }
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;

        match self.initialize(j) {
            Ok(()) => Ok(()),
            Err(err) => {
                let message = err.to_string();
                self.init_err = Some(message.clone());
                Err(JournalError::Initialization { message })
            }
        }
    }

    fn initialize(&mut self, j: &JournalShared) -> JournalResult<()> {
        let mut garbage: Vec<Segment> = Vec::new();
        let mut all: Vec<Segment> = Vec::new();

        enum_segments(j, |seg| {
            match seg.status {
                Status::SealingTemp => garbage.push(seg),
                _ => all.push(seg),
            }
            Ok(())
        })?;
        all.sort();

        let mut sealed: Vec<Segment> = Vec::new();
        let mut unsealed: Vec<Segment> = Vec::new();
        for seg in all {
            let list = if seg.status.is_sealed() {
                &mut sealed
            } else {
                &mut unsealed
            };
            if let Some(prev) = list.last() {
                if prev.segnum == seg.segnum {
                    return Err(JournalError::corrupted(format!(
                        "duplicate segment ordinal {} in {} and {}",
                        seg.segnum, prev, seg
                    )));
                }
            }
            list.push(seg);
        }

        // A draft can only ever be the newest segment; anything else means
        // the directory was tampered with.
        for (i, seg) in unsealed.iter().enumerate() {
            if seg.status.is_draft() && i + 1 != unsealed.len() {
                return Err(JournalError::corrupted(format!(
                    "draft segment {seg} is not the last segment"
                )));
            }
        }

        self.sealed = sealed;
        self.unsealed = unsealed;

        // Leftovers from an interrupted seal are garbage; nothing ever
        // reads them back. The temp registered by a seal running right
        // now is not a leftover and must survive a re-initialization.
        for seg in garbage {
            if self.sealing_temp == Some(seg) {
                continue;
            }
            let path = j.segment_path(&seg);
            warn!(journal = %j.debug_name, segment = %seg, "removing leftover sealing temp");
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    /// Discards the cached segment lists and any sticky initialization
    /// error. The sealing-temp slot is kept: it tracks an in-flight seal,
    /// not catalogued state.
    pub(crate) fn reset(&mut self) {
        self.initialized = false;
        self.init_err = None;
        self.unsealed.clear();
        self.sealed.clear();
    }

    pub(crate) fn last(&self) -> Option<Segment> {
        match (self.last_unsealed(), self.last_sealed()) {
            (Some(u), Some(s)) => Some(if s.segnum > u.segnum { s } else { u }),
            (Some(u), None) => Some(u),
            (None, s) => s,
        }
    }

    pub(crate) fn last_unsealed(&self) -> Option<Segment> {
        self.unsealed.last().copied()
    }

    pub(crate) fn last_sealed(&self) -> Option<Segment> {
        self.sealed.last().copied()
    }

    fn first_overall(&self) -> Option<Segment> {
        match (self.unsealed.first(), self.sealed.first()) {
            (Some(u), Some(s)) => Some(if s.segnum < u.segnum { *s } else { *u }),
            (Some(u), None) => Some(*u),
            (None, s) => s.copied(),
        }
    }

    /// The lowest finalized segment that has no sealed counterpart yet.
    pub(crate) fn next_to_seal(&self) -> Option<Segment> {
        let last_sealed = self.last_sealed();
        self.unsealed
            .iter()
            .find(|seg| match last_sealed {
                Some(sealed) => seg.segnum > sealed.segnum,
                None => true,
            })
            .copied()
    }

    /// The lowest finalized segment already mirrored by a sealed copy.
    pub(crate) fn next_to_trim(&self) -> Option<Segment> {
        let first = *self.unsealed.first()?;
        let last_sealed = self.last_sealed()?;
        if first.segnum <= last_sealed.segnum {
            Some(first)
        } else {
            None
        }
    }

    /// True when the newest segment is a draft older than the autorotate
    /// interval.
    pub(crate) fn needs_rotation(&self, now: u64, interval: Duration) -> bool {
        let Some(last) = self.last() else {
            return false;
        };
        if !last.status.is_draft() {
            return false;
        }
        Duration::from_millis(now.saturating_sub(last.ts)) >= interval
    }

    pub(crate) fn set_sealing_temp(&mut self, seg: Option<Segment>) {
        self.sealing_temp = seg;
    }

    pub(crate) fn add_segment(&mut self, j: &JournalShared, seg: Segment) {
        if !self.initialized {
            return;
        }
        let list = if seg.status.is_sealed() {
            &mut self.sealed
        } else {
            &mut self.unsealed
        };
        if let Some(prev) = list.last() {
            assert!(
                seg > *prev,
                "internal error: {}: adding segment {} after {}",
                j.debug_name,
                seg,
                prev
            );
        }
        list.push(seg);
    }

    pub(crate) fn remove_segment(&mut self, seg: Segment) {
        if !self.initialized {
            return;
        }
        let list = if seg.status.is_sealed() {
            &mut self.sealed
        } else {
            &mut self.unsealed
        };
        if let Some(i) = list.iter().position(|s| *s == seg) {
            list.remove(i);
        }
    }

    /// Replaces a draft entry with its finalized successor in place.
    pub(crate) fn replace_segment(&mut self, old: Segment, new: Segment) {
        if !self.initialized {
            return;
        }
        assert_eq!(
            old.segnum, new.segnum,
            "internal error: replacing segment {old} with unrelated {new}"
        );
        if let Some(i) = self.unsealed.iter().position(|s| *s == old) {
            self.unsealed[i] = new;
        }
    }

    pub(crate) fn set_last_record(&mut self, committed: Meta, uncommitted: Meta) {
        self.last_known = true;
        self.last_committed = committed;
        self.last_uncommitted = uncommitted;
    }

    pub(crate) fn set_last_uncommitted(&mut self, uncommitted: Meta) {
        self.last_known = true;
        self.last_uncommitted = uncommitted;
    }

    pub(crate) fn mark_committed(&mut self) {
        self.last_committed = self.last_uncommitted;
    }

    pub(crate) fn set_last_record_unknown(&mut self) {
        self.last_known = false;
    }

    pub(crate) fn summary(&self) -> Summary {
        let (last_committed, last_uncommitted) = if self.last_known {
            (self.last_committed, self.last_uncommitted)
        } else {
            (Meta::default(), Meta::default())
        };
        Summary {
            first_sealed_segment: self.sealed.first().copied(),
            last_sealed_segment: self.sealed.last().copied(),
            first_unsealed_segment: self.unsealed.first().copied(),
            last_unsealed_segment: self.unsealed.last().copied(),
            segment_count: self.sealed.len() + self.unsealed.len(),
            first_record: self
                .first_overall()
                .map(|seg| seg.first_record())
                .unwrap_or_default(),
            last_committed,
            last_uncommitted,
        }
    }

    /// Intersects both sequences against a filter.
    ///
    /// Returns matching segments in ascending order, sealed mirror copies
    /// first. Sealed segments whose ordinal is also present in the
    /// unsealed sequence are skipped so records are not read twice while a
    /// finalized source awaits trimming.
    pub(crate) fn find_known_segments(&self, filter: &Filter) -> Vec<Segment> {
        let mut result: Vec<Segment> =
            filter_range(self.sealed_before_unsealed(), filter).to_vec();
        result.extend_from_slice(filter_range(&self.unsealed, filter));
        result
    }

    fn sealed_before_unsealed(&self) -> &[Segment] {
        let mut sealed: &[Segment] = &self.sealed;
        let Some(first) = self.unsealed.first() else {
            return sealed;
        };
        while let Some(last) = sealed.last() {
            if last.segnum >= first.segnum {
                sealed = &sealed[..sealed.len() - 1];
            } else {
                break;
            }
        }
        sealed
    }
}

/// Narrows an ordered segment list to the filter's bounds.
///
/// The segment *before* the first in-bounds one is included, because the
/// requested minimum record usually sits in the middle of it. An exact
/// match on both minimum bounds makes the predecessor unnecessary.
fn filter_range<'s>(list: &'s [Segment], filter: &Filter) -> &'s [Segment] {
    let mut end = list.len();
    while end > 0 {
        let last = &list[end - 1];
        if (filter.max_record_id > 0 && last.recnum > filter.max_record_id)
            || (filter.max_timestamp > 0 && last.ts > filter.max_timestamp)
        {
            end -= 1;
            continue;
        }
        break;
    }

    let mut start = 0;
    let mut exact = false;
    while start < end {
        let first = &list[start];
        if first.recnum == filter.min_record_id && first.ts == filter.min_timestamp {
            exact = true;
            break;
        } else if first.recnum >= filter.min_record_id && first.ts >= filter.min_timestamp {
            break;
        }
        start += 1;
    }

    if exact {
        &list[start..end]
    } else if start > 0 {
        &list[start - 1..end]
    } else {
        &list[..end]
    }
}

/// Enumerates parseable segment files in the journal directory.
///
/// Files that do not match the configured prefix and suffix, and names
/// that do not parse as segment names, are ignored.
pub(crate) fn enum_segments<F>(j: &JournalShared, mut f: F) -> JournalResult<()>
where
    F: FnMut(Segment) -> JournalResult<()>,
{
    let entries = fs::read_dir(&j.dir)?;
    for entry in entries {
        if j.cancel.is_cancelled() {
            return Err(JournalError::Cancelled);
        }
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(&j.file_name_prefix) || !name.ends_with(&j.file_name_suffix) {
            continue;
        }
        match parse_segment_name(&j.file_name_prefix, &j.file_name_suffix, name) {
            Ok(seg) => f(seg)?,
            Err(err) => {
                if j.verbose {
                    debug!(journal = %j.debug_name, file = name, error = %err, "ignoring unparseable file");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(segnum: u64, recnum: u64, ts: u64, status: Status) -> Segment {
        Segment {
            segnum,
            recnum,
            ts,
            status,
        }
    }

    fn catalog(unsealed: Vec<Segment>, sealed: Vec<Segment>) -> Catalog {
        Catalog {
            initialized: true,
            unsealed,
            sealed,
            ..Catalog::default()
        }
    }

    #[test]
    fn last_prefers_highest_ordinal() {
        let c = catalog(
            vec![seg(3, 30, 0, Status::Draft)],
            vec![seg(1, 1, 0, Status::Sealed), seg(2, 15, 0, Status::Sealed)],
        );
        assert_eq!(c.last().unwrap().segnum, 3);
    }

    #[test]
    fn next_to_seal_skips_already_sealed() {
        let c = catalog(
            vec![
                seg(1, 1, 0, Status::Finalized),
                seg(2, 10, 0, Status::Finalized),
                seg(3, 20, 0, Status::Draft),
            ],
            vec![seg(1, 1, 0, Status::Sealed)],
        );
        assert_eq!(c.next_to_seal().unwrap().segnum, 2);
    }

    #[test]
    fn next_to_seal_can_return_draft() {
        // The caller checks can_seal; the query itself only orders.
        let c = catalog(vec![seg(1, 1, 0, Status::Draft)], vec![]);
        assert_eq!(c.next_to_seal().unwrap().segnum, 1);
        assert!(!c.next_to_seal().unwrap().status.can_seal());
    }

    #[test]
    fn next_to_trim_requires_sealed_mirror() {
        let mut c = catalog(
            vec![
                seg(1, 1, 0, Status::Finalized),
                seg(2, 10, 0, Status::Draft),
            ],
            vec![],
        );
        assert_eq!(c.next_to_trim(), None);

        c.sealed.push(seg(1, 1, 0, Status::Sealed));
        assert_eq!(c.next_to_trim().unwrap().segnum, 1);
        assert_eq!(c.next_to_trim().unwrap().status, Status::Finalized);
    }

    #[test]
    fn needs_rotation_only_for_old_drafts() {
        let interval = Duration::from_secs(60);
        let c = catalog(vec![seg(1, 1, 1_000, Status::Draft)], vec![]);
        assert!(!c.needs_rotation(1_000, interval));
        assert!(!c.needs_rotation(59_000, interval));
        assert!(c.needs_rotation(61_000, interval));

        let c = catalog(vec![seg(1, 1, 1_000, Status::Finalized)], vec![]);
        assert!(!c.needs_rotation(1_000_000, interval));
    }

    #[test]
    #[should_panic(expected = "internal error")]
    fn add_segment_panics_on_ordering_violation() {
        let j = crate::journal::JournalShared::for_tests();
        let mut c = catalog(vec![seg(2, 10, 0, Status::Draft)], vec![]);
        c.add_segment(&j, seg(1, 1, 0, Status::Draft));
    }

    #[test]
    fn initialize_keeps_the_registered_sealing_temp() {
        let dir = tempfile::tempdir().unwrap();
        let mut j = crate::journal::JournalShared::for_tests();
        j.dir = dir.path().to_path_buf();

        let active = seg(2, 10, 0, Status::SealingTemp);
        let stale = seg(1, 1, 0, Status::SealingTemp);
        for s in [active, stale] {
            std::fs::write(j.segment_path(&s), b"partial").unwrap();
        }

        let mut c = Catalog::default();
        c.set_sealing_temp(Some(active));
        c.ensure_initialized(&j).unwrap();

        // The in-flight temp survives; the stale leftover is collected.
        assert!(j.segment_path(&active).exists());
        assert!(!j.segment_path(&stale).exists());
    }

    #[test]
    fn replace_swaps_draft_for_finalized() {
        let mut c = catalog(vec![seg(1, 1, 0, Status::Draft)], vec![]);
        c.replace_segment(seg(1, 1, 0, Status::Draft), seg(1, 1, 0, Status::Finalized));
        assert_eq!(c.unsealed[0].status, Status::Finalized);
    }

    #[test]
    fn find_includes_predecessor_segment() {
        let c = catalog(
            vec![
                seg(1, 1, 100, Status::Finalized),
                seg(2, 10, 200, Status::Finalized),
                seg(3, 20, 300, Status::Draft),
            ],
            vec![],
        );
        // Record 15 lives in segment 2; an inexact minimum keeps it.
        let found = c.find_known_segments(&Filter {
            min_record_id: 15,
            min_timestamp: 250,
            ..Filter::default()
        });
        assert_eq!(
            found.iter().map(|s| s.segnum).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn find_skips_predecessor_on_exact_match() {
        let c = catalog(
            vec![
                seg(1, 1, 100, Status::Finalized),
                seg(2, 10, 200, Status::Finalized),
            ],
            vec![],
        );
        let found = c.find_known_segments(&Filter {
            min_record_id: 10,
            min_timestamp: 200,
            ..Filter::default()
        });
        assert_eq!(
            found.iter().map(|s| s.segnum).collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn find_applies_max_bounds() {
        let c = catalog(
            vec![
                seg(1, 1, 100, Status::Finalized),
                seg(2, 10, 200, Status::Finalized),
                seg(3, 20, 300, Status::Finalized),
            ],
            vec![],
        );
        let found = c.find_known_segments(&Filter {
            max_record_id: 15,
            ..Filter::default()
        });
        assert_eq!(
            found.iter().map(|s| s.segnum).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn find_prefers_sealed_mirror_over_finalized_source() {
        let c = catalog(
            vec![
                seg(2, 10, 200, Status::Finalized),
                seg(3, 20, 300, Status::Draft),
            ],
            vec![seg(1, 1, 100, Status::Sealed), seg(2, 10, 200, Status::Sealed)],
        );
        let found = c.find_known_segments(&Filter::default());
        assert_eq!(
            found
                .iter()
                .map(|s| (s.segnum, s.status))
                .collect::<Vec<_>>(),
            vec![
                (1, Status::Sealed),
                (2, Status::Finalized),
                (3, Status::Draft),
            ]
        );
    }

    #[test]
    fn summary_counts_everything() {
        let c = catalog(
            vec![seg(3, 20, 300, Status::Draft)],
            vec![seg(1, 1, 100, Status::Sealed), seg(2, 10, 200, Status::Sealed)],
        );
        let s = c.summary();
        assert_eq!(s.segment_count, 3);
        assert_eq!(s.first_record.id, 1);
        assert_eq!(s.first_sealed_segment.unwrap().segnum, 1);
        assert_eq!(s.last_unsealed_segment.unwrap().segnum, 3);
    }
}
