//! Merging records from several journals.

use chronik_core::{merged_records, Filter, Options};
use chronik_testkit::{TestJournal, TEST_EPOCH};

fn journal_with(records: &[(u64, &str)]) -> TestJournal {
    let j = TestJournal::writable(Options::default());
    for (offset_ms, data) in records {
        j.write_record(TEST_EPOCH + offset_ms, data.as_bytes())
            .unwrap();
    }
    j.finish_writing().unwrap();
    j
}

#[test]
fn merges_by_timestamp() {
    let a = journal_with(&[(0, "a1"), (3_000, "a2"), (6_000, "a3")]);
    let b = journal_with(&[(1_000, "b1"), (4_000, "b2"), (7_000, "b3")]);
    let c = journal_with(&[(2_000, "c1"), (5_000, "c2"), (8_000, "c3")]);

    let mut failure = None;
    let merged: Vec<_> = merged_records(
        [(1, &*a.journal), (2, &*b.journal), (3, &*c.journal)],
        Filter::default(),
        |err| failure = Some(err),
    )
    .collect();
    assert!(failure.is_none(), "{failure:?}");

    let data: Vec<_> = merged
        .iter()
        .map(|r| String::from_utf8_lossy(&r.record.data).into_owned())
        .collect();
    assert_eq!(
        data,
        ["a1", "b1", "c1", "a2", "b2", "c2", "a3", "b3", "c3"]
    );

    // Timestamps are non-decreasing throughout.
    for pair in merged.windows(2) {
        assert!(pair[0].record.timestamp <= pair[1].record.timestamp);
    }
}

#[test]
fn ties_break_by_source_then_id() {
    let a = journal_with(&[(1_000, "a1"), (1_000, "a2")]);
    let b = journal_with(&[(1_000, "b1")]);

    let merged: Vec<_> = merged_records(
        [(7, &*a.journal), (9, &*b.journal)],
        Filter::default(),
        |_| {},
    )
    .collect();

    let tagged: Vec<_> = merged
        .iter()
        .map(|r| {
            (
                r.source,
                String::from_utf8_lossy(&r.record.data).into_owned(),
            )
        })
        .collect();
    assert_eq!(
        tagged,
        [
            (7, "a1".to_string()),
            (7, "a2".to_string()),
            (9, "b1".to_string()),
        ]
    );
}

#[test]
fn filter_applies_per_journal() {
    let a = journal_with(&[(0, "a1"), (2_000, "a2")]);
    let b = journal_with(&[(1_000, "b1"), (3_000, "b2")]);

    let merged: Vec<_> = merged_records(
        [(1, &*a.journal), (2, &*b.journal)],
        Filter {
            min_timestamp: TEST_EPOCH + 1_500,
            ..Filter::default()
        },
        |_| {},
    )
    .collect();

    let data: Vec<_> = merged
        .iter()
        .map(|r| String::from_utf8_lossy(&r.record.data).into_owned())
        .collect();
    assert_eq!(data, ["a2", "b2"]);
}

#[test]
fn merging_nothing_yields_nothing() {
    let merged: Vec<_> = merged_records(
        Vec::<(u64, &chronik_core::Journal)>::new(),
        Filter::default(),
        |_| {},
    )
    .collect();
    assert!(merged.is_empty());

    let a = journal_with(&[]);
    let merged: Vec<_> =
        merged_records([(1, &*a.journal)], Filter::default(), |_| {}).collect();
    assert!(merged.is_empty());
}
