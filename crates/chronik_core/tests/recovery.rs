//! Crash recovery: corrupted drafts are truncated back to the last commit
//! or deleted when nothing was ever committed.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use chronik_core::{Filter, Journal, JournalError, Options, SealKey};
use chronik_testkit::{expand, recs_eq, TestJournal};

fn opts() -> Options {
    Options {
        max_file_size: 10_000,
        ..Options::default()
    }
}

#[test]
fn corrupted_commit_truncates_to_prior_commit() {
    let j = TestJournal::writable(opts());
    j.write_record(0, b"boo").unwrap();
    j.commit().unwrap();
    j.advance(Duration::from_secs(1));
    j.write_record(0, b"wooo").unwrap();
    j.finish_writing().unwrap();

    let name = j.file_names()[0].clone();
    let mut data = j.data(&name);
    let original = data.clone();

    // Flip a bit in the trailing commit marker.
    let last = data.len() - 1;
    data[last] ^= 0xFF;
    fs::write(j.dir().join(&name), &data).unwrap();

    let j2 = j.reopen(opts());
    j2.write_record(0, b"x").unwrap();
    j2.finish_writing().unwrap();

    // Everything up to the first commit survives; the corrupted batch is
    // gone and "x" takes over its record id.
    recs_eq(
        &j2.all(Filter::default()),
        1,
        &["20240101T000000000:boo", "20240101T000001000:x"],
    );

    // The recovered file is byte-identical up to the first commit.
    let recovered = j2.data(&name);
    let keep = 128 + (2 + 3) + 8; // header, "boo" record, commit
    assert_eq!(&recovered[..keep], &original[..keep]);
    assert_eq!(recovered.len(), keep + (3 + 1) + 8); // "x" record, commit
}

#[test]
fn uncommitted_tail_is_truncated() {
    let j = TestJournal::writable(opts());
    j.write_record(0, b"boo").unwrap();
    j.finish_writing().unwrap();

    let name = j.file_names()[0].clone();
    let original = j.data(&name);

    // Append a record with no commit after it, as if we crashed mid-batch.
    let mut data = original.clone();
    data.extend_from_slice(&expand(&["#8 #0 'wooo"]));
    fs::write(j.dir().join(&name), &data).unwrap();

    let j2 = j.reopen(opts());
    j2.finish_writing().unwrap();
    assert_eq!(j2.data(&name), original);
}

#[test]
fn nonsensical_tail_is_truncated() {
    let j = TestJournal::writable(opts());
    j.write_record(0, b"boo").unwrap();
    j.finish_writing().unwrap();

    let name = j.file_names()[0].clone();
    let original = j.data(&name);

    let mut data = original.clone();
    data.extend_from_slice(&expand(&["FE FF*100"]));
    fs::write(j.dir().join(&name), &data).unwrap();

    let j2 = j.reopen(opts());
    j2.finish_writing().unwrap();
    assert_eq!(j2.data(&name), original);
}

#[test]
fn draft_with_nothing_committed_is_deleted() {
    let j = TestJournal::writable(opts());
    j.write_record(0, b"boooooooo").unwrap();
    // No commit, no finish: simulate a crash with an uncommitted draft.

    let j2 = j.reopen(opts());
    j2.write_record(0, b"x").unwrap();
    j2.finish_writing().unwrap();

    assert_eq!(
        j2.file_names(),
        ["jW0000000001-20240101T000000000-000000000001.wal"]
    );
    recs_eq(&j2.all(Filter::default()), 1, &["20240101T000000000:x"]);
}

#[test]
fn truncated_header_is_deleted_on_resume() {
    let j = TestJournal::writable(opts());
    j.write_record(0, b"boo").unwrap();
    j.finish_writing().unwrap();

    let name = j.file_names()[0].clone();
    let data = j.data(&name);
    fs::write(j.dir().join(&name), &data[..64]).unwrap();

    let j2 = j.reopen(opts());
    j2.write_record(0, b"fresh").unwrap();
    j2.finish_writing().unwrap();
    recs_eq(&j2.all(Filter::default()), 1, &["20240101T000000000:fresh"]);
}

#[test]
fn finalized_magic_in_draft_is_tolerated() {
    // A crash between the header rewrite and the rename leaves a W… file
    // with the finalized magic; resuming must accept it.
    let j = TestJournal::writable(opts());
    j.write_record(0, b"boo").unwrap();
    j.finish_writing().unwrap();
    j.rotate().unwrap();

    // Undo the rename but keep the finalized header.
    let finalized = j.file_names()[0].clone();
    let draft = finalized.replacen("jF", "jW", 1);
    fs::rename(j.dir().join(&finalized), j.dir().join(&draft)).unwrap();

    let j2 = j.reopen(opts());
    j2.advance(Duration::from_secs(1));
    j2.write_record(0, b"more").unwrap();
    j2.finish_writing().unwrap();

    recs_eq(
        &j2.all(Filter::default()),
        1,
        &["20240101T000000000:boo", "20240101T000001000:more"],
    );
}

#[test]
fn incompatible_journal_invariant() {
    let j = TestJournal::writable(Options {
        journal_invariant: [1; 32],
        ..opts()
    });
    j.write_record(0, b"hello").unwrap();
    j.finish_writing().unwrap();

    let j2 = j.reopen(Options {
        journal_invariant: [2; 32],
        ..opts()
    });

    // The writer noticed the mismatch during preparation.
    let err = j2.write_record(0, b"x").unwrap_err();
    assert!(matches!(err, JournalError::WriterFailed { .. }), "{err}");

    // Reading reports the incompatibility through the fail callback.
    let mut failure = None;
    let records: Vec<_> = j2
        .journal
        .records(Filter::default(), |err| failure = Some(err))
        .collect();
    assert!(records.is_empty());
    assert!(
        matches!(failure, Some(JournalError::Incompatible { .. })),
        "{failure:?}"
    );
}

#[test]
fn unknown_magic_is_unsupported_version() {
    let j = TestJournal::writable(opts());
    j.write_record(0, b"hello").unwrap();
    j.finish_writing().unwrap();
    j.rotate().unwrap();

    let name = j.file_names()[0].clone();
    let mut data = j.data(&name);
    data[7] = b'Z'; // CHRONLGZ is not a known magic
    fs::write(j.dir().join(&name), &data).unwrap();

    let j2 = j.reopen(opts());
    let mut failure = None;
    let records: Vec<_> = j2
        .journal
        .records(Filter::default(), |err| failure = Some(err))
        .collect();
    assert!(records.is_empty());
    assert!(
        matches!(failure, Some(JournalError::UnsupportedVersion)),
        "{failure:?}"
    );
}

#[test]
fn verify_segments_reports_corruption() {
    let j = TestJournal::writable(opts());
    j.write_record(0, b"good").unwrap();
    j.finish_writing().unwrap();

    let clean = j.verify_segments().unwrap();
    assert_eq!(clean.len(), 1);
    assert_eq!(clean[0].records, 1);
    assert!(clean[0].error.is_none());

    let name = j.file_names()[0].clone();
    let mut data = j.data(&name);
    let last = data.len() - 1;
    data[last] ^= 0xFF;
    fs::write(j.dir().join(&name), &data).unwrap();

    let report = j.verify_segments().unwrap();
    assert_eq!(report.len(), 1);
    assert!(report[0].error.is_some());
}

#[test]
fn quarantine_moves_segment_to_trash() {
    let j = TestJournal::writable(opts());
    j.write_record(0, b"bad").unwrap();
    j.finish_writing().unwrap();
    j.rotate().unwrap();

    let segs = j.find_segments(Filter::default()).unwrap();
    assert_eq!(segs.len(), 1);
    j.quarantine_segment(segs[0], None).unwrap();

    assert!(j.find_segments(Filter::default()).unwrap().is_empty());
    let trash: Vec<_> = fs::read_dir(j.dir().join("trash"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(trash.len(), 1);
    assert!(trash[0].starts_with("jF0000000001-"));
}

#[test]
fn missing_seal_key_on_read() {
    let j = TestJournal::writable(opts());
    j.write_record(0, b"secret").unwrap();
    j.finish_writing().unwrap();
    j.rotate().unwrap();
    j.seal(&chronik_core::CancelToken::new()).unwrap().unwrap();
    j.trim().unwrap().unwrap();

    // A journal configured with a different key cannot open the sealed
    // segment.
    let other = Journal::new(
        j.dir(),
        Options {
            file_name: "j*.wal".to_string(),
            seal_keys: vec![Arc::new(SealKey::new([9; 32], [3; 32]))],
            ..Options::default()
        },
    );
    let mut failure = None;
    let records: Vec<_> = other
        .records(Filter::default(), |err| failure = Some(err))
        .collect();
    assert!(records.is_empty());
    assert!(
        matches!(failure, Some(JournalError::MissingSealKey)),
        "{failure:?}"
    );
}
