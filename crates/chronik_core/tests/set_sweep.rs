//! The journal set: autocommit, autorotate and autoseal sweeps.

use std::sync::Arc;
use std::time::Duration;

use chronik_core::{CancelToken, Clock, Filter, Options, Set, SetOptions};
use chronik_testkit::{recs_eq, TestJournal};

#[test]
fn sweeps_across_a_set() {
    let j1 = TestJournal::writable(Options {
        max_file_size: 160,
        autorotate_interval: Duration::from_secs(3_600),
        ..Options::default()
    });
    let j2 = TestJournal::writable(Options {
        max_file_size: 160,
        autorotate_interval: Duration::from_secs(1_800),
        ..Options::default()
    });

    let set = Set::new(SetOptions {
        clock: Some(j1.clock.clone() as Arc<dyn Clock>),
        ..SetOptions::default()
    });
    set.add(j1.journal.clone());
    set.add(j2.journal.clone());
    assert_eq!(set.journals().len(), 2);

    let cancel = CancelToken::new();
    assert_eq!(set.process(&cancel), 0);

    j1.write_record(0, b"hello").unwrap();
    j2.write_record(0, b"world").unwrap();
    j1.write_record(0, b"boo").unwrap();

    // Nothing is old enough yet.
    assert_eq!(set.process(&cancel), 0);

    // One hour later both journals rotate, and the freshly finalized
    // segments get sealed and trimmed in the same sweep.
    j1.clock.advance(Duration::from_secs(3_600));
    j2.clock.advance(Duration::from_secs(3_600));
    assert_eq!(set.process(&cancel), 6);

    for j in [&j1, &j2] {
        let names = j.file_names();
        assert_eq!(names.len(), 1, "{names:?}");
        assert!(names[0].starts_with("jS0000000001-"), "{names:?}");
    }
    recs_eq(
        &j1.all(Filter::default()),
        1,
        &["20240101T000000000:hello", "20240101T000000000:boo"],
    );

    set.remove(&j2.journal);
    assert_eq!(set.journals().len(), 1);
}

#[test]
fn autocommit_after_interval() {
    let j = TestJournal::writable(Options {
        autocommit_interval: Duration::from_secs(5),
        ..Options::default()
    });

    // Nothing to commit yet.
    assert!(!j.autocommit(j.clock.now_ts()).unwrap());

    j.write_record(0, b"a").unwrap();
    assert!(!j.autocommit(j.clock.now_ts()).unwrap());

    j.advance(Duration::from_secs(5));
    assert!(j.autocommit(j.clock.now_ts()).unwrap());
    assert!(!j.autocommit(j.clock.now_ts()).unwrap());

    // The committed record is readable without closing the writer.
    recs_eq(&j.all(Filter::default()), 1, &["20240101T000000000:a"]);
}

#[test]
fn autocommit_measures_from_first_record_of_batch() {
    let j = TestJournal::writable(Options {
        autocommit_interval: Duration::from_secs(5),
        ..Options::default()
    });

    j.write_record(0, b"a").unwrap();
    j.advance(Duration::from_secs(3));
    j.write_record(0, b"b").unwrap();

    // Only 3s since the first uncommitted record.
    assert!(!j.autocommit(j.clock.now_ts()).unwrap());

    // 5s since the first record, 2s since the second: due.
    j.advance(Duration::from_secs(2));
    assert!(j.autocommit(j.clock.now_ts()).unwrap());
}

#[test]
fn autorotate_after_interval() {
    let j = TestJournal::writable(Options {
        autorotate_interval: Duration::from_secs(60),
        ..Options::default()
    });

    j.write_record(0, b"a").unwrap();
    assert!(!j.autorotate(j.clock.now_ts()).unwrap());

    j.advance(Duration::from_secs(61));
    assert!(j.autorotate(j.clock.now_ts()).unwrap());
    assert!(!j.autorotate(j.clock.now_ts()).unwrap());

    assert_eq!(
        j.file_names(),
        ["jF0000000001-20240101T000000000-000000000001.wal"]
    );

    // The next record opens segment 2.
    j.write_record(0, b"b").unwrap();
    j.finish_writing().unwrap();
    assert_eq!(j.file_names().len(), 2);
    assert!(j.file_names()[1].starts_with("jW0000000002-"));
}

#[test]
fn disabled_intervals_do_nothing() {
    let j = TestJournal::writable(Options::default());
    j.write_record(0, b"a").unwrap();
    j.advance(Duration::from_secs(100_000));
    assert!(!j.autocommit(j.clock.now_ts()).unwrap());
    assert!(!j.autorotate(j.clock.now_ts()).unwrap());
}

#[test]
fn background_runner_starts_and_stops() {
    let set = Arc::new(Set::new(SetOptions {
        autoseal_enabled: true,
        ..SetOptions::default()
    }));
    let runner = Arc::clone(&set).start_background(CancelToken::new());
    runner.close();
}
