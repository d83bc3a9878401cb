//! The `inspect` command: summary of a journal directory.

use std::path::Path;

use chronik_core::{timestamp, Filter, Meta, Segment};

use super::open_journal;

pub fn run(
    path: &Path,
    file_name: &str,
    verbose: bool,
    segments: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let journal = open_journal(path, file_name, verbose, None);
    let summary = journal.summary()?;

    println!("journal: {}", path.display());
    println!("segments: {}", summary.segment_count);
    print_segment("first unsealed", summary.first_unsealed_segment);
    print_segment("last unsealed", summary.last_unsealed_segment);
    print_segment("first sealed", summary.first_sealed_segment);
    print_segment("last sealed", summary.last_sealed_segment);
    print_meta("first record", summary.first_record);
    print_meta("last committed", summary.last_committed);

    if segments {
        println!();
        for seg in journal.find_segments(Filter::default())? {
            println!("  {seg}");
        }
    }
    Ok(())
}

fn print_segment(label: &str, seg: Option<Segment>) {
    match seg {
        Some(seg) => println!("{label}: {seg}"),
        None => println!("{label}: none"),
    }
}

fn print_meta(label: &str, meta: Meta) {
    if meta.id == 0 {
        println!("{label}: unknown");
    } else {
        println!(
            "{label}: #{} at {}",
            meta.id,
            timestamp::format_compact(meta.timestamp)
        );
    }
}
