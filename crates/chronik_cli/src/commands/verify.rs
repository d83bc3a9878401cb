//! The `verify` command: stream-verify every segment.

use std::path::Path;

use tracing::warn;

use super::{load_key, open_journal};

pub fn run(
    path: &Path,
    file_name: &str,
    verbose: bool,
    quarantine: bool,
    key_file: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = key_file.map(load_key).transpose()?;
    let journal = open_journal(path, file_name, verbose, key);

    let report = journal.verify_segments()?;
    if report.is_empty() {
        println!("no segments found");
        return Ok(());
    }

    let mut bad = 0usize;
    for entry in &report {
        match &entry.error {
            None => println!("ok    {} ({} records)", entry.segment, entry.records),
            Some(error) => {
                bad += 1;
                println!(
                    "BAD   {} ({} records before error): {error}",
                    entry.segment, entry.records
                );
                if quarantine {
                    match journal.quarantine_segment(entry.segment, None) {
                        Ok(()) => println!("      moved to trash"),
                        Err(err) => warn!(segment = %entry.segment, error = %err, "quarantine failed"),
                    }
                }
            }
        }
    }

    if bad > 0 {
        Err(format!("{bad} of {} segments failed verification", report.len()).into())
    } else {
        println!("all {} segments ok", report.len());
        Ok(())
    }
}
