//! The `dump` command: print records.

use std::path::Path;

use chronik_core::{timestamp, Filter};

use super::{load_key, open_journal};

#[allow(clippy::too_many_arguments)]
pub fn run(
    path: &Path,
    file_name: &str,
    verbose: bool,
    min_id: u64,
    max_id: u64,
    limit: usize,
    latest: bool,
    key_file: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = key_file.map(load_key).transpose()?;
    let journal = open_journal(path, file_name, verbose, key);

    let filter = Filter {
        min_record_id: min_id,
        max_record_id: max_id,
        limit,
        latest,
        ..Filter::default()
    };

    let mut failure = None;
    let mut count = 0u64;
    for record in journal.records(filter, |err| failure = Some(err)) {
        count += 1;
        println!(
            "#{:<12} {} {}",
            record.id,
            timestamp::format_compact(record.timestamp),
            render(&record.data),
        );
    }

    if let Some(err) = failure {
        return Err(format!("dump aborted after {count} records: {err}").into());
    }
    eprintln!("{count} records");
    Ok(())
}

/// Renders a payload as text when it is printable, as hex otherwise.
fn render(data: &[u8]) -> String {
    if data
        .iter()
        .all(|b| b.is_ascii_graphic() || *b == b' ')
    {
        String::from_utf8_lossy(data).into_owned()
    } else {
        let mut out = String::with_capacity(data.len() * 3 + 2);
        out.push_str("0x");
        for b in data {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::render;

    #[test]
    fn renders_text_and_hex() {
        assert_eq!(render(b"hello world"), "hello world");
        assert_eq!(render(&[0x00, 0xFF]), "0x00ff");
    }
}
