//! The `seal` command: seal finalized segments and trim their sources.

use std::path::Path;

use chronik_core::CancelToken;

use super::{load_key, open_journal};

pub fn run(
    path: &Path,
    file_name: &str,
    verbose: bool,
    key_file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = load_key(key_file)?;
    let journal = open_journal(path, file_name, verbose, Some(key));

    let actions = journal.seal_and_trim_all(&CancelToken::new())?;
    println!("{actions} seal/trim actions performed");
    Ok(())
}
