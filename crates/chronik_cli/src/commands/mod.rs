//! CLI subcommands.

pub mod dump;
pub mod inspect;
pub mod seal;
pub mod verify;

use std::path::Path;
use std::sync::Arc;

use chronik_core::{Journal, Options, SealKey};

/// Builds a journal over the given directory.
pub fn open_journal(
    path: &Path,
    file_name: &str,
    verbose: bool,
    key: Option<Arc<SealKey>>,
) -> Journal {
    Journal::new(
        path,
        Options {
            file_name: file_name.to_string(),
            debug_name: path.display().to_string(),
            seal_keys: key.into_iter().collect(),
            verbose,
            ..Options::default()
        },
    )
}

/// Loads a 64-byte key file: 32 bytes of key id, 32 bytes of key material.
pub fn load_key(path: &Path) -> Result<Arc<SealKey>, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() != 64 {
        return Err(format!(
            "key file {} must be exactly 64 bytes (32-byte id, 32-byte key), got {}",
            path.display(),
            bytes.len()
        )
        .into());
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&bytes[..32]);
    let mut material = [0u8; 32];
    material.copy_from_slice(&bytes[32..]);
    Ok(Arc::new(SealKey::new(id, material)))
}
