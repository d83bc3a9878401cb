//! Quarantine for irrecoverable segment files.
//!
//! Instead of deleting files the journal cannot make sense of, they are
//! moved into a trash directory under a unique name, so an operator can
//! inspect them later. Moving falls back to copy-and-delete when the
//! rename fails, e.g. because the trash directory sits on a different
//! filesystem.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{JournalError, JournalResult};
use crate::journal::Journal;
use crate::segment::Segment;

impl Journal {
    /// Moves a segment's file into the trash directory and drops it from
    /// the catalog.
    ///
    /// A segment whose file is already gone is only dropped from the
    /// catalog. `cause` is logged alongside the quarantine event.
    pub fn quarantine_segment(
        &self,
        seg: Segment,
        cause: Option<&JournalError>,
    ) -> JournalResult<()> {
        let j = self.shared();
        let path = j.segment_path(&seg);
        match quarantine_file(&j.trash_dir, &path) {
            Ok(dest) => {
                self.note_segment_gone(seg);
                match cause {
                    Some(cause) => warn!(
                        journal = %j.debug_name,
                        segment = %seg,
                        dest = %dest.display(),
                        error = %cause,
                        "moved corrupted segment to trash"
                    ),
                    None => warn!(
                        journal = %j.debug_name,
                        segment = %seg,
                        dest = %dest.display(),
                        "moved segment to trash"
                    ),
                }
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.note_segment_gone(seg);
                warn!(
                    journal = %j.debug_name,
                    segment = %seg,
                    "corrupted segment already missing"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Moves `path` into `trash_dir` under a unique name.
///
/// Returns the destination path.
fn quarantine_file(trash_dir: &Path, path: &Path) -> io::Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    fs::create_dir_all(trash_dir)?;
    let dest = unique_trash_path(trash_dir.join(name))?;
    if dest == path {
        return Ok(dest);
    }

    match fs::rename(path, &dest) {
        Ok(()) => Ok(dest),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(err),
        Err(_) => {
            // Rename across filesystems fails; fall back to copy then
            // delete.
            copy_file(path, &dest)?;
            fs::remove_file(path)?;
            Ok(dest)
        }
    }
}

/// Picks a destination that does not collide with an earlier quarantine of
/// a file by the same name.
fn unique_trash_path(path: PathBuf) -> io::Result<PathBuf> {
    if !path.exists() {
        return Ok(path);
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("quarantined");
    let (base, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };

    for i in 2.. {
        let candidate = dir.join(format!("{base}-{i}{ext}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    unreachable!("exhausted candidate quarantine names")
}

fn copy_file(src: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(src, dest)?;
    Ok(())
}
