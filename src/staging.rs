//! Atomic file publication.
//!
//! Files are written to a temporary sibling in the destination directory and
//! renamed into place, so readers observe either the previous content or the
//! complete new content.
use crate::error::{ExportError, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Open a temporary file next to `dest`, creating the directory if needed.
pub fn stage_next_to(dest: &Path) -> Result<NamedTempFile> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .map_err(|err| ExportError::io(format!("create {}", parent.display()), err))?;
    NamedTempFile::new_in(parent)
        .map_err(|err| ExportError::io(format!("stage {}", dest.display()), err))
}

/// Rename a staged file onto `dest`.
pub fn publish(staged: NamedTempFile, dest: &Path) -> Result<()> {
    staged
        .persist(dest)
        .map_err(|err| ExportError::io(format!("publish {}", dest.display()), err.error))?;
    Ok(())
}

pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let mut staged = stage_next_to(dest)?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.flush())
        .map_err(|err| ExportError::io(format!("write {}", dest.display()), err))?;
    publish(staged, dest)
}

pub fn write_json_atomic<T: serde::Serialize>(dest: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|err| ExportError::Protocol(format!("serialize {}: {err}", dest.display())))?;
    bytes.push(b'\n');
    write_atomic(dest, &bytes)
}
