//! Timestamped export archive.
//!
//! Entries are flat, in job order, followed by `export_operation.log`.
//! Timestamps inside the archive are fixed so identical inputs produce
//! identical bytes; the archive is staged next to its destination and
//! renamed into place when complete.
use crate::error::{ExportError, Result};
use crate::staging;
use crate::workflow::state::JobId;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const LOG_ENTRY_NAME: &str = "export_operation.log";

/// What to do with the second and later jobs that resolve to one name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Write every file, renaming later duplicates to `name (2).ext`.
    #[default]
    Suffix,
    /// Write the first file only and report the rest.
    KeepFirst,
}

/// Archive entry name chosen for one job; `None` when the policy drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub job_id: JobId,
    pub resolved_name: String,
    pub entry_name: Option<String>,
}

impl PlannedEntry {
    pub fn was_renamed(&self) -> bool {
        self.entry_name
            .as_deref()
            .is_some_and(|name| name != self.resolved_name)
    }
}

/// Assign archive entry names in job order according to `policy`.
pub fn plan_entries(resolved: &[(JobId, String)], policy: CollisionPolicy) -> Vec<PlannedEntry> {
    let mut used: HashSet<String> = HashSet::from([LOG_ENTRY_NAME.to_string()]);
    resolved
        .iter()
        .map(|(job_id, name)| {
            let entry_name = if used.insert(name.clone()) {
                Some(name.clone())
            } else {
                match policy {
                    CollisionPolicy::KeepFirst => None,
                    CollisionPolicy::Suffix => {
                        let unique = (2..)
                            .map(|n| suffixed(name, n))
                            .find(|candidate| !used.contains(candidate))
                            .unwrap_or_else(|| name.clone());
                        used.insert(unique.clone());
                        Some(unique)
                    }
                }
            };
            PlannedEntry {
                job_id: *job_id,
                resolved_name: name.clone(),
                entry_name,
            }
        })
        .collect()
}

/// `plate.dxf` → `plate (2).dxf`; names without an extension get a plain suffix.
pub fn suffixed(name: &str, n: u32) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({n})"),
    }
}

/// `<out>/<YYYYmmdd_HHMMSS>.zip`, or `..._2.zip` and so on if taken.
pub fn archive_path(out_dir: &Path, timestamp: DateTime<Local>) -> PathBuf {
    let stem = timestamp.format("%Y%m%d_%H%M%S").to_string();
    let first = out_dir.join(format!("{stem}.zip"));
    if !first.exists() {
        return first;
    }
    (2u32..)
        .map(|n| out_dir.join(format!("{stem}_{n}.zip")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Write `files` (entry name, bytes) plus the operation log to `path`.
pub fn write_archive(path: &Path, files: &[(String, Vec<u8>)], log_text: &str) -> Result<()> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let staged = staging::stage_next_to(path)?;
    let mut zip = ZipWriter::new(staged);
    for (name, bytes) in files {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)
            .map_err(|err| ExportError::io(format!("write {name} into archive"), err))?;
    }
    zip.start_file(LOG_ENTRY_NAME, options)?;
    zip.write_all(log_text.as_bytes())
        .map_err(|err| ExportError::io("write operation log into archive", err))?;
    let staged = zip.finish()?;
    staging::publish(staged, path)?;

    tracing::info!(
        path = %path.display(),
        files = files.len(),
        "archive written"
    );
    Ok(())
}
