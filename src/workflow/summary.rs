//! End-of-run report.
use super::state::{JobId, JobStatus, WorkflowState};
use crate::error::ExportError;
use crate::naming::Collision;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    /// Job id and the filename it was packaged under.
    pub succeeded: Vec<(JobId, String)>,
    /// Job id, label, and error text.
    pub failed: Vec<(JobId, String, String)>,
    pub collisions: Vec<Collision>,
    pub archive_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn from_state(state: &WorkflowState) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for job in state.jobs() {
            match job.status {
                JobStatus::Done => succeeded.push((
                    job.id,
                    job.target_filename.clone().unwrap_or_else(|| job.label()),
                )),
                JobStatus::Failed | JobStatus::Pending | JobStatus::Translating => failed.push((
                    job.id,
                    job.label(),
                    job.error
                        .clone()
                        .unwrap_or_else(|| "did not complete".to_string()),
                )),
            }
        }
        Self {
            total: state.jobs().len(),
            succeeded,
            failed,
            collisions: state.collisions().to_vec(),
            archive_path: state.archive_path().cloned(),
        }
    }

    /// `PartialFailure` when the run completed but some job did not.
    pub fn failure(&self) -> Option<ExportError> {
        (!self.failed.is_empty()).then(|| ExportError::PartialFailure {
            failed: self.failed.len(),
            total: self.total,
        })
    }

    /// There were jobs and none of them produced a file.
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.succeeded.is_empty()
    }

    /// 0 when anything was exported or nothing was asked for, 2 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.all_failed() {
            2
        } else {
            0
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "Exported {} of {} jobs",
            self.succeeded.len(),
            self.total
        )];
        lines.extend(
            self.succeeded
                .iter()
                .map(|(id, name)| format!("  ok     {id}  {name}")),
        );
        lines.extend(
            self.failed
                .iter()
                .map(|(id, label, error)| format!("  failed {id}  {label}: {error}")),
        );
        lines.extend(self.collisions.iter().map(|collision| {
            let ids: Vec<String> = collision.job_ids.iter().map(ToString::to_string).collect();
            format!("  collision '{}' ({})", collision.filename, ids.join(", "))
        }));
        lines.push(match &self.archive_path {
            Some(path) => format!("Archive: {}", path.display()),
            None => "No archive written".to_string(),
        });
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}
