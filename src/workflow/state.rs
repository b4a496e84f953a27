//! Snapshot threaded through the pipeline.
//!
//! Steps borrow the previous [`WorkflowState`] and return a new one; a
//! snapshot is never edited once a step has produced it.
use crate::api::{ArtifactRef, Element, ExportFormat, Part};
use crate::context::DocumentContext;
use crate::error::ExportError;
use crate::lifecycle::TranslationOutcome;
use crate::naming::{Collision, NameInputs};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    PriorCleanup,
    Discover,
    ExportSheetMetal,
    ExportPlates,
    ExportDrawings,
    Package,
    PostCleanup,
    Done,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Init => "INIT",
            Stage::PriorCleanup => "PRIOR_CLEANUP",
            Stage::Discover => "DISCOVER",
            Stage::ExportSheetMetal => "EXPORT_SHEET_METAL",
            Stage::ExportPlates => "EXPORT_PLATES",
            Stage::ExportDrawings => "EXPORT_DRAWINGS",
            Stage::Package => "PACKAGE",
            Stage::PostCleanup => "POST_CLEANUP",
            Stage::Done => "DONE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Translating,
    /// The translation produced a retrievable artifact.
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSource {
    pub element_id: String,
    pub element_name: String,
    pub part_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    pub id: JobId,
    pub source: JobSource,
    pub kind: ExportFormat,
    pub name_inputs: NameInputs,
    pub target_filename: Option<String>,
    pub status: JobStatus,
    pub translation_id: Option<String>,
    pub artifact: Option<ArtifactRef>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl ExportJob {
    pub fn new(id: JobId, source: JobSource, kind: ExportFormat, name_inputs: NameInputs) -> Self {
        Self {
            id,
            source,
            kind,
            name_inputs,
            target_filename: None,
            status: JobStatus::Pending,
            translation_id: None,
            artifact: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    /// Human label: source name plus part id when there is one.
    pub fn label(&self) -> String {
        match &self.source.part_id {
            Some(part_id) => format!("{} [{}]", self.name_inputs.base_name, part_id),
            None => self.name_inputs.base_name.clone(),
        }
    }

    pub fn translating(self) -> Self {
        Self {
            status: JobStatus::Translating,
            ..self
        }
    }

    pub fn completed(self, outcome: TranslationOutcome) -> Self {
        let name_inputs = NameInputs {
            result_name: outcome.result_name,
            ..self.name_inputs
        };
        Self {
            status: JobStatus::Done,
            translation_id: Some(outcome.translation_id),
            artifact: Some(outcome.artifact),
            name_inputs,
            ..self
        }
    }

    pub fn failed(self, error: &ExportError) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error.to_string()),
            ..self
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_target(self, filename: String) -> Self {
        Self {
            target_filename: Some(filename),
            ..self
        }
    }
}

/// A Part Studio split into the two export paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioInventory {
    pub element: Element,
    pub flat_patterns: Vec<Part>,
    pub regular_parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub at: DateTime<Local>,
    pub message: String,
}

/// Timestamped operation log written into the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationLog {
    lines: Vec<LogLine>,
}

impl OperationLog {
    pub fn push(&mut self, message: impl Into<String>) {
        self.lines.push(LogLine {
            at: Local::now(),
            message: message.into(),
        });
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.message.contains(needle))
    }

    /// `YYYY-mm-dd HH:MM:SS - message`, one per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&format!(
                "{} - {}\n",
                line.at.format("%Y-%m-%d %H:%M:%S"),
                line.message
            ));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub(crate) ctx: DocumentContext,
    pub(crate) stage: Stage,
    pub(crate) elements: Vec<Element>,
    pub(crate) studios: Vec<StudioInventory>,
    pub(crate) drawings: Vec<Element>,
    pub(crate) jobs: Vec<ExportJob>,
    pub(crate) collisions: Vec<Collision>,
    pub(crate) log: OperationLog,
    pub(crate) archive_path: Option<PathBuf>,
    /// Blobs this run stored in the document, for post-run cleanup.
    pub(crate) created_blobs: Vec<String>,
}

impl WorkflowState {
    pub fn new(ctx: DocumentContext) -> Self {
        Self {
            ctx,
            stage: Stage::Init,
            elements: Vec::new(),
            studios: Vec::new(),
            drawings: Vec::new(),
            jobs: Vec::new(),
            collisions: Vec::new(),
            log: OperationLog::default(),
            archive_path: None,
            created_blobs: Vec::new(),
        }
    }

    pub fn context(&self) -> &DocumentContext {
        &self.ctx
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn studios(&self) -> &[StudioInventory] {
        &self.studios
    }

    pub fn drawings(&self) -> &[Element] {
        &self.drawings
    }

    pub fn jobs(&self) -> &[ExportJob] {
        &self.jobs
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn archive_path(&self) -> Option<&PathBuf> {
        self.archive_path.as_ref()
    }

    pub fn created_blobs(&self) -> &[String] {
        &self.created_blobs
    }

    pub(crate) fn next_job_id(&self) -> JobId {
        JobId(self.jobs.len() as u32 + 1)
    }

    pub(crate) fn at_stage(&self, stage: Stage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    pub(crate) fn logged(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::info!(stage = self.stage.label(), "{message}");
        self.log.push(message);
        self
    }

    pub(crate) fn warned(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(stage = self.stage.label(), "{message}");
        self.log.push(format!("WARNING: {message}"));
        self
    }

    /// Record a finished job and the blob it stored, if any.
    pub(crate) fn with_job(mut self, job: ExportJob) -> Self {
        if let Some(ArtifactRef::BlobElement(id)) = &job.artifact {
            if job.status == JobStatus::Done {
                self.created_blobs.push(id.clone());
            }
        }
        let line = match job.status {
            JobStatus::Done => format!("{} {} exported", job.id, job.label()),
            JobStatus::Failed => format!(
                "{} {} failed: {}",
                job.id,
                job.label(),
                job.error.as_deref().unwrap_or("unknown error")
            ),
            JobStatus::Pending | JobStatus::Translating => {
                format!("{} {} queued", job.id, job.label())
            }
        };
        let warnings = job.warnings.clone();
        self.jobs.push(job);
        let mut next = self.logged(line);
        for warning in warnings {
            next = next.warned(warning);
        }
        next
    }
}
