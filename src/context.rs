//! Document addressing.
//!
//! A [`DocumentContext`] names one document plus exactly one workspace or
//! version. It is passed explicitly to every remote call; nothing in the
//! engine reads ambient document state.
use crate::error::{ExportError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Live, mutable editing branch.
    Workspace,
    /// Frozen snapshot; no mutation is possible.
    Version,
}

impl Mode {
    /// Path segment used by the platform's REST routes.
    pub fn as_segment(self) -> &'static str {
        match self {
            Mode::Workspace => "w",
            Mode::Version => "v",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContext {
    document_id: String,
    mode: Mode,
    reference_id: String,
}

impl DocumentContext {
    /// Build a context; exactly one of `workspace_id` / `version_id` must be set.
    pub fn make(
        document_id: &str,
        workspace_id: Option<&str>,
        version_id: Option<&str>,
    ) -> Result<Self> {
        let document_id = non_blank(document_id, "document id")?;
        let (mode, reference_id) = match (workspace_id, version_id) {
            (Some(wid), None) => (Mode::Workspace, non_blank(wid, "workspace id")?),
            (None, Some(vid)) => (Mode::Version, non_blank(vid, "version id")?),
            (Some(_), Some(_)) => {
                return Err(ExportError::Config(
                    "specify either a workspace id or a version id, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(ExportError::Config(
                    "a workspace id or a version id is required".to_string(),
                ))
            }
        };
        Ok(Self {
            document_id,
            mode,
            reference_id,
        })
    }

    pub fn workspace(document_id: &str, workspace_id: &str) -> Result<Self> {
        Self::make(document_id, Some(workspace_id), None)
    }

    pub fn version(document_id: &str, version_id: &str) -> Result<Self> {
        Self::make(document_id, None, Some(version_id))
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn reference_id(&self) -> &str {
        &self.reference_id
    }

    pub fn is_mutable(&self) -> bool {
        self.mode == Mode::Workspace
    }

    /// Fail fast before issuing a request that a version would reject.
    pub fn require_mutable(&self, operation: &'static str) -> Result<()> {
        if self.is_mutable() {
            Ok(())
        } else {
            Err(ExportError::ReadOnlyMode { operation })
        }
    }

    /// `/d/{did}/{w|v}/{id}` followed by `suffix`.
    pub fn path(&self, suffix: &str) -> String {
        format!(
            "/d/{}/{}/{}{}",
            self.document_id,
            self.mode.as_segment(),
            self.reference_id,
            suffix
        )
    }
}

impl fmt::Display for DocumentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.mode {
            Mode::Workspace => "workspace",
            Mode::Version => "version",
        };
        write!(f, "{} ({label} {})", self.document_id, self.reference_id)
    }
}

fn non_blank(value: &str, label: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ExportError::Config(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_string())
}
