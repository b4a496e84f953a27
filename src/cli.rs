//! Command-line arguments and what they ask the binary to do.
use crate::config::DocumentConfig;
use crate::context::DocumentContext;
use crate::error::{ExportError, Result};
use crate::workflow::ExportSettings;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "onshape-export",
    version,
    about = "Export DXF and PDF manufacturing files from Onshape documents",
    after_help = "Run without arguments to export the configured document, or the interactive menu when none is configured.\n\nExamples:\n  onshape-export --setup\n  onshape-export --doc-id <did> --workspace-id <wid> --clean-after\n  onshape-export --doc-id <did> --version-id <vid> --out release-exports\n  onshape-export --interactive"
)]
pub struct Args {
    /// Run the setup wizard (credentials and default document)
    #[arg(long, conflicts_with = "interactive")]
    pub setup: bool,

    /// Pick the document, branch and options interactively
    #[arg(long)]
    pub interactive: bool,

    /// Directory for archives and the critical error log
    #[arg(long, value_name = "DIR", default_value = "exports")]
    pub out: PathBuf,

    /// Debug-level logging
    #[arg(long)]
    pub verbose: bool,

    /// Delete existing DXF/PDF exports from the workspace first
    #[arg(long)]
    pub clean_before: bool,

    /// Delete this run's exports from the workspace after packaging
    #[arg(long)]
    pub clean_after: bool,

    /// Document to export
    #[arg(long, value_name = "ID")]
    pub doc_id: Option<String>,

    /// Workspace of --doc-id (mutable)
    #[arg(long, value_name = "ID")]
    pub workspace_id: Option<String>,

    /// Version of --doc-id (read-only)
    #[arg(long, value_name = "ID")]
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Setup,
    Interactive,
    Export(DocumentContext),
}

impl Args {
    /// Decide what to do from the flags, falling back to `config`.
    pub fn action(&self, config: &DocumentConfig) -> Result<Action> {
        if self.setup {
            return Ok(Action::Setup);
        }
        if let Some(document_id) = &self.doc_id {
            let ctx = DocumentContext::make(
                document_id,
                self.workspace_id.as_deref(),
                self.version_id.as_deref(),
            )?;
            return Ok(Action::Export(ctx));
        }
        if self.workspace_id.is_some() || self.version_id.is_some() {
            return Err(ExportError::Config(
                "--workspace-id and --version-id require --doc-id".to_string(),
            ));
        }
        if self.interactive {
            return Ok(Action::Interactive);
        }
        Ok(match config.context()? {
            Some(ctx) => Action::Export(ctx),
            None => Action::Interactive,
        })
    }

    pub fn settings(&self, config: &DocumentConfig) -> ExportSettings {
        ExportSettings {
            clean_before: self.clean_before,
            clean_after: self.clean_after,
            naming: config.naming(),
            collision_policy: config.collision_policy(),
            ..ExportSettings::new(&self.out)
        }
    }
}
