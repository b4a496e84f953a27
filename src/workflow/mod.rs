//! Export workflow engine.
//!
//! The run is a fixed pipeline of stages, each a plain function from the
//! previous [`WorkflowState`] to the next. Job-level failures are recorded on
//! the job and the run continues; a stage only returns an error when the
//! whole run must stop (authentication, configuration, cancellation, or an
//! unusable document). Stopping after INIT triggers a best-effort sweep of
//! temporary elements before the error is returned.
mod plates;
pub mod state;
mod steps;
pub mod summary;

use crate::api::RemoteApi;
use crate::context::DocumentContext;
use crate::error::{ExportError, Result};
use crate::lifecycle::{Polling, ResourceClient};
use crate::naming::NamingOptions;
use crate::package::CollisionPolicy;
use crate::retry::CancelToken;
use state::{Stage, WorkflowState};
use std::path::PathBuf;
use std::time::Instant;
use summary::RunSummary;

pub use plates::select_orient_feature;

/// Everything the engine needs besides the platform and the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    pub out_dir: PathBuf,
    /// Delete earlier DXF/PDF exports from the workspace before exporting.
    pub clean_before: bool,
    /// Delete the blobs this run stored once the archive is written.
    pub clean_after: bool,
    pub naming: NamingOptions,
    pub collision_policy: CollisionPolicy,
    pub polling: Polling,
}

impl ExportSettings {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            clean_before: false,
            clean_after: false,
            naming: NamingOptions::default(),
            collision_policy: CollisionPolicy::default(),
            polling: Polling::default(),
        }
    }
}

/// Shared, read-only inputs for every step.
pub(crate) struct StepEnv<'a> {
    pub(crate) client: ResourceClient<'a>,
    pub(crate) settings: &'a ExportSettings,
}

type Step = fn(&WorkflowState, &StepEnv<'_>) -> Result<WorkflowState>;

const PIPELINE: [(Stage, Step); 8] = [
    (Stage::Init, steps::init),
    (Stage::PriorCleanup, steps::prior_cleanup),
    (Stage::Discover, steps::discover),
    (Stage::ExportSheetMetal, steps::export_sheet_metal),
    (Stage::ExportPlates, plates::export_plates),
    (Stage::ExportDrawings, steps::export_drawings),
    (Stage::Package, steps::package),
    (Stage::PostCleanup, steps::post_cleanup),
];

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: WorkflowState,
    pub summary: RunSummary,
}

/// Run the whole pipeline against `ctx`.
pub fn run(
    api: &dyn RemoteApi,
    ctx: DocumentContext,
    settings: &ExportSettings,
    cancel: CancelToken,
) -> Result<RunOutcome> {
    let started = Instant::now();
    let env = StepEnv {
        client: ResourceClient::new(api, &ctx, settings.polling, cancel),
        settings,
    };
    let mut state = WorkflowState::new(ctx.clone());

    for (stage, step) in PIPELINE {
        let entered = state.at_stage(stage);
        let result = env
            .client
            .cancel_token()
            .check()
            .and_then(|()| step(&entered, &env));
        state = match result {
            Ok(next) => next,
            Err(err) => return Err(abort(&env, &entered, err)),
        };
    }

    let state = state.at_stage(Stage::Done).logged("Export complete");
    let summary = RunSummary::from_state(&state);
    tracing::info!(
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        collisions = summary.collisions.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "export finished"
    );
    Ok(RunOutcome { state, summary })
}

fn abort(env: &StepEnv<'_>, state: &WorkflowState, err: ExportError) -> ExportError {
    tracing::error!(stage = state.stage().label(), error = %err, "export aborted");
    if state.stage() > Stage::Init && env.client.context().is_mutable() {
        let report = env.client.cleanup_temp_elements();
        tracing::info!(
            deleted = report.deleted,
            failed = report.failed,
            "cleanup after abort"
        );
    }
    err
}
