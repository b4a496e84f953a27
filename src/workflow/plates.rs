//! Plate export through temporary drawings.
//!
//! Regular parts have no flat pattern, so each one is laid flat by the
//! Part Studio's orient feature, placed as a single view on a temporary
//! drawing, and translated from there. Both the feature toggle and the
//! drawing are held by guards that undo themselves on every exit path.
use super::state::{ExportJob, JobSource, StudioInventory, WorkflowState};
use super::steps::{self, categorize_parts};
use super::StepEnv;
use crate::api::{ExportFormat, Feature, Part, TranslationRequest, TranslationSource, TEMP_PREFIX};
use crate::error::{ExportError, Result};
use crate::lifecycle::ResourceClient;
use crate::naming::{self, NameInputs};
use regex::Regex;
use std::sync::OnceLock;

fn orient_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Orient Plates for Export(?: (\d+))?$").expect("orient feature pattern")
    })
}

/// Pick the orient feature: the highest numeric suffix wins, a bare name
/// counts as 0, and ties go to the feature defined last.
pub fn select_orient_feature(features: &[Feature]) -> Option<&Feature> {
    features
        .iter()
        .filter_map(|feature| {
            let captures = orient_pattern().captures(feature.name.trim())?;
            let index = match captures.get(1) {
                Some(digits) => digits.as_str().parse::<u64>().ok()?,
                None => 0,
            };
            Some((index, feature))
        })
        .max_by_key(|(index, _)| *index)
        .map(|(_, feature)| feature)
}

/// Holds the orient feature in its unsuppressed state.
struct OrientSession<'c, 'a> {
    client: &'c ResourceClient<'a>,
    element_id: String,
    feature: Feature,
    restored: bool,
}

impl<'c, 'a> OrientSession<'c, 'a> {
    fn start(client: &'c ResourceClient<'a>, element_id: &str, feature: &Feature) -> Result<Self> {
        let mut session = Self {
            client,
            element_id: element_id.to_string(),
            feature: feature.clone(),
            restored: true,
        };
        if !feature.suppressed {
            return Ok(session);
        }
        let previous = client.microversion(element_id)?;
        // A failed unsuppress may still have been applied.
        session.restored = false;
        client.update_feature_suppression(element_id, feature, false)?;
        client.wait_for_microversion_change(element_id, previous.as_deref())?;
        Ok(session)
    }

    /// Re-suppress and wait for it to land. If the request fails the
    /// guard stays armed and `Drop` tries once more.
    fn finish(mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        let previous = match self.client.microversion(&self.element_id) {
            Ok(previous) => previous,
            Err(err) => {
                tracing::warn!(
                    element_id = %self.element_id,
                    error = %err,
                    "no microversion before re-suppressing orient feature"
                );
                None
            }
        };
        self.resuppress()?;
        // Without a baseline any microversion ends the wait.
        self.client
            .wait_for_microversion_change(&self.element_id, previous.as_deref())?;
        Ok(())
    }

    fn resuppress(&mut self) -> Result<()> {
        self.client
            .update_feature_suppression(&self.element_id, &self.feature, true)?;
        self.restored = true;
        Ok(())
    }
}

impl Drop for OrientSession<'_, '_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(err) = self.resuppress() {
            tracing::warn!(
                element_id = %self.element_id,
                feature = %self.feature.name,
                error = %err,
                "could not re-suppress orient feature"
            );
        }
    }
}

/// A `TEMP_` drawing that is deleted when the guard goes away.
struct TempDrawing<'c, 'a> {
    client: &'c ResourceClient<'a>,
    id: String,
    finished: bool,
}

impl<'c, 'a> TempDrawing<'c, 'a> {
    fn create(client: &'c ResourceClient<'a>, part_name: &str) -> Result<Self> {
        let name = format!(
            "{TEMP_PREFIX}{}_{}",
            naming::sanitize(part_name),
            chrono::Utc::now().timestamp()
        );
        match client.create_drawing(&name) {
            Ok(id) => Ok(Self {
                client,
                id,
                finished: false,
            }),
            Err(err) => {
                // The platform sometimes creates the drawing and still errors.
                let report = client.delete_by_name(&name);
                if report.deleted > 0 {
                    tracing::info!(name = %name, "removed drawing left by failed create");
                }
                Err(err)
            }
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    /// On failure the guard stays armed and `Drop` retries the delete.
    fn finish(mut self) -> Result<()> {
        self.client.delete_element(&self.id)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for TempDrawing<'_, '_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.client.delete_element(&self.id) {
            tracing::warn!(drawing_id = %self.id, error = %err, "could not delete temporary drawing");
        }
    }
}

/// Export every regular part of every Part Studio as a DXF plate.
pub(crate) fn export_plates(prior: &WorkflowState, env: &StepEnv<'_>) -> Result<WorkflowState> {
    if !prior.context().is_mutable() {
        return Ok(prior
            .clone()
            .logged("Skipping plate export: version context is read-only"));
    }
    let mut state = prior.clone();
    for studio in prior.studios.iter().filter(|s| !s.regular_parts.is_empty()) {
        env.client.cancel_token().check()?;
        state = export_studio_plates(state, env, studio)?;
    }
    Ok(state)
}

fn export_studio_plates(
    mut state: WorkflowState,
    env: &StepEnv<'_>,
    studio: &StudioInventory,
) -> Result<WorkflowState> {
    let element = &studio.element;
    let features = match env.client.list_features(&element.id) {
        Ok(features) => features,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            return Ok(state.warned(format!(
                "Skipping plates in '{}': could not list features: {err}",
                element.name
            )))
        }
    };
    let Some(feature) = select_orient_feature(&features) else {
        return Ok(state.logged(format!(
            "No orient feature in '{}', skipping {} plates",
            element.name,
            studio.regular_parts.len()
        )));
    };
    state = state.logged(format!(
        "Orienting '{}' with feature '{}'",
        element.name, feature.name
    ));

    let session = match OrientSession::start(&env.client, &element.id, feature) {
        Ok(session) => session,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            for part in &studio.regular_parts {
                let job = unexported_job(&state, studio, part, &err);
                state = state.with_job(job);
            }
            return Ok(state);
        }
    };

    let parts = match env.client.list_parts(&element.id, true) {
        Ok(parts) => categorize_parts(parts).1,
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            state = state.warned(format!(
                "Could not re-list parts in '{}' after orienting: {err}",
                element.name
            ));
            studio.regular_parts.clone()
        }
    };

    for part in &parts {
        env.client.cancel_token().check()?;
        let job = match export_plate(&state, env, studio, part) {
            Ok(job) => job,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => unexported_job(&state, studio, part, &err),
        };
        state = state.with_job(job);
    }

    if let Err(err) = session.finish() {
        state = state.warned(format!(
            "Restoring orient feature in '{}' reported an error: {err}",
            element.name
        ));
    }
    Ok(state)
}

fn export_plate(
    state: &WorkflowState,
    env: &StepEnv<'_>,
    studio: &StudioInventory,
    part: &Part,
) -> Result<ExportJob> {
    let drawing = TempDrawing::create(&env.client, &part.name)?;
    let previous = env.client.microversion(drawing.id())?;
    env.client
        .add_view(drawing.id(), &studio.element.id, &part.part_id)?;
    env.client
        .wait_for_microversion_change(drawing.id(), previous.as_deref())?;
    let settle = env.client.polling().settle;
    if !settle.is_zero() {
        std::thread::sleep(settle);
    }

    let job = steps::part_job(state, env, &studio.element, part, &part.part_id)?;
    let request = TranslationRequest {
        format: ExportFormat::Dxf,
        source: TranslationSource::Drawing,
        destination_name: job.name_inputs.requested_name.clone(),
        store_in_document: true,
    };
    let job = steps::translate_job(env, job, drawing.id(), &request)?;
    match drawing.finish() {
        Ok(()) => Ok(job),
        Err(err) => Ok(job.with_warning(format!(
            "temporary drawing delete failed, retried on release: {err}"
        ))),
    }
}

/// A plate job that never reached translation.
fn unexported_job(
    state: &WorkflowState,
    studio: &StudioInventory,
    part: &Part,
    err: &ExportError,
) -> ExportJob {
    let inputs = NameInputs {
        base_name: part.name.clone(),
        requested_name: naming::requested_name(&part.name, None),
        ..NameInputs::default()
    };
    ExportJob::new(
        state.next_job_id(),
        JobSource {
            element_id: studio.element.id.clone(),
            element_name: studio.element.name.clone(),
            part_id: Some(part.part_id.clone()),
        },
        ExportFormat::Dxf,
        inputs,
    )
    .failed(err)
}
