//! Pipeline stages other than plate export.
use super::state::{ExportJob, JobSource, JobStatus, StudioInventory, WorkflowState};
use super::StepEnv;
use crate::api::{
    ArtifactRef, Element, ElementKind, ExportFormat, Part, PartProperties, TranslationRequest,
    TranslationSource,
};
use crate::error::{ExportError, Result};
use crate::lifecycle::CleanupScope;
use crate::naming::{self, NameInputs};
use crate::package;
use chrono::Local;

/// Create the output directory and prove the document is reachable.
pub(crate) fn init(prior: &WorkflowState, env: &StepEnv<'_>) -> Result<WorkflowState> {
    let out_dir = &env.settings.out_dir;
    std::fs::create_dir_all(out_dir)
        .map_err(|err| ExportError::io(format!("create {}", out_dir.display()), err))?;
    let elements = env.client.list_elements()?;
    let state = WorkflowState {
        elements,
        ..prior.clone()
    };
    let count = state.elements.len();
    Ok(state
        .logged(format!("Starting export for {}", prior.context()))
        .logged(format!("Document has {count} elements")))
}

/// Remove leftovers of earlier runs, and earlier exports when asked to.
pub(crate) fn prior_cleanup(prior: &WorkflowState, env: &StepEnv<'_>) -> Result<WorkflowState> {
    let mut state = prior.clone();
    if !prior.context().is_mutable() {
        if env.settings.clean_before {
            state = state.warned("clean-before ignored: version context is read-only");
        }
        return Ok(state.logged("Skipping prior cleanup: version context is read-only"));
    }

    let temp = env.client.cleanup_temp_elements();
    state = state.logged(format!(
        "Removed {} leftover temporary elements",
        temp.deleted
    ));
    if temp.failed > 0 {
        state = state.warned(format!(
            "{} temporary elements could not be removed",
            temp.failed
        ));
    }

    if env.settings.clean_before {
        let exports = env.client.cleanup_exports(CleanupScope::AllExports);
        state = state.logged(format!("Pre-cleaned {} existing exports", exports.deleted));
        if exports.failed > 0 {
            state = state.warned(format!(
                "{} existing exports could not be removed",
                exports.failed
            ));
        }
    }
    Ok(state)
}

/// Split flattened bodies from regular parts; the sheet-metal originals of
/// flat patterns are not exported a second time.
pub(crate) fn categorize_parts(parts: Vec<Part>) -> (Vec<Part>, Vec<Part>) {
    let (flat_patterns, regular): (Vec<Part>, Vec<Part>) =
        parts.into_iter().partition(|part| part.is_flattened_body);
    let regular_parts = regular
        .into_iter()
        .filter(|part| {
            !flat_patterns
                .iter()
                .any(|flat| flat.unflattened_part_id.as_deref() == Some(part.part_id.as_str()))
        })
        .collect();
    (flat_patterns, regular_parts)
}

/// Inventory Part Studios and collect pre-existing drawings.
pub(crate) fn discover(prior: &WorkflowState, env: &StepEnv<'_>) -> Result<WorkflowState> {
    let elements = env.client.list_elements()?;
    let mut state = WorkflowState {
        elements: elements.clone(),
        studios: Vec::new(),
        drawings: Vec::new(),
        ..prior.clone()
    };

    for studio in elements.iter().filter(|e| e.kind == ElementKind::PartStudio) {
        env.client.cancel_token().check()?;
        match env.client.list_parts(&studio.id, true) {
            Ok(parts) => {
                let (flat_patterns, regular_parts) = categorize_parts(parts);
                state = state.logged(format!(
                    "Part Studio '{}': {} flat patterns, {} parts",
                    studio.name,
                    flat_patterns.len(),
                    regular_parts.len()
                ));
                state.studios.push(StudioInventory {
                    element: studio.clone(),
                    flat_patterns,
                    regular_parts,
                });
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                state = state.warned(format!(
                    "Skipping Part Studio '{}': could not list parts: {err}",
                    studio.name
                ));
            }
        }
    }

    state.drawings = elements
        .into_iter()
        .filter(|e| e.is_drawing() && !e.is_temporary())
        .collect();
    let drawing_count = state.drawings.len();
    Ok(state.logged(format!("Found {drawing_count} drawings")))
}

/// Translate every flat pattern straight from its Part Studio.
pub(crate) fn export_sheet_metal(prior: &WorkflowState, env: &StepEnv<'_>) -> Result<WorkflowState> {
    let mut state = prior.clone();
    let mut exported = 0usize;
    for studio in &prior.studios {
        for flat in &studio.flat_patterns {
            env.client.cancel_token().check()?;
            let properties_part = flat.unflattened_part_id.as_deref().unwrap_or(&flat.part_id);
            let job = part_job(&state, env, &studio.element, flat, properties_part)?;
            let request = TranslationRequest {
                format: ExportFormat::Dxf,
                source: TranslationSource::PartStudio {
                    part_ids: vec![flat.part_id.clone()],
                },
                destination_name: job.name_inputs.requested_name.clone(),
                store_in_document: prior.context().is_mutable(),
            };
            let job = translate_job(env, job, &studio.element.id, &request)?;
            state = state.with_job(job);
            exported += 1;
        }
    }
    if exported == 0 {
        state = state.logged("No sheet metal flat patterns found");
    }
    Ok(state)
}

/// Translate every pre-existing drawing to PDF.
pub(crate) fn export_drawings(prior: &WorkflowState, env: &StepEnv<'_>) -> Result<WorkflowState> {
    let mut state = prior.clone();
    for drawing in &prior.drawings {
        env.client.cancel_token().check()?;
        let (properties, warning) = drawing_properties(env, drawing)?;
        let inputs = NameInputs {
            base_name: drawing.name.clone(),
            thickness_mm: None,
            properties,
            requested_name: drawing.name.clone(),
            result_name: None,
        };
        let mut job = ExportJob::new(
            state.next_job_id(),
            JobSource {
                element_id: drawing.id.clone(),
                element_name: drawing.name.clone(),
                part_id: None,
            },
            ExportFormat::Pdf,
            inputs,
        );
        if let Some(warning) = warning {
            job = job.with_warning(warning);
        }
        let request = TranslationRequest {
            format: ExportFormat::Pdf,
            source: TranslationSource::Drawing,
            destination_name: drawing.name.clone(),
            store_in_document: prior.context().is_mutable(),
        };
        let job = translate_job(env, job, &drawing.id, &request)?;
        state = state.with_job(job);
    }
    if prior.drawings.is_empty() {
        state = state.logged("No drawings to export");
    }
    Ok(state)
}

/// Name, download and archive every finished job.
pub(crate) fn package(prior: &WorkflowState, env: &StepEnv<'_>) -> Result<WorkflowState> {
    let settings = env.settings;
    let mut state = WorkflowState {
        jobs: Vec::with_capacity(prior.jobs.len()),
        ..prior.clone()
    };

    let named: Vec<ExportJob> = prior
        .jobs
        .iter()
        .cloned()
        .map(|job| {
            if job.status == JobStatus::Done {
                let name = naming::resolve(&job.name_inputs, job.kind, &settings.naming);
                job.with_target(name)
            } else {
                job
            }
        })
        .collect();

    state.collisions = naming::find_collisions(
        named
            .iter()
            .filter_map(|job| Some((job.id, job.target_filename.as_deref()?))),
    );
    for collision in collision_lines(&state) {
        state = state.warned(collision);
    }

    let mut downloaded: Vec<(ExportJob, Vec<u8>)> = Vec::new();
    for job in named {
        env.client.cancel_token().check()?;
        let Some(artifact) = job.artifact.clone().filter(|_| job.status == JobStatus::Done)
        else {
            state.jobs.push(job);
            continue;
        };
        match env.client.download(&artifact) {
            Ok(bytes) => downloaded.push((job, bytes)),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                let job = job.failed(&err);
                state = state.warned(format!("{} {} download failed: {err}", job.id, job.label()));
                state.jobs.push(job);
            }
        }
    }

    let resolved: Vec<_> = downloaded
        .iter()
        .map(|(job, _)| (job.id, job.target_filename.clone().unwrap_or_default()))
        .collect();
    let planned = package::plan_entries(&resolved, settings.collision_policy);

    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    for ((job, bytes), entry) in downloaded.into_iter().zip(planned) {
        let Some(entry_name) = entry.entry_name.clone() else {
            state = state.warned(format!(
                "{} {} not packaged: '{}' already taken",
                job.id,
                job.label(),
                entry.resolved_name
            ));
            state.jobs.push(job);
            continue;
        };
        if entry.was_renamed() {
            state = state.logged(format!(
                "{} {} packaged as '{entry_name}'",
                job.id,
                job.label()
            ));
        }
        let job = rename_stored_blob(env, job, &entry_name);
        files.push((entry_name, bytes));
        state.jobs.push(job);
    }
    state.jobs.sort_by_key(|job| job.id);

    if files.is_empty() {
        return Ok(state.logged("No artifacts to package"));
    }

    let path = package::archive_path(&settings.out_dir, Local::now());
    state = state.logged(format!(
        "Packaging {} files into {}",
        files.len(),
        path.display()
    ));
    for job in &state.jobs {
        if let Some(name) = job.target_filename.as_deref().filter(|_| job.status == JobStatus::Done) {
            state.log.push(format!("  {} -> {name}", job.id));
        }
    }
    package::write_archive(&path, &files, &state.log.render())?;
    state.archive_path = Some(path);
    Ok(state)
}

/// Delete the blobs this run stored, when asked to.
pub(crate) fn post_cleanup(prior: &WorkflowState, env: &StepEnv<'_>) -> Result<WorkflowState> {
    let state = prior.clone();
    if !env.settings.clean_after {
        return Ok(state);
    }
    if !prior.context().is_mutable() {
        return Ok(state.warned("clean-after ignored: version context is read-only"));
    }
    let report = env
        .client
        .cleanup_exports(CleanupScope::Only(prior.created_blobs()));
    let mut state = state.logged(format!(
        "Post-cleaned {} exports from document",
        report.deleted
    ));
    if report.failed > 0 {
        state = state.warned(format!("{} exports could not be removed", report.failed));
    }
    Ok(state)
}

/// Build a DXF job for one part, measuring thickness and reading properties.
pub(crate) fn part_job(
    state: &WorkflowState,
    env: &StepEnv<'_>,
    studio: &Element,
    part: &Part,
    properties_part_id: &str,
) -> Result<ExportJob> {
    let mut warnings = Vec::new();
    let thickness_mm = match env.client.part_bounding_box(&studio.id, &part.part_id) {
        Ok(bbox) => naming::thickness_mm(&bbox),
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => {
            warnings.push(format!("thickness unknown for '{}': {err}", part.name));
            None
        }
    };

    let properties = if env.settings.naming.use_part_properties {
        match env
            .client
            .part_properties(&studio.id, Some(properties_part_id))
        {
            Ok(props) => Some(props),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warnings.push(format!("properties unavailable for '{}': {err}", part.name));
                None
            }
        }
    } else {
        None
    };

    let inputs = NameInputs {
        base_name: part.name.clone(),
        thickness_mm,
        properties,
        requested_name: naming::requested_name(&part.name, thickness_mm),
        result_name: None,
    };
    let job = ExportJob::new(
        state.next_job_id(),
        JobSource {
            element_id: studio.id.clone(),
            element_name: studio.name.clone(),
            part_id: Some(part.part_id.clone()),
        },
        ExportFormat::Dxf,
        inputs,
    );
    Ok(warnings
        .into_iter()
        .fold(job, |job, warning| job.with_warning(warning)))
}

/// Run one translation; only run-stopping errors escape.
pub(crate) fn translate_job(
    env: &StepEnv<'_>,
    job: ExportJob,
    element_id: &str,
    request: &TranslationRequest,
) -> Result<ExportJob> {
    let job = job.translating();
    match env.client.translate_and_wait(element_id, request) {
        Ok(outcome) => Ok(job.completed(outcome)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            tracing::warn!(job = %job.id, error = %err, "export job failed");
            Ok(job.failed(&err))
        }
    }
}

fn drawing_properties(
    env: &StepEnv<'_>,
    drawing: &Element,
) -> Result<(Option<PartProperties>, Option<String>)> {
    if !env.settings.naming.use_part_properties {
        return Ok((None, None));
    }
    let lookup = env
        .client
        .drawing_references(&drawing.id)
        .and_then(|targets| match targets.first() {
            Some(target) => env.client.part_properties(target, None).map(Some),
            None => Ok(None),
        });
    match lookup {
        Ok(Some(props)) => Ok((Some(props), None)),
        Ok(None) => Ok((
            None,
            Some(format!("drawing '{}' references no element", drawing.name)),
        )),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => Ok((
            None,
            Some(format!("properties unavailable for '{}': {err}", drawing.name)),
        )),
    }
}

/// Give the stored blob the packaged name unless an export rule named it.
fn rename_stored_blob(env: &StepEnv<'_>, job: ExportJob, entry_name: &str) -> ExportJob {
    let Some(ArtifactRef::BlobElement(blob_id)) = job.artifact.clone() else {
        return job;
    };
    if !env.client.context().is_mutable() {
        return job;
    }
    let rule_named = env.settings.naming.prefer_export_rule_names
        && naming::export_rule_name(&job.name_inputs, job.kind).is_some();
    if rule_named || job.name_inputs.result_name.as_deref() == Some(entry_name) {
        return job;
    }
    match env.client.rename_element(&blob_id, entry_name) {
        Ok(()) => job,
        Err(err) => {
            let warning = format!("could not rename blob {blob_id} to '{entry_name}': {err}");
            tracing::warn!(job = %job.id, "{warning}");
            job.with_warning(warning)
        }
    }
}

fn collision_lines(state: &WorkflowState) -> Vec<String> {
    state
        .collisions
        .iter()
        .map(|collision| {
            let ids: Vec<String> = collision.job_ids.iter().map(ToString::to_string).collect();
            format!(
                "Filename collision: '{}' resolved for {}",
                collision.filename,
                ids.join(", ")
            )
        })
        .collect()
}
