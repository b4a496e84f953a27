//! End-to-end export runs against the in-memory platform.
mod common;

use common::{
    archive_entries, archive_entry_text, settings, version, workspace, FakePlatform,
    ORIENT_FEATURE,
};
use onshape_export::api::{ElementKind, PartProperties};
use onshape_export::error::ExportError;
use onshape_export::lifecycle::{Polling, ResourceClient};
use onshape_export::retry::CancelToken;
use onshape_export::workflow::state::{JobStatus, Stage};
use onshape_export::workflow::{self, RunOutcome};

fn run(platform: &FakePlatform, out_dir: &std::path::Path) -> RunOutcome {
    workflow::run(platform, workspace(), &settings(out_dir), CancelToken::new()).expect("run")
}

fn temp_elements(platform: &FakePlatform) -> Vec<String> {
    platform
        .elements()
        .into_iter()
        .filter(|e| e.name.starts_with("TEMP_"))
        .map(|e| e.name)
        .collect()
}

#[test]
fn sheet_metal_and_drawing_are_packaged_with_the_log() {
    let platform = FakePlatform::new()
        .with_part_studio("ps1", "Frame")
        .with_sheet_metal("ps1", "SM1", "Bracket", 3.0)
        .with_drawing("dw1", "Assembly Drawing", &["ps1"]);
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert_eq!(outcome.state.stage(), Stage::Done);
    assert_eq!(outcome.summary.total, 2);
    assert_eq!(outcome.summary.succeeded.len(), 2);
    assert!(outcome.summary.failed.is_empty());
    assert_eq!(outcome.summary.exit_code(), 0);

    let archive = outcome.summary.archive_path.clone().expect("archive");
    assert!(archive.starts_with(dir.path()));
    assert_eq!(
        archive_entries(&archive),
        vec!["3mm_Bracket.dxf", "Assembly Drawing.pdf", "export_operation.log"]
    );
    let log = archive_entry_text(&archive, "export_operation.log");
    assert!(log.contains("Starting export for"));
    assert!(log.contains("job-1 Bracket [SM1-flat] exported"));

    // The flattened sheet-metal part is not exported again as a plate.
    assert_eq!(platform.count_calls("create_drawing"), 0);
    assert_eq!(platform.count_calls("translate ps1 DXF"), 1);
    assert_eq!(platform.count_calls("translate dw1 PDF"), 1);
}

#[test]
fn plates_go_through_a_temporary_drawing_that_is_removed() {
    let platform = FakePlatform::new()
        .with_part_studio("ps1", "Frame")
        .with_part("ps1", "P1", "Base Plate", 6.0)
        .with_orient_feature("ps1", ORIENT_FEATURE)
        .with_orient_feature("ps1", "Orient Plates for Export 2");
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert_eq!(outcome.summary.succeeded.len(), 1);
    let archive = outcome.summary.archive_path.clone().expect("archive");
    assert_eq!(
        archive_entries(&archive),
        vec!["6mm_Base Plate.dxf", "export_operation.log"]
    );

    // The numbered feature wins and ends up suppressed again.
    let calls = platform.calls();
    assert!(calls.contains(&"update_feature_suppression ps1 F2 false".to_string()));
    assert!(calls.contains(&"update_feature_suppression ps1 F2 true".to_string()));
    assert_eq!(platform.count_calls("update_feature_suppression ps1 F1"), 0);
    assert_eq!(platform.feature_suppressed("ps1", "F2"), Some(true));

    assert_eq!(platform.count_calls("create_drawing TEMP_Base Plate_"), 1);
    assert_eq!(platform.count_calls("add_view"), 1);
    assert!(temp_elements(&platform).is_empty());
}

#[test]
fn failed_drawing_creation_still_restores_the_document() {
    let platform = FakePlatform::new()
        .with_part_studio("ps1", "Frame")
        .with_part("ps1", "P1", "Base Plate", 6.0)
        .with_orient_feature("ps1", ORIENT_FEATURE)
        .broken_drawing_creation();
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert_eq!(outcome.summary.failed.len(), 1);
    assert_eq!(outcome.state.jobs()[0].status, JobStatus::Failed);
    assert_eq!(platform.feature_suppressed("ps1", "F1"), Some(true));
    assert!(temp_elements(&platform).is_empty());
    assert_eq!(platform.count_calls("add_view"), 0);
    assert!(outcome.summary.archive_path.is_none());
    assert_eq!(outcome.summary.exit_code(), 2);
}

fn single_plate() -> FakePlatform {
    FakePlatform::new()
        .with_part_studio("ps1", "Frame")
        .with_part("ps1", "P1", "Base Plate", 6.0)
        .with_orient_feature("ps1", ORIENT_FEATURE)
}

#[test]
fn unreadable_microversion_on_release_still_resuppresses() {
    let platform = single_plate().failing_after("delete_element", "list_elements", 1);
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert_eq!(platform.feature_suppressed("ps1", "F1"), Some(true));
    assert_eq!(
        platform.count_calls("update_feature_suppression ps1 F1 true"),
        1
    );
    assert_eq!(outcome.summary.succeeded.len(), 1);
    assert!(temp_elements(&platform).is_empty());
}

#[test]
fn unsuppress_that_lands_but_errors_is_undone() {
    let platform =
        single_plate().failing_after_applying("update_feature_suppression ps1 F1 false", 1);
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert_eq!(platform.feature_suppressed("ps1", "F1"), Some(true));
    assert_eq!(
        platform.count_calls("update_feature_suppression ps1 F1 true"),
        1
    );
    assert_eq!(platform.count_calls("create_drawing"), 0);
    assert_eq!(outcome.state.jobs()[0].status, JobStatus::Failed);
    assert_eq!(outcome.summary.exit_code(), 2);
}

#[test]
fn failed_resuppress_is_retried_on_release() {
    let platform = single_plate().failing("update_feature_suppression ps1 F1 true", 1);
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert_eq!(platform.feature_suppressed("ps1", "F1"), Some(true));
    assert_eq!(
        platform.count_calls("update_feature_suppression ps1 F1 true"),
        2
    );
    assert_eq!(outcome.summary.succeeded.len(), 1);
    let archive = outcome.summary.archive_path.clone().expect("archive");
    let log = archive_entry_text(&archive, "export_operation.log");
    assert!(log.contains("Restoring orient feature in 'Frame' reported an error"));
}

#[test]
fn failed_temp_drawing_delete_is_retried_on_release() {
    let platform = single_plate().failing("delete_element drw", 1);
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert!(temp_elements(&platform).is_empty());
    assert_eq!(platform.count_calls("delete_element drw"), 2);
    assert_eq!(platform.feature_suppressed("ps1", "F1"), Some(true));
    assert_eq!(outcome.summary.succeeded.len(), 1);
    let job = &outcome.state.jobs()[0];
    assert_eq!(job.status, JobStatus::Done);
    assert!(job
        .warnings
        .iter()
        .any(|w| w.contains("temporary drawing delete failed")));
}

#[test]
fn version_exports_never_mutate_the_document() {
    let platform = FakePlatform::new()
        .with_part_studio("ps1", "Frame")
        .with_sheet_metal("ps1", "SM1", "Bracket", 2.0)
        .with_part("ps1", "P1", "Base Plate", 6.0)
        .with_orient_feature("ps1", ORIENT_FEATURE)
        .with_drawing("dw1", "Assembly Drawing", &["ps1"])
        .with_element("b0", "old.dxf", ElementKind::Blob, "dxf");
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings(dir.path());
    settings.clean_before = true;
    settings.clean_after = true;

    let outcome =
        workflow::run(&platform, version(), &settings, CancelToken::new()).expect("run");

    for mutation in [
        "delete_element",
        "create_drawing",
        "add_view",
        "update_feature_suppression",
        "rename_element",
    ] {
        assert_eq!(platform.count_calls(mutation), 0, "{mutation}");
    }
    assert!(platform.element_named("old.dxf").is_some());

    let archive = outcome.summary.archive_path.clone().expect("archive");
    assert_eq!(
        archive_entries(&archive),
        vec!["2mm_Bracket.dxf", "Assembly Drawing.pdf", "export_operation.log"]
    );
    let log = outcome.state.log();
    assert!(log.contains("clean-after ignored"));
    assert!(log.contains("Skipping plate export"));
}

#[test]
fn prior_cleanup_is_idempotent() {
    let platform = FakePlatform::new()
        .with_element("t1", "TEMP_Plate_1700000000", ElementKind::Drawing, "onshape/drawing")
        .with_element("t2", "DEBUG_VIEW_Plate", ElementKind::Drawing, "onshape/drawing")
        .with_element("ps1", "Frame", ElementKind::PartStudio, "");
    let ctx = workspace();
    let client = ResourceClient::new(&platform, &ctx, Polling::immediate(), CancelToken::new());

    let first = client.cleanup_temp_elements();
    assert_eq!((first.deleted, first.failed), (2, 0));
    let second = client.cleanup_temp_elements();
    assert_eq!((second.deleted, second.failed), (0, 0));
    assert!(platform.element_named("Frame").is_some());
}

#[test]
fn colliding_names_are_reported_once_and_still_packaged() {
    let platform = FakePlatform::new()
        .with_drawing("dw1", "Layout", &[])
        .with_drawing("dw2", "Layout", &[]);
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert_eq!(outcome.summary.collisions.len(), 1);
    let collision = &outcome.summary.collisions[0];
    assert_eq!(collision.filename, "Layout.pdf");
    assert_eq!(collision.job_ids.len(), 2);

    let archive = outcome.summary.archive_path.clone().expect("archive");
    assert_eq!(
        archive_entries(&archive),
        vec!["Layout.pdf", "Layout (2).pdf", "export_operation.log"]
    );
}

#[test]
fn export_rule_names_win_and_blobs_are_not_renamed() {
    let platform = FakePlatform::new()
        .with_drawing("dw1", "Assembly Drawing", &["ps1"])
        .with_export_rule("Assembly Drawing", "ASM-100_Rev A.pdf");
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    let archive = outcome.summary.archive_path.clone().expect("archive");
    assert_eq!(
        archive_entries(&archive),
        vec!["ASM-100_Rev A.pdf", "export_operation.log"]
    );
    assert_eq!(platform.count_calls("rename_element"), 0);
}

#[test]
fn part_properties_name_flat_patterns_and_rename_their_blobs() {
    let platform = FakePlatform::new()
        .with_part_studio("ps1", "Frame")
        .with_sheet_metal("ps1", "SM1", "Bracket", 3.0)
        .with_properties(
            "SM1",
            PartProperties {
                part_number: Some("BR-7".into()),
                revision: Some("B".into()),
                material: Some("Steel".into()),
            },
        );
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings(dir.path());
    settings.naming.use_part_properties = true;

    let outcome =
        workflow::run(&platform, workspace(), &settings, CancelToken::new()).expect("run");

    let archive = outcome.summary.archive_path.clone().expect("archive");
    assert_eq!(
        archive_entries(&archive),
        vec!["3mm Steel_BR-7_Rev B.dxf", "export_operation.log"]
    );
    assert!(platform.element_named("3mm Steel_BR-7_Rev B.dxf").is_some());
}

#[test]
fn clean_after_removes_only_this_runs_exports() {
    let platform = FakePlatform::new()
        .with_element("b0", "keep-me.pdf", ElementKind::Blob, "pdf")
        .with_drawing("dw1", "Layout", &[]);
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings(dir.path());
    settings.clean_after = true;

    let outcome =
        workflow::run(&platform, workspace(), &settings, CancelToken::new()).expect("run");

    assert!(outcome.summary.archive_path.is_some());
    assert_eq!(platform.count_calls("delete_element"), 1);
    assert!(platform.element_named("keep-me.pdf").is_some());
    assert!(platform.element_named("Layout.pdf").is_none());
}

#[test]
fn translation_failure_fails_one_job_and_the_run_completes() {
    let platform = FakePlatform::new()
        .with_part_studio("ps1", "Frame")
        .with_sheet_metal("ps1", "SM1", "Bracket", 3.0)
        .with_drawing("dw1", "Assembly Drawing", &["ps1"])
        .failing_translation("dw1");
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert_eq!(outcome.summary.succeeded.len(), 1);
    assert_eq!(outcome.summary.failed.len(), 1);
    assert!(outcome.summary.failed[0].2.contains("no geometry to export"));
    assert!(matches!(
        outcome.summary.failure(),
        Some(ExportError::PartialFailure { failed: 1, total: 2 })
    ));
    assert_eq!(outcome.summary.exit_code(), 0);
    let archive = outcome.summary.archive_path.clone().expect("archive");
    assert_eq!(
        archive_entries(&archive),
        vec!["3mm_Bracket.dxf", "export_operation.log"]
    );
}

#[test]
fn every_job_failing_exits_with_two() {
    let platform = FakePlatform::new()
        .with_drawing("dw1", "Layout", &[])
        .failing_translation("dw1");
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert!(matches!(
        outcome.summary.failure(),
        Some(ExportError::PartialFailure { failed: 1, total: 1 })
    ));
    assert_eq!(outcome.summary.exit_code(), 2);
    assert!(outcome.summary.archive_path.is_none());
}

#[test]
fn empty_document_exports_nothing_successfully() {
    let platform = FakePlatform::new().with_part_studio("ps1", "Empty");
    let dir = tempfile::tempdir().expect("tempdir");

    let outcome = run(&platform, dir.path());

    assert_eq!(outcome.summary.total, 0);
    assert_eq!(outcome.summary.exit_code(), 0);
    assert!(outcome.summary.archive_path.is_none());
}

#[test]
fn cancellation_mid_plate_restores_and_sweeps() {
    let cancel = CancelToken::new();
    let platform = FakePlatform::new()
        .with_part_studio("ps1", "Frame")
        .with_part("ps1", "P1", "Base Plate", 6.0)
        .with_orient_feature("ps1", ORIENT_FEATURE)
        .cancelling_on("add_view", &cancel);
    let dir = tempfile::tempdir().expect("tempdir");

    let err = workflow::run(&platform, workspace(), &settings(dir.path()), cancel)
        .expect_err("cancelled");

    assert!(matches!(err, ExportError::Cancelled));
    assert_eq!(platform.feature_suppressed("ps1", "F1"), Some(true));
    assert!(temp_elements(&platform).is_empty());
    assert_eq!(platform.count_calls("translate"), 0);
}

#[test]
fn cancelled_before_start_touches_nothing() {
    let platform = FakePlatform::new().with_drawing("dw1", "Layout", &[]);
    let dir = tempfile::tempdir().expect("tempdir");
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = workflow::run(&platform, workspace(), &settings(dir.path()), cancel)
        .expect_err("cancelled");

    assert!(matches!(err, ExportError::Cancelled));
    assert!(platform.calls().is_empty());
}
