//! Shared test infrastructure for integration tests.
//!
//! [`FakePlatform`] is an in-memory document: elements carry microversions
//! that move on every mutation, translations finish immediately, and a few
//! failure modes can be switched on per test.
#![allow(dead_code)]

use onshape_export::api::{
    ArtifactRef, BoundingBox, BranchSummary, DocumentSummary, Element, ElementKind, Feature, Part,
    PartProperties, RemoteApi, TranslationRequest, TranslationState, TranslationStatus,
};
use onshape_export::context::DocumentContext;
use onshape_export::error::{ExportError, Result};
use onshape_export::lifecycle::Polling;
use onshape_export::retry::CancelToken;
use onshape_export::workflow::ExportSettings;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

pub const ORIENT_FEATURE: &str = "Orient Plates for Export";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultTiming {
    /// The call fails without touching the document.
    Before,
    /// The call takes effect, then reports failure.
    After,
}

/// Calls starting with `prefix` fail with a network error `remaining`
/// times, once a call starting with `armed_by` has been seen.
struct Fault {
    prefix: String,
    armed_by: Option<String>,
    remaining: usize,
    timing: FaultTiming,
}

impl Fault {
    fn fires(&mut self, call: &str, timing: FaultTiming) -> bool {
        let hit = self.armed_by.is_none()
            && self.timing == timing
            && self.remaining > 0
            && call.starts_with(self.prefix.as_str());
        if hit {
            self.remaining -= 1;
        }
        hit
    }
}

fn network_fault(call: &str) -> ExportError {
    ExportError::Network(format!("connection reset during {call}"))
}

#[derive(Default)]
struct World {
    elements: Vec<Element>,
    features: HashMap<String, Vec<Feature>>,
    parts: HashMap<String, Vec<Part>>,
    boxes: HashMap<String, BoundingBox>,
    properties: HashMap<String, PartProperties>,
    references: HashMap<String, Vec<String>>,
    translations: HashMap<String, TranslationStatus>,
    stored: HashMap<String, Vec<u8>>,
    export_rules: HashMap<String, String>,
    failing_translations: HashSet<String>,
    broken_drawing_creation: bool,
    cancel_on: Option<(String, CancelToken)>,
    faults: Vec<Fault>,
    calls: Vec<String>,
    next_id: u32,
}

impl World {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn bump(&mut self, element_id: &str) {
        self.next_id += 1;
        let microversion = format!("mv{}", self.next_id);
        if let Some(element) = self.elements.iter_mut().find(|e| e.id == element_id) {
            element.microversion_id = Some(microversion);
        }
    }

    fn add_element(&mut self, id: &str, name: &str, kind: ElementKind, data_type: &str) {
        self.next_id += 1;
        self.elements.push(Element {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            data_type: data_type.to_string(),
            microversion_id: Some(format!("mv{}", self.next_id)),
        });
    }
}

#[derive(Default)]
pub struct FakePlatform {
    world: RefCell<World>,
}

/// One millimetre-scale plate lying in the XY plane, `thickness_mm` tall.
pub fn plate_box(thickness_mm: f64) -> BoundingBox {
    BoundingBox {
        high_x: 0.2,
        high_y: 0.1,
        high_z: thickness_mm / 1000.0,
        ..BoundingBox::default()
    }
}

pub fn workspace() -> DocumentContext {
    DocumentContext::workspace("doc1", "ws1").expect("workspace context")
}

pub fn version() -> DocumentContext {
    DocumentContext::version("doc1", "ver1").expect("version context")
}

/// Settings that never sleep, writing into `out_dir`.
pub fn settings(out_dir: &Path) -> ExportSettings {
    ExportSettings {
        polling: Polling::immediate(),
        ..ExportSettings::new(out_dir)
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_part_studio(self, id: &str, name: &str) -> Self {
        self.world
            .borrow_mut()
            .add_element(id, name, ElementKind::PartStudio, "");
        self
    }

    pub fn with_part(self, studio: &str, part_id: &str, name: &str, thickness_mm: f64) -> Self {
        {
            let mut world = self.world.borrow_mut();
            world
                .parts
                .entry(studio.to_string())
                .or_default()
                .push(Part {
                    part_id: part_id.to_string(),
                    name: name.to_string(),
                    is_flattened_body: false,
                    unflattened_part_id: None,
                });
            world
                .boxes
                .insert(part_id.to_string(), plate_box(thickness_mm));
        }
        self
    }

    /// A sheet-metal part plus its flattened body `{part_id}-flat`.
    pub fn with_sheet_metal(self, studio: &str, part_id: &str, name: &str, thickness_mm: f64) -> Self {
        let flat_id = format!("{part_id}-flat");
        let this = self.with_part(studio, part_id, name, thickness_mm);
        {
            let mut world = this.world.borrow_mut();
            world
                .parts
                .entry(studio.to_string())
                .or_default()
                .push(Part {
                    part_id: flat_id.clone(),
                    name: name.to_string(),
                    is_flattened_body: true,
                    unflattened_part_id: Some(part_id.to_string()),
                });
            world.boxes.insert(flat_id, plate_box(thickness_mm));
        }
        this
    }

    pub fn with_orient_feature(self, studio: &str, name: &str) -> Self {
        {
            let mut world = self.world.borrow_mut();
            let features = world.features.entry(studio.to_string()).or_default();
            let feature_id = format!("F{}", features.len() + 1);
            features.push(Feature {
                feature_id: feature_id.clone(),
                name: name.to_string(),
                suppressed: true,
                raw: serde_json::json!({"featureId": feature_id, "name": name, "suppressed": true}),
            });
        }
        self
    }

    pub fn with_drawing(self, id: &str, name: &str, references: &[&str]) -> Self {
        {
            let mut world = self.world.borrow_mut();
            world.add_element(id, name, ElementKind::Drawing, "onshape/drawing");
            world.references.insert(
                id.to_string(),
                references.iter().map(|r| r.to_string()).collect(),
            );
        }
        self
    }

    pub fn with_element(self, id: &str, name: &str, kind: ElementKind, data_type: &str) -> Self {
        self.world
            .borrow_mut()
            .add_element(id, name, kind, data_type);
        self
    }

    pub fn with_properties(self, id: &str, properties: PartProperties) -> Self {
        self.world
            .borrow_mut()
            .properties
            .insert(id.to_string(), properties);
        self
    }

    /// Results requested as `destination` get stored under `stored_name`.
    pub fn with_export_rule(self, destination: &str, stored_name: &str) -> Self {
        self.world
            .borrow_mut()
            .export_rules
            .insert(destination.to_string(), stored_name.to_string());
        self
    }

    /// Translations of `element_id` end in `FAILED`.
    pub fn failing_translation(self, element_id: &str) -> Self {
        self.world
            .borrow_mut()
            .failing_translations
            .insert(element_id.to_string());
        self
    }

    /// Drawing creation reports an error after the drawing was made.
    pub fn broken_drawing_creation(self) -> Self {
        self.world.borrow_mut().broken_drawing_creation = true;
        self
    }

    /// Cancel `token` as soon as a call starting with `prefix` arrives.
    pub fn cancelling_on(self, prefix: &str, token: &CancelToken) -> Self {
        self.world.borrow_mut().cancel_on = Some((prefix.to_string(), token.clone()));
        self
    }

    /// The next `times` calls starting with `prefix` fail before taking effect.
    pub fn failing(self, prefix: &str, times: usize) -> Self {
        self.with_fault(prefix, None, times, FaultTiming::Before)
    }

    /// Like [`failing`](Self::failing), armed by the first call starting with `trigger`.
    pub fn failing_after(self, trigger: &str, prefix: &str, times: usize) -> Self {
        self.with_fault(prefix, Some(trigger), times, FaultTiming::Before)
    }

    /// The next `times` calls starting with `prefix` take effect and then fail.
    pub fn failing_after_applying(self, prefix: &str, times: usize) -> Self {
        self.with_fault(prefix, None, times, FaultTiming::After)
    }

    fn with_fault(self, prefix: &str, armed_by: Option<&str>, times: usize, timing: FaultTiming) -> Self {
        self.world.borrow_mut().faults.push(Fault {
            prefix: prefix.to_string(),
            armed_by: armed_by.map(str::to_string),
            remaining: times,
            timing,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.world.borrow().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.world
            .borrow()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn elements(&self) -> Vec<Element> {
        self.world.borrow().elements.clone()
    }

    pub fn element_named(&self, name: &str) -> Option<Element> {
        self.elements().into_iter().find(|e| e.name == name)
    }

    pub fn feature_suppressed(&self, studio: &str, feature_id: &str) -> Option<bool> {
        self.world
            .borrow()
            .features
            .get(studio)?
            .iter()
            .find(|f| f.feature_id == feature_id)
            .map(|f| f.suppressed)
    }

    /// Log `call`, then fail it if a fault that fires before effects matches.
    fn record(&self, call: String) -> Result<()> {
        let mut world = self.world.borrow_mut();
        if let Some((prefix, token)) = &world.cancel_on {
            if call.starts_with(prefix.as_str()) {
                token.cancel();
            }
        }
        let mut failed = false;
        for fault in &mut world.faults {
            failed |= fault.fires(&call, FaultTiming::Before);
        }
        for fault in &mut world.faults {
            if fault
                .armed_by
                .as_deref()
                .is_some_and(|trigger| call.starts_with(trigger))
            {
                fault.armed_by = None;
            }
        }
        world.calls.push(call.clone());
        if failed {
            return Err(network_fault(&call));
        }
        Ok(())
    }

    /// Fail an already applied `call` if a fault that fires after effects matches.
    fn applied(&self, call: &str) -> Result<()> {
        let mut failed = false;
        for fault in &mut self.world.borrow_mut().faults {
            failed |= fault.fires(call, FaultTiming::After);
        }
        if failed {
            return Err(network_fault(call));
        }
        Ok(())
    }
}

fn not_found(what: &str, id: &str) -> ExportError {
    ExportError::Api {
        method: "GET",
        endpoint: format!("/{what}/{id}"),
        status: 404,
        body: "not found".to_string(),
    }
}

impl RemoteApi for FakePlatform {
    fn list_elements(&self, _ctx: &DocumentContext) -> Result<Vec<Element>> {
        self.record("list_elements".to_string())?;
        Ok(self.elements())
    }

    fn list_features(&self, _ctx: &DocumentContext, element_id: &str) -> Result<Vec<Feature>> {
        self.record(format!("list_features {element_id}"))?;
        Ok(self
            .world
            .borrow()
            .features
            .get(element_id)
            .cloned()
            .unwrap_or_default())
    }

    fn update_feature_suppression(
        &self,
        _ctx: &DocumentContext,
        element_id: &str,
        feature: &Feature,
        suppressed: bool,
    ) -> Result<()> {
        let call = format!(
            "update_feature_suppression {element_id} {} {suppressed}",
            feature.feature_id
        );
        self.record(call.clone())?;
        {
            let mut world = self.world.borrow_mut();
            let stored = world
                .features
                .get_mut(element_id)
                .and_then(|features| {
                    features
                        .iter_mut()
                        .find(|f| f.feature_id == feature.feature_id)
                })
                .ok_or_else(|| not_found("features", &feature.feature_id))?;
            stored.suppressed = suppressed;
            world.bump(element_id);
        }
        self.applied(&call)
    }

    fn list_parts(
        &self,
        _ctx: &DocumentContext,
        element_id: &str,
        include_flat_parts: bool,
    ) -> Result<Vec<Part>> {
        self.record(format!("list_parts {element_id}"))?;
        let parts = self
            .world
            .borrow()
            .parts
            .get(element_id)
            .cloned()
            .unwrap_or_default();
        Ok(parts
            .into_iter()
            .filter(|part| include_flat_parts || !part.is_flattened_body)
            .collect())
    }

    fn part_bounding_box(
        &self,
        _ctx: &DocumentContext,
        _element_id: &str,
        part_id: &str,
    ) -> Result<BoundingBox> {
        self.world
            .borrow()
            .boxes
            .get(part_id)
            .copied()
            .ok_or_else(|| not_found("boundingboxes", part_id))
    }

    fn part_properties(
        &self,
        _ctx: &DocumentContext,
        element_id: &str,
        part_id: Option<&str>,
    ) -> Result<PartProperties> {
        let key = part_id.unwrap_or(element_id);
        Ok(self
            .world
            .borrow()
            .properties
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn drawing_references(&self, _ctx: &DocumentContext, drawing_id: &str) -> Result<Vec<String>> {
        Ok(self
            .world
            .borrow()
            .references
            .get(drawing_id)
            .cloned()
            .unwrap_or_default())
    }

    fn create_drawing(&self, _ctx: &DocumentContext, name: &str) -> Result<String> {
        self.record(format!("create_drawing {name}"))?;
        let mut world = self.world.borrow_mut();
        let id = world.fresh_id("drw");
        world.add_element(&id, name, ElementKind::Drawing, "onshape/drawing");
        if world.broken_drawing_creation {
            return Err(ExportError::Network(
                "connection reset while creating drawing".to_string(),
            ));
        }
        Ok(id)
    }

    fn add_view(
        &self,
        _ctx: &DocumentContext,
        drawing_id: &str,
        source_element_id: &str,
        part_id: &str,
    ) -> Result<()> {
        self.record(format!("add_view {drawing_id} {source_element_id} {part_id}"))?;
        self.world.borrow_mut().bump(drawing_id);
        Ok(())
    }

    fn translate(
        &self,
        _ctx: &DocumentContext,
        element_id: &str,
        request: &TranslationRequest,
    ) -> Result<String> {
        self.record(format!(
            "translate {element_id} {}",
            request.format.format_name()
        ))?;
        let mut world = self.world.borrow_mut();
        let translation_id = world.fresh_id("tr");
        let mut status = TranslationStatus {
            id: translation_id.clone(),
            state: TranslationState::Done,
            result_element_ids: Vec::new(),
            result_external_data_ids: Vec::new(),
            failure_reason: None,
        };
        if world.failing_translations.contains(element_id) {
            status.state = TranslationState::Failed;
            status.failure_reason = Some("no geometry to export".to_string());
        } else {
            let ext = request.format.extension();
            let bytes = format!("{} of {element_id}", request.format.format_name()).into_bytes();
            if request.store_in_document {
                let blob_id = world.fresh_id("blob");
                let stored_name = world
                    .export_rules
                    .get(&request.destination_name)
                    .cloned()
                    .unwrap_or_else(|| format!("{}.{ext}", request.destination_name));
                world.add_element(&blob_id, &stored_name, ElementKind::Blob, ext);
                world.stored.insert(blob_id.clone(), bytes);
                status.result_element_ids.push(blob_id);
            } else {
                let external_id = world.fresh_id("ext");
                world.stored.insert(external_id.clone(), bytes);
                status.result_external_data_ids.push(external_id);
            }
        }
        world.translations.insert(translation_id.clone(), status);
        Ok(translation_id)
    }

    fn translation_status(&self, translation_id: &str) -> Result<TranslationStatus> {
        self.world
            .borrow()
            .translations
            .get(translation_id)
            .cloned()
            .ok_or_else(|| not_found("translations", translation_id))
    }

    fn delete_element(&self, _ctx: &DocumentContext, element_id: &str) -> Result<()> {
        let call = format!("delete_element {element_id}");
        self.record(call.clone())?;
        {
            let mut world = self.world.borrow_mut();
            let before = world.elements.len();
            world.elements.retain(|e| e.id != element_id);
            if world.elements.len() == before {
                return Err(not_found("elements", element_id));
            }
        }
        self.applied(&call)
    }

    fn rename_element(&self, _ctx: &DocumentContext, element_id: &str, new_name: &str) -> Result<()> {
        self.record(format!("rename_element {element_id} {new_name}"))?;
        let mut world = self.world.borrow_mut();
        let element = world
            .elements
            .iter_mut()
            .find(|e| e.id == element_id)
            .ok_or_else(|| not_found("elements", element_id))?;
        element.name = new_name.to_string();
        world.bump(element_id);
        Ok(())
    }

    fn download(&self, _ctx: &DocumentContext, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        self.record(format!("download {}", artifact.id()))?;
        self.world
            .borrow()
            .stored
            .get(artifact.id())
            .cloned()
            .ok_or_else(|| not_found("blobs", artifact.id()))
    }

    fn list_documents(&self, _limit: usize) -> Result<Vec<DocumentSummary>> {
        Ok(vec![DocumentSummary {
            id: "doc1".to_string(),
            name: "Frame".to_string(),
            modified_at: None,
        }])
    }

    fn list_workspaces(&self, _document_id: &str) -> Result<Vec<BranchSummary>> {
        Ok(vec![BranchSummary {
            id: "ws1".to_string(),
            name: "Main".to_string(),
        }])
    }

    fn list_versions(&self, _document_id: &str) -> Result<Vec<BranchSummary>> {
        Ok(vec![BranchSummary {
            id: "ver1".to_string(),
            name: "V1".to_string(),
        }])
    }
}

/// Entry names of the zip at `path`, in archive order.
pub fn archive_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("open archive");
    let mut archive = zip::ZipArchive::new(file).expect("read archive");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("entry").name().to_string())
        .collect()
}

pub fn archive_entry_text(path: &Path, name: &str) -> String {
    use std::io::Read;
    let file = std::fs::File::open(path).expect("open archive");
    let mut archive = zip::ZipArchive::new(file).expect("read archive");
    let mut entry = archive.by_name(name).expect("entry");
    let mut text = String::new();
    entry.read_to_string(&mut text).expect("utf-8 entry");
    text
}
