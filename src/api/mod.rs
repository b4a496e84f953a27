//! Remote platform primitives.
//!
//! [`RemoteApi`] is the seam between the export engine and the platform: one
//! synchronous request/response call per method, no policy. Read-only guards,
//! polling and cleanup live in [`crate::lifecycle`]; the production
//! implementation is [`http::HttpApi`].
use crate::context::DocumentContext;
use crate::error::Result;
use serde::{Deserialize, Serialize};

pub mod http;

/// Name prefix for elements this tool creates transiently.
pub const TEMP_PREFIX: &str = "TEMP_";
/// Prefixes recognised as leftovers of earlier (possibly crashed) runs.
pub const TEMP_PREFIXES: [&str; 3] = [TEMP_PREFIX, "DEBUG_VIEW_", "TEST_MV_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    PartStudio,
    Drawing,
    Application,
    Blob,
    Other,
}

impl ElementKind {
    pub fn from_wire(element_type: &str) -> Self {
        match element_type {
            "PARTSTUDIO" => ElementKind::PartStudio,
            "DRAWING" => ElementKind::Drawing,
            "APPLICATION" => ElementKind::Application,
            "BLOB" => ElementKind::Blob,
            _ => ElementKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: String,
    pub name: String,
    pub kind: ElementKind,
    pub data_type: String,
    pub microversion_id: Option<String>,
}

impl Element {
    /// Drawings are sometimes reported as application elements.
    pub fn is_drawing(&self) -> bool {
        match self.kind {
            ElementKind::Drawing => true,
            ElementKind::Application => self.data_type.to_ascii_lowercase().contains("drawing"),
            _ => false,
        }
    }

    pub fn is_temporary(&self) -> bool {
        TEMP_PREFIXES
            .iter()
            .any(|prefix| self.name.starts_with(prefix))
    }

    /// Blob produced by an earlier DXF or PDF export.
    pub fn is_export_blob(&self) -> bool {
        if self.kind != ElementKind::Blob {
            return false;
        }
        let name = self.name.to_ascii_lowercase();
        let data_type = self.data_type.to_ascii_lowercase();
        name.ends_with(".dxf")
            || name.ends_with(".pdf")
            || data_type.contains("dxf")
            || data_type.contains("pdf")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub part_id: String,
    pub name: String,
    pub is_flattened_body: bool,
    pub unflattened_part_id: Option<String>,
}

/// A Part Studio feature; `raw` is echoed back when toggling suppression.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub feature_id: String,
    pub name: String,
    pub suppressed: bool,
    pub raw: serde_json::Value,
}

/// Axis-aligned bounds in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub low_x: f64,
    pub low_y: f64,
    pub low_z: f64,
    pub high_x: f64,
    pub high_y: f64,
    pub high_z: f64,
}

impl BoundingBox {
    /// Extent along the short axis; a plate's thickness once it lies flat.
    pub fn smallest_extent(&self) -> f64 {
        let x = (self.high_x - self.low_x).abs();
        let y = (self.high_y - self.low_y).abs();
        let z = (self.high_z - self.low_z).abs();
        x.min(y).min(z)
    }
}

/// Computed part metadata used for property-based filenames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartProperties {
    pub part_number: Option<String>,
    pub revision: Option<String>,
    pub material: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportFormat {
    Dxf,
    Pdf,
}

impl ExportFormat {
    pub fn format_name(self) -> &'static str {
        match self {
            ExportFormat::Dxf => "DXF",
            ExportFormat::Pdf => "PDF",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Dxf => "dxf",
            ExportFormat::Pdf => "pdf",
        }
    }
}

/// What a translation reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationSource {
    /// Parts of a Part Studio, exported directly (flat patterns).
    PartStudio { part_ids: Vec<String> },
    Drawing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub format: ExportFormat,
    pub source: TranslationSource,
    pub destination_name: String,
    /// Store the result as a blob element; only possible in a workspace.
    pub store_in_document: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationState {
    Active,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationStatus {
    pub id: String,
    pub state: TranslationState,
    pub result_element_ids: Vec<String>,
    pub result_external_data_ids: Vec<String>,
    pub failure_reason: Option<String>,
}

/// Where a finished translation's bytes can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    BlobElement(String),
    ExternalData(String),
}

impl ArtifactRef {
    pub fn id(&self) -> &str {
        match self {
            ArtifactRef::BlobElement(id) | ArtifactRef::ExternalData(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub modified_at: Option<String>,
}

/// A workspace or version of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSummary {
    pub id: String,
    pub name: String,
}

pub trait RemoteApi {
    fn list_elements(&self, ctx: &DocumentContext) -> Result<Vec<Element>>;

    fn list_features(&self, ctx: &DocumentContext, element_id: &str) -> Result<Vec<Feature>>;

    fn update_feature_suppression(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        feature: &Feature,
        suppressed: bool,
    ) -> Result<()>;

    fn list_parts(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        include_flat_parts: bool,
    ) -> Result<Vec<Part>>;

    fn part_bounding_box(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        part_id: &str,
    ) -> Result<BoundingBox>;

    /// Metadata of a part, or of the element itself when `part_id` is `None`.
    fn part_properties(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        part_id: Option<&str>,
    ) -> Result<PartProperties>;

    /// Element ids a drawing references.
    fn drawing_references(&self, ctx: &DocumentContext, drawing_id: &str) -> Result<Vec<String>>;

    /// Create an empty drawing and return its element id.
    fn create_drawing(&self, ctx: &DocumentContext, name: &str) -> Result<String>;

    fn add_view(
        &self,
        ctx: &DocumentContext,
        drawing_id: &str,
        source_element_id: &str,
        part_id: &str,
    ) -> Result<()>;

    /// Start a translation and return its id.
    fn translate(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        request: &TranslationRequest,
    ) -> Result<String>;

    fn translation_status(&self, translation_id: &str) -> Result<TranslationStatus>;

    fn delete_element(&self, ctx: &DocumentContext, element_id: &str) -> Result<()>;

    fn rename_element(&self, ctx: &DocumentContext, element_id: &str, new_name: &str)
        -> Result<()>;

    fn download(&self, ctx: &DocumentContext, artifact: &ArtifactRef) -> Result<Vec<u8>>;

    fn list_documents(&self, limit: usize) -> Result<Vec<DocumentSummary>>;

    fn list_workspaces(&self, document_id: &str) -> Result<Vec<BranchSummary>>;

    fn list_versions(&self, document_id: &str) -> Result<Vec<BranchSummary>>;
}
