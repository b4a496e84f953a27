//! Blocking HTTPS implementation of [`RemoteApi`].
//!
//! One `ureq` agent per run, HTTP Basic auth from the vault credentials.
//! Statuses are folded into [`ExportError`] here so the rest of the engine
//! only sees typed failures: 401/403 are `Auth`, 408/429/5xx and transport
//! failures are `Network` (retried for GET and DELETE), anything else at or
//! above 400 is `Api`.
use super::{
    ArtifactRef, BoundingBox, BranchSummary, DocumentSummary, Element, ElementKind, Feature,
    Part, PartProperties, RemoteApi, TranslationRequest, TranslationSource, TranslationState,
    TranslationStatus,
};
use crate::context::DocumentContext;
use crate::error::{ExportError, Result};
use crate::retry::{self, RetryPolicy};
use crate::vault::Credentials;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use ureq::http::Response;
use ureq::Body;
use zeroize::Zeroizing;

pub const DEFAULT_API_BASE: &str = "https://cad.onshape.com/api/v12";

const ACCEPT: &str = "application/vnd.onshape.v1+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_DOWNLOAD_BYTES: u64 = 512 * 1024 * 1024;
const MAX_ERROR_BODY_CHARS: usize = 500;

const PROP_PART_NUMBER: &str = "57f3fb8efa3416c06701d60f";
const PROP_REVISION: &str = "57f3fb8efa3416c06701d610";
const PROP_MATERIAL: &str = "57f3fb8efa3416c06701d615";

const FEATURE_SERIALIZATION_VERSION: &str = "1.2.15";
const DRAWING_TEMPLATE_DOCUMENT: &str = "09fb14dcb55eee217f55fa7b";
const DRAWING_TEMPLATE_ELEMENT: &str = "149ce62208ba05ac0cee75e5";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }

    fn is_idempotent(self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }
}

pub struct HttpApi {
    agent: ureq::Agent,
    base_url: String,
    authorization: Zeroizing<String>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HttpApi {
    pub fn new(credentials: &Credentials, base_url: &str) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        let pair = Zeroizing::new(format!(
            "{}:{}",
            credentials.access_key, credentials.secret_key
        ));
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: Zeroizing::new(format!("Basic {}", STANDARD.encode(pair.as_bytes()))),
            retry: RetryPolicy::network(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Response<Body>> {
        let attempt = || self.send_once(method, endpoint, query, body);
        if method.is_idempotent() {
            retry::retry_transient(&self.retry, attempt)
        } else {
            attempt()
        }
    }

    fn send_once(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Response<Body>> {
        let url = format!("{}{}", self.base_url, endpoint);
        let auth = self.authorization.as_str();
        tracing::debug!(method = method.as_str(), %url, "api request");
        let started = Instant::now();
        let result = match method {
            Method::Get => {
                let mut req = self
                    .agent
                    .get(&url)
                    .header("Accept", ACCEPT)
                    .header("Authorization", auth);
                for (key, value) in query {
                    req = req.query(*key, *value);
                }
                req.call()
            }
            Method::Delete => self
                .agent
                .delete(&url)
                .header("Accept", ACCEPT)
                .header("Authorization", auth)
                .call(),
            Method::Post => {
                let payload = body.cloned().unwrap_or_else(|| json!({}));
                self.agent
                    .post(&url)
                    .header("Accept", ACCEPT)
                    .header("Authorization", auth)
                    .send_json(&payload)
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut response = result.map_err(|err| {
            tracing::debug!(method = method.as_str(), endpoint, error = %err, "transport failure");
            ExportError::Network(format!("{} {endpoint}: {err}", method.as_str()))
        })?;
        let status = response.status().as_u16();
        tracing::debug!(method = method.as_str(), endpoint, status, elapsed_ms, "api response");
        if (200..300).contains(&status) {
            return Ok(response);
        }
        let text = response.body_mut().read_to_string().unwrap_or_default();
        Err(classify_status(method.as_str(), endpoint, status, &text))
    }

    fn get_json<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut response = self.request(Method::Get, endpoint, query, None)?;
        decode(endpoint, response.body_mut().read_json::<T>())
    }

    fn post_json<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> Result<T> {
        let mut response = self.request(Method::Post, endpoint, &[], Some(body))?;
        decode(endpoint, response.body_mut().read_json::<T>())
    }

    fn post(&self, endpoint: &str, body: &Value) -> Result<()> {
        self.request(Method::Post, endpoint, &[], Some(body))?;
        Ok(())
    }

    fn get_bytes(&self, endpoint: &str) -> Result<Vec<u8>> {
        let mut response = self.request(Method::Get, endpoint, &[], None)?;
        let bytes = response
            .body_mut()
            .with_config()
            .limit(MAX_DOWNLOAD_BYTES)
            .read_to_vec();
        decode(endpoint, bytes)
    }
}

/// Map a non-success status to the error taxonomy.
pub(crate) fn classify_status(
    method: &'static str,
    endpoint: &str,
    status: u16,
    body: &str,
) -> ExportError {
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    tracing::error!(method, endpoint, status, body = %body, "api request failed");
    match status {
        401 | 403 => ExportError::Auth(format!("{method} {endpoint} returned {status}")),
        408 | 429 | 500..=599 => {
            ExportError::Network(format!("{method} {endpoint} returned {status}"))
        }
        _ => {
            if status == 404 && endpoint.contains("/translations") {
                tracing::error!(
                    "a 404 on a translation endpoint usually means no export rule is configured for this element type (Part Studio DXF, Drawing PDF)"
                );
            }
            ExportError::Api {
                method,
                endpoint: endpoint.to_string(),
                status,
                body,
            }
        }
    }
}

fn decode<T>(endpoint: &str, result: std::result::Result<T, ureq::Error>) -> Result<T> {
    result.map_err(|err| ExportError::Protocol(format!("decode {endpoint}: {err}")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireElement {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    element_type: String,
    #[serde(default)]
    data_type: Option<String>,
    #[serde(default)]
    microversion_id: Option<String>,
}

impl From<WireElement> for Element {
    fn from(wire: WireElement) -> Self {
        Element {
            kind: ElementKind::from_wire(&wire.element_type),
            id: wire.id,
            name: wire.name,
            data_type: wire.data_type.unwrap_or_default(),
            microversion_id: wire.microversion_id.filter(|mv| !mv.is_empty()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ElementList {
    Bare(Vec<WireElement>),
    Wrapped { elements: Vec<WireElement> },
}

#[derive(Deserialize)]
struct FeatureList {
    #[serde(default)]
    features: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    part_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_flattened_body: bool,
    #[serde(default)]
    unflattened_part_id: Option<String>,
}

#[derive(Deserialize)]
struct Metadata {
    #[serde(default)]
    properties: Vec<MetadataProperty>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataProperty {
    #[serde(default)]
    property_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTranslation {
    id: String,
    request_state: String,
    #[serde(default)]
    result_element_ids: Option<Vec<String>>,
    #[serde(default)]
    result_external_data_ids: Option<Vec<String>>,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDocument {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    modified_at: Option<String>,
}

#[derive(Deserialize)]
struct DocumentPage {
    #[serde(default)]
    items: Vec<WireDocument>,
}

#[derive(Deserialize)]
struct WireBranch {
    id: String,
    #[serde(default)]
    name: String,
}

fn feature_from_value(raw: Value) -> Option<Feature> {
    let feature_id = raw.get("featureId")?.as_str()?.to_string();
    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let suppressed = raw
        .get("suppressed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some(Feature {
        feature_id,
        name,
        suppressed,
        raw,
    })
}

/// Property values are strings, except material which may be an object.
fn property_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => map.get("displayName")?.as_str()?.to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// References arrive as a list or wrapped under one of two keys.
fn reference_targets(value: &Value) -> Vec<String> {
    let list = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("referencedElements")
            .or_else(|| map.get("references"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    list.iter()
        .filter_map(|item| {
            item.get("targetElementId")
                .or_else(|| item.get("elementId"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

fn parse_state(state: &str) -> Result<TranslationState> {
    match state {
        "ACTIVE" => Ok(TranslationState::Active),
        "DONE" => Ok(TranslationState::Done),
        "FAILED" => Ok(TranslationState::Failed),
        other => Err(ExportError::Protocol(format!(
            "unknown translation state {other}"
        ))),
    }
}

fn translation_payload(request: &TranslationRequest) -> Value {
    let mut payload = json!({
        "formatName": request.format.format_name(),
        "storeInDocument": request.store_in_document,
        "evaluateExportRule": true,
        "destinationName": request.destination_name,
        "includeFormedCentermarks": false,
    });
    if request.format == super::ExportFormat::Dxf {
        payload["includeBendCenterlines"] = json!(true);
        payload["includeBendLines"] = json!(false);
    }
    if let TranslationSource::PartStudio { part_ids } = &request.source {
        payload["partIds"] = json!(part_ids.join(","));
    }
    payload
}

impl RemoteApi for HttpApi {
    fn list_elements(&self, ctx: &DocumentContext) -> Result<Vec<Element>> {
        let endpoint = format!("/documents{}/elements", ctx.path(""));
        let list: ElementList = self.get_json(&endpoint, &[])?;
        let wire = match list {
            ElementList::Bare(items) | ElementList::Wrapped { elements: items } => items,
        };
        Ok(wire.into_iter().map(Element::from).collect())
    }

    fn list_features(&self, ctx: &DocumentContext, element_id: &str) -> Result<Vec<Feature>> {
        let endpoint = format!("/partstudios{}", ctx.path(&format!("/e/{element_id}/features")));
        let list: FeatureList = self.get_json(&endpoint, &[])?;
        Ok(list
            .features
            .into_iter()
            .filter_map(feature_from_value)
            .collect())
    }

    fn update_feature_suppression(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        feature: &Feature,
        suppressed: bool,
    ) -> Result<()> {
        let mut copy = feature.raw.clone();
        if let Some(map) = copy.as_object_mut() {
            map.insert("suppressed".to_string(), Value::Bool(suppressed));
        }
        let endpoint = format!(
            "/partstudios{}",
            ctx.path(&format!(
                "/e/{element_id}/features/featureid/{}",
                feature.feature_id
            ))
        );
        tracing::info!(element_id, feature = %feature.name, suppressed, "update feature suppression");
        self.post(
            &endpoint,
            &json!({
                "feature": copy,
                "serializationVersion": FEATURE_SERIALIZATION_VERSION,
                "sourceMicroversion": "",
            }),
        )
    }

    fn list_parts(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        include_flat_parts: bool,
    ) -> Result<Vec<Part>> {
        let endpoint = format!("/parts{}", ctx.path(&format!("/e/{element_id}")));
        let query: &[(&str, &str)] = if include_flat_parts {
            &[("includeFlatParts", "true")]
        } else {
            &[]
        };
        let parts: Vec<WirePart> = self.get_json(&endpoint, query)?;
        Ok(parts
            .into_iter()
            .map(|wire| Part {
                part_id: wire.part_id,
                name: wire.name,
                is_flattened_body: wire.is_flattened_body,
                unflattened_part_id: wire.unflattened_part_id.filter(|id| !id.is_empty()),
            })
            .collect())
    }

    fn part_bounding_box(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        part_id: &str,
    ) -> Result<BoundingBox> {
        let endpoint = format!(
            "/parts{}",
            ctx.path(&format!("/e/{element_id}/partid/{part_id}/boundingboxes"))
        );
        self.get_json(&endpoint, &[])
    }

    fn part_properties(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        part_id: Option<&str>,
    ) -> Result<PartProperties> {
        let suffix = match part_id {
            Some(part_id) => format!("/e/{element_id}/p/{part_id}"),
            None => format!("/e/{element_id}"),
        };
        let endpoint = format!("/metadata{}", ctx.path(&suffix));
        let metadata: Metadata = self.get_json(&endpoint, &[])?;
        let mut props = PartProperties::default();
        for property in metadata.properties {
            let slot = match property.property_id.as_deref() {
                Some(PROP_PART_NUMBER) => &mut props.part_number,
                Some(PROP_REVISION) => &mut props.revision,
                Some(PROP_MATERIAL) => &mut props.material,
                _ => continue,
            };
            *slot = property_text(&property.value);
        }
        Ok(props)
    }

    fn drawing_references(&self, ctx: &DocumentContext, drawing_id: &str) -> Result<Vec<String>> {
        let endpoint = format!(
            "/appelements{}",
            ctx.path(&format!("/e/{drawing_id}/references"))
        );
        let value: Value = self.get_json(&endpoint, &[])?;
        Ok(reference_targets(&value))
    }

    fn create_drawing(&self, ctx: &DocumentContext, name: &str) -> Result<String> {
        let endpoint = format!("/drawings{}", ctx.path("/create"));
        let created: IdOnly = self.post_json(
            &endpoint,
            &json!({
                "drawingName": name,
                "standard": "ISO",
                "templateDocumentId": DRAWING_TEMPLATE_DOCUMENT,
                "templateElementId": DRAWING_TEMPLATE_ELEMENT,
                "units": "MILLIMETER",
                "size": "A",
                "border": false,
                "titleblock": false,
            }),
        )?;
        tracing::info!(element_id = %created.id, name, "created drawing");
        Ok(created.id)
    }

    fn add_view(
        &self,
        ctx: &DocumentContext,
        drawing_id: &str,
        source_element_id: &str,
        part_id: &str,
    ) -> Result<()> {
        let endpoint = format!("/drawings{}", ctx.path(&format!("/e/{drawing_id}/modify")));
        tracing::info!(drawing_id, part_id, "adding top view");
        self.post(
            &endpoint,
            &json!({
                "description": "Add Top View 1:1",
                "jsonRequests": [{
                    "messageName": "onshapeCreateViews",
                    "formatVersion": "2021-01-01",
                    "description": "Add top view",
                    "views": [{
                        "viewType": "TopLevel",
                        "position": {"x": 0.1, "y": 0.1},
                        "scale": {"scaleSource": "Custom", "numerator": 1, "denumerator": 1},
                        "orientation": "top",
                        "showCentermarks": false,
                        "showCenterlines": false,
                        "reference": {"elementId": source_element_id, "idTag": part_id},
                    }],
                }],
            }),
        )
    }

    fn translate(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        request: &TranslationRequest,
    ) -> Result<String> {
        let collection = match request.source {
            TranslationSource::PartStudio { .. } => "partstudios",
            TranslationSource::Drawing => "drawings",
        };
        let endpoint = format!(
            "/{collection}{}",
            ctx.path(&format!("/e/{element_id}/translations"))
        );
        tracing::info!(
            element_id,
            format = request.format.format_name(),
            destination = %request.destination_name,
            "starting translation"
        );
        let started: IdOnly = self.post_json(&endpoint, &translation_payload(request))?;
        Ok(started.id)
    }

    fn translation_status(&self, translation_id: &str) -> Result<TranslationStatus> {
        let endpoint = format!("/translations/{translation_id}");
        let wire: WireTranslation = self.get_json(&endpoint, &[])?;
        Ok(TranslationStatus {
            state: parse_state(&wire.request_state)?,
            id: wire.id,
            result_element_ids: wire.result_element_ids.unwrap_or_default(),
            result_external_data_ids: wire.result_external_data_ids.unwrap_or_default(),
            failure_reason: wire.failure_reason,
        })
    }

    fn delete_element(&self, ctx: &DocumentContext, element_id: &str) -> Result<()> {
        let endpoint = format!("/elements{}", ctx.path(&format!("/e/{element_id}")));
        tracing::info!(element_id, "deleting element");
        self.request(Method::Delete, &endpoint, &[], None)?;
        Ok(())
    }

    fn rename_element(
        &self,
        ctx: &DocumentContext,
        element_id: &str,
        new_name: &str,
    ) -> Result<()> {
        let endpoint = format!("/metadata{}", ctx.path(&format!("/e/{element_id}")));
        let metadata: Metadata = self.get_json(&endpoint, &[])?;
        let property_id = metadata
            .properties
            .into_iter()
            .find(|prop| prop.name.as_deref() == Some("Name"))
            .and_then(|prop| prop.property_id)
            .ok_or_else(|| {
                ExportError::Protocol(format!("element {element_id} has no Name property"))
            })?;
        tracing::debug!(element_id, new_name, "renaming element");
        self.post(
            &endpoint,
            &json!({"properties": [{"propertyId": property_id, "value": new_name}]}),
        )
    }

    fn download(&self, ctx: &DocumentContext, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        let endpoint = match artifact {
            ArtifactRef::BlobElement(id) => format!("/blobelements{}", ctx.path(&format!("/e/{id}"))),
            ArtifactRef::ExternalData(id) => {
                format!("/documents/d/{}/externaldata/{id}", ctx.document_id())
            }
        };
        let bytes = self.get_bytes(&endpoint)?;
        tracing::debug!(artifact = artifact.id(), bytes = bytes.len(), "downloaded artifact");
        Ok(bytes)
    }

    fn list_documents(&self, limit: usize) -> Result<Vec<DocumentSummary>> {
        let limit = limit.to_string();
        let page: DocumentPage = self.get_json(
            "/documents",
            &[
                ("sortColumn", "modifiedAt"),
                ("sortOrder", "desc"),
                ("limit", limit.as_str()),
            ],
        )?;
        Ok(page
            .items
            .into_iter()
            .map(|doc| DocumentSummary {
                id: doc.id,
                name: doc.name,
                modified_at: doc.modified_at,
            })
            .collect())
    }

    fn list_workspaces(&self, document_id: &str) -> Result<Vec<BranchSummary>> {
        let branches: Vec<WireBranch> =
            self.get_json(&format!("/documents/d/{document_id}/workspaces"), &[])?;
        Ok(branches.into_iter().map(branch).collect())
    }

    fn list_versions(&self, document_id: &str) -> Result<Vec<BranchSummary>> {
        let branches: Vec<WireBranch> =
            self.get_json(&format!("/documents/d/{document_id}/versions"), &[])?;
        Ok(branches.into_iter().map(branch).collect())
    }
}

fn branch(wire: WireBranch) -> BranchSummary {
    BranchSummary {
        id: wire.id,
        name: wire.name,
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
