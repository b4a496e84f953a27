//! Resource lifecycle on top of the raw platform primitives.
//!
//! [`ResourceClient`] binds a [`RemoteApi`] to one [`DocumentContext`] and
//! adds the contract the workflow relies on:
//!
//! - mutating calls are refused locally in version mode, before any request;
//! - mutations are followed by a bounded wait for the element's microversion
//!   to move;
//! - translations are polled to a terminal state with typed failures;
//! - cleanup of temporary elements and earlier exports is best effort and
//!   reports counts instead of failing.
use crate::api::{
    ArtifactRef, BoundingBox, Element, Feature, Part, PartProperties, RemoteApi,
    TranslationRequest, TranslationState,
};
use crate::context::DocumentContext;
use crate::error::{ExportError, Result};
use crate::retry::{self, CancelToken, Poll, RetryPolicy};
use std::time::{Duration, Instant};

/// Timing knobs for every wait the engine performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polling {
    pub microversion: RetryPolicy,
    pub translation: RetryPolicy,
    /// Extra pause after a drawing view lands, before translating it.
    pub settle: Duration,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            microversion: RetryPolicy::microversion(),
            translation: RetryPolicy::translation(),
            settle: Duration::from_secs(2),
        }
    }
}

impl Polling {
    /// No sleeping at all; for tests against in-memory platforms.
    pub fn immediate() -> Self {
        let instant = RetryPolicy {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            timeout: Duration::from_millis(200),
        };
        Self {
            microversion: instant,
            translation: instant,
            settle: Duration::ZERO,
        }
    }
}

/// Result of a translation that reached `DONE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOutcome {
    pub translation_id: String,
    pub artifact: ArtifactRef,
    /// Name the platform gave the stored blob, when it is known.
    pub result_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Which previously exported blobs a cleanup pass removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupScope<'s> {
    /// Every DXF/PDF blob in the workspace.
    AllExports,
    /// Only the listed element ids.
    Only(&'s [String]),
}

pub struct ResourceClient<'a> {
    api: &'a dyn RemoteApi,
    ctx: &'a DocumentContext,
    polling: Polling,
    cancel: CancelToken,
}

impl<'a> ResourceClient<'a> {
    pub fn new(
        api: &'a dyn RemoteApi,
        ctx: &'a DocumentContext,
        polling: Polling,
        cancel: CancelToken,
    ) -> Self {
        Self {
            api,
            ctx,
            polling,
            cancel,
        }
    }

    pub fn context(&self) -> &DocumentContext {
        self.ctx
    }

    pub fn polling(&self) -> &Polling {
        &self.polling
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn list_elements(&self) -> Result<Vec<Element>> {
        self.api.list_elements(self.ctx)
    }

    pub fn list_features(&self, element_id: &str) -> Result<Vec<Feature>> {
        self.api.list_features(self.ctx, element_id)
    }

    pub fn list_parts(&self, element_id: &str, include_flat_parts: bool) -> Result<Vec<Part>> {
        self.api.list_parts(self.ctx, element_id, include_flat_parts)
    }

    pub fn part_bounding_box(&self, element_id: &str, part_id: &str) -> Result<BoundingBox> {
        self.api.part_bounding_box(self.ctx, element_id, part_id)
    }

    pub fn part_properties(
        &self,
        element_id: &str,
        part_id: Option<&str>,
    ) -> Result<PartProperties> {
        self.api.part_properties(self.ctx, element_id, part_id)
    }

    pub fn drawing_references(&self, drawing_id: &str) -> Result<Vec<String>> {
        self.api.drawing_references(self.ctx, drawing_id)
    }

    pub fn update_feature_suppression(
        &self,
        element_id: &str,
        feature: &Feature,
        suppressed: bool,
    ) -> Result<()> {
        self.ctx.require_mutable("update feature suppression")?;
        self.api
            .update_feature_suppression(self.ctx, element_id, feature, suppressed)
    }

    pub fn create_drawing(&self, name: &str) -> Result<String> {
        self.ctx.require_mutable("create drawing")?;
        self.api.create_drawing(self.ctx, name)
    }

    pub fn add_view(&self, drawing_id: &str, source_element_id: &str, part_id: &str) -> Result<()> {
        self.ctx.require_mutable("add view")?;
        self.api
            .add_view(self.ctx, drawing_id, source_element_id, part_id)
    }

    pub fn delete_element(&self, element_id: &str) -> Result<()> {
        self.ctx.require_mutable("delete element")?;
        self.api.delete_element(self.ctx, element_id)
    }

    pub fn rename_element(&self, element_id: &str, new_name: &str) -> Result<()> {
        self.ctx.require_mutable("rename element")?;
        self.api.rename_element(self.ctx, element_id, new_name)
    }

    pub fn download(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        self.api.download(self.ctx, artifact)
    }

    /// Current microversion of `element_id`; `None` if it is gone.
    pub fn microversion(&self, element_id: &str) -> Result<Option<String>> {
        Ok(self
            .list_elements()?
            .into_iter()
            .find(|element| element.id == element_id)
            .and_then(|element| element.microversion_id))
    }

    /// Poll until the element's microversion differs from `previous`.
    pub fn wait_for_microversion_change(
        &self,
        element_id: &str,
        previous: Option<&str>,
    ) -> Result<String> {
        let started = Instant::now();
        let stale = |waited| ExportError::StaleState {
            element_id: element_id.to_string(),
            waited,
        };
        let result = retry::wait_until(&self.polling.microversion, &self.cancel, || {
            let elements = self.list_elements()?;
            let Some(element) = elements.into_iter().find(|element| element.id == element_id)
            else {
                tracing::warn!(element_id, "element vanished while waiting for update");
                return Err(stale(started.elapsed()));
            };
            match element.microversion_id {
                Some(current) if Some(current.as_str()) != previous => Ok(Poll::Ready(current)),
                _ => Ok(Poll::Pending),
            }
        });
        let microversion = result.map_err(|err| err.into_export_error(stale))?;
        tracing::info!(
            element_id,
            microversion = %microversion,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "element updated"
        );
        Ok(microversion)
    }

    /// Start a translation and poll it to a terminal state.
    pub fn translate_and_wait(
        &self,
        element_id: &str,
        request: &TranslationRequest,
    ) -> Result<TranslationOutcome> {
        self.cancel.check()?;
        let started = Instant::now();
        let translation_id = self.api.translate(self.ctx, element_id, request)?;
        let status = retry::wait_until(&self.polling.translation, &self.cancel, || {
            let status = self.api.translation_status(&translation_id)?;
            Ok(match status.state {
                TranslationState::Active => Poll::Pending,
                TranslationState::Done | TranslationState::Failed => Poll::Ready(status),
            })
        })
        .map_err(|err| {
            err.into_export_error(|waited| ExportError::TranslationTimeout {
                translation_id: translation_id.clone(),
                waited,
            })
        })?;

        if status.state == TranslationState::Failed {
            return Err(ExportError::TranslationFailed {
                translation_id,
                reason: status
                    .failure_reason
                    .unwrap_or_else(|| "unknown reason".to_string()),
            });
        }

        let artifact = if let Some(id) = status.result_element_ids.first() {
            ArtifactRef::BlobElement(id.clone())
        } else if let Some(id) = status.result_external_data_ids.first() {
            ArtifactRef::ExternalData(id.clone())
        } else {
            return Err(ExportError::Protocol(format!(
                "translation {translation_id} finished without a result"
            )));
        };
        let result_name = match &artifact {
            ArtifactRef::BlobElement(id) => self.element_name(id),
            ArtifactRef::ExternalData(_) => None,
        };
        tracing::info!(
            element_id,
            translation_id = %translation_id,
            artifact = artifact.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "translation complete"
        );
        Ok(TranslationOutcome {
            translation_id,
            artifact,
            result_name,
        })
    }

    /// Lookup failures only lose the export-rule name, never the job.
    fn element_name(&self, element_id: &str) -> Option<String> {
        match self.list_elements() {
            Ok(elements) => elements
                .into_iter()
                .find(|element| element.id == element_id)
                .map(|element| element.name),
            Err(err) => {
                tracing::warn!(element_id, error = %err, "could not read result element name");
                None
            }
        }
    }

    /// Delete every element carrying a temporary-name prefix.
    pub fn cleanup_temp_elements(&self) -> CleanupReport {
        if !self.ctx.is_mutable() {
            tracing::debug!("temp cleanup skipped on read-only context");
            return CleanupReport::default();
        }
        match self.list_elements() {
            Ok(elements) => {
                let targets: Vec<Element> =
                    elements.into_iter().filter(Element::is_temporary).collect();
                self.delete_all(&targets, "temporary element")
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not list elements for temp cleanup");
                CleanupReport {
                    deleted: 0,
                    failed: 1,
                }
            }
        }
    }

    /// Delete exported DXF/PDF blobs within `scope`.
    pub fn cleanup_exports(&self, scope: CleanupScope<'_>) -> CleanupReport {
        if !self.ctx.is_mutable() {
            tracing::debug!("export cleanup skipped on read-only context");
            return CleanupReport::default();
        }
        let elements = match self.list_elements() {
            Ok(elements) => elements,
            Err(err) => {
                tracing::warn!(error = %err, "could not list elements for export cleanup");
                return CleanupReport {
                    deleted: 0,
                    failed: 1,
                };
            }
        };
        let targets: Vec<Element> = elements
            .into_iter()
            .filter(|element| match scope {
                CleanupScope::AllExports => element.is_export_blob(),
                CleanupScope::Only(ids) => ids.contains(&element.id),
            })
            .collect();
        self.delete_all(&targets, "export blob")
    }

    /// Delete an element named `name`, if one exists. Used when a create
    /// call reported failure but may still have produced the element.
    pub fn delete_by_name(&self, name: &str) -> CleanupReport {
        if !self.ctx.is_mutable() {
            return CleanupReport::default();
        }
        match self.list_elements() {
            Ok(elements) => {
                let targets: Vec<Element> = elements
                    .into_iter()
                    .filter(|element| element.name == name)
                    .collect();
                self.delete_all(&targets, "orphaned element")
            }
            Err(err) => {
                tracing::warn!(name, error = %err, "could not look for orphaned element");
                CleanupReport {
                    deleted: 0,
                    failed: 1,
                }
            }
        }
    }

    fn delete_all(&self, targets: &[Element], label: &str) -> CleanupReport {
        let mut report = CleanupReport::default();
        for element in targets {
            match self.delete_element(&element.id) {
                Ok(()) => {
                    tracing::info!(element_id = %element.id, name = %element.name, "deleted {label}");
                    report.deleted += 1;
                }
                Err(err) => {
                    tracing::warn!(element_id = %element.id, error = %err, "failed to delete {label}");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
