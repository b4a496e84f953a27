//! Deterministic artifact filenames.
//!
//! Precedence for a job's name:
//! 1. the platform's export-rule name, when enabled and present;
//! 2. `"{t}mm {material}_{partNumber}_Rev {revision}.{ext}"` from part
//!    properties, when enabled and both part number and revision exist;
//! 3. `"{t}mm_" + source name + "." + ext`, with the thickness prefix
//!    omitted when unknown.
//!
//! Collisions are only detected here; the packager decides what to do.
use crate::api::{BoundingBox, ExportFormat, PartProperties};
use crate::workflow::state::JobId;
use std::collections::BTreeMap;

/// Below this a bounding box is treated as degenerate.
const MIN_THICKNESS_MM: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingOptions {
    pub prefer_export_rule_names: bool,
    pub use_part_properties: bool,
}

impl Default for NamingOptions {
    fn default() -> Self {
        Self {
            prefer_export_rule_names: true,
            use_part_properties: false,
        }
    }
}

/// Everything a job knows that can influence its filename.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameInputs {
    /// Part or drawing name.
    pub base_name: String,
    pub thickness_mm: Option<f64>,
    pub properties: Option<PartProperties>,
    /// Destination name sent with the translation request.
    pub requested_name: String,
    /// Name the platform gave the result, if it was stored in the document.
    pub result_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub filename: String,
    pub job_ids: Vec<JobId>,
}

/// Thickness in millimetres from a bounding box in metres.
pub fn thickness_mm(bbox: &BoundingBox) -> Option<f64> {
    let mm = bbox.smallest_extent() * 1000.0;
    (mm > MIN_THICKNESS_MM).then_some(mm)
}

/// `3.0` → `"3"`, `2.54` → `"2.5"`; `None` when unknown or degenerate.
pub fn format_thickness(thickness_mm: Option<f64>) -> Option<String> {
    let mm = thickness_mm.filter(|mm| mm.is_finite() && *mm > MIN_THICKNESS_MM)?;
    let formatted = format!("{mm:.1}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    Some(format!("{trimmed}mm"))
}

/// Name the destination a translation is requested under.
pub fn requested_name(base_name: &str, thickness_mm: Option<f64>) -> String {
    match format_thickness(thickness_mm) {
        Some(prefix) => format!("{prefix}_{base_name}"),
        None => base_name.to_string(),
    }
}

/// The platform renamed the result if its stem differs from the request.
pub fn export_rule_name<'n>(inputs: &'n NameInputs, format: ExportFormat) -> Option<&'n str> {
    let result = inputs.result_name.as_deref()?.trim();
    if result.is_empty() {
        return None;
    }
    let stem = strip_extension(result, format.extension());
    let requested = strip_extension(inputs.requested_name.trim(), format.extension());
    (stem != requested).then_some(result)
}

pub fn resolve(inputs: &NameInputs, format: ExportFormat, options: &NamingOptions) -> String {
    let ext = format.extension();
    if options.prefer_export_rule_names {
        if let Some(rule_name) = export_rule_name(inputs, format) {
            return sanitize(&with_extension(rule_name, ext));
        }
    }
    if options.use_part_properties {
        if let Some(name) = inputs
            .properties
            .as_ref()
            .and_then(|props| property_name(props, inputs.thickness_mm, format))
        {
            return sanitize(&name);
        }
    }
    let synthesized = requested_name(&inputs.base_name, inputs.thickness_mm);
    sanitize(&with_extension(&synthesized, ext))
}

/// `None` unless both part number and revision are known.
pub fn property_name(
    props: &PartProperties,
    thickness_mm: Option<f64>,
    format: ExportFormat,
) -> Option<String> {
    let part_number = props.part_number.as_deref().filter(|s| !s.is_empty())?;
    let revision = props.revision.as_deref().filter(|s| !s.is_empty())?;
    let core = format!("{part_number}_Rev {revision}");

    let mut prefix: Vec<String> = Vec::new();
    if format == ExportFormat::Dxf {
        if let Some(thickness) = format_thickness(thickness_mm) {
            prefix.push(thickness);
        }
        if let Some(material) = props.material.as_deref().filter(|s| !s.is_empty()) {
            prefix.push(material.to_string());
        }
    }
    let ext = format.extension();
    Some(if prefix.is_empty() {
        format!("{core}.{ext}")
    } else {
        format!("{}_{core}.{ext}", prefix.join(" "))
    })
}

/// Append `.ext` unless the name already ends with it (any case).
pub fn with_extension(name: &str, ext: &str) -> String {
    if has_extension(name, ext) {
        name.to_string()
    } else {
        format!("{name}.{ext}")
    }
}

/// Make a name safe as a flat archive entry.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// One entry per filename used by more than one job, in name order.
pub fn find_collisions<'n>(names: impl IntoIterator<Item = (JobId, &'n str)>) -> Vec<Collision> {
    let mut by_name: BTreeMap<&str, Vec<JobId>> = BTreeMap::new();
    for (job_id, name) in names {
        by_name.entry(name).or_default().push(job_id);
    }
    by_name
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(filename, job_ids)| Collision {
            filename: filename.to_string(),
            job_ids,
        })
        .collect()
}

fn has_extension(name: &str, ext: &str) -> bool {
    let suffix_len = ext.len() + 1;
    name.len() > suffix_len
        && name.is_char_boundary(name.len() - suffix_len)
        && name[name.len() - suffix_len..].eq_ignore_ascii_case(&format!(".{ext}"))
}

fn strip_extension<'n>(name: &'n str, ext: &str) -> &'n str {
    if has_extension(name, ext) {
        &name[..name.len() - ext.len() - 1]
    } else {
        name
    }
}
