//! App home layout and the saved document configuration.
//!
//! Everything lives under one directory: `ONSHAPE_EXPORT_HOME` when set,
//! otherwise `<config dir>/onshape-export`. `config.json` holds document
//! selection and naming preferences; credentials only ever go to the
//! encrypted `.secrets` vault next to it.
use crate::api::http::DEFAULT_API_BASE;
use crate::context::DocumentContext;
use crate::error::{ExportError, Result};
use crate::naming::NamingOptions;
use crate::package::CollisionPolicy;
use crate::staging;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "ONSHAPE_EXPORT_HOME";
pub const PASSWORD_ENV: &str = "ONSHAPE_EXPORT_PASSWORD";
pub const API_BASE_ENV: &str = "ONSHAPE_API_BASE";

const SECRETS_FILE: &str = ".secrets";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    home: PathBuf,
}

impl AppPaths {
    /// Resolve the app home from the environment.
    pub fn resolve() -> Result<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::at(home));
        }
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| ExportError::Config("cannot determine config directory".into()))?;
        Ok(Self::at(base.join("onshape-export")))
    }

    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn secrets(&self) -> PathBuf {
        self.home.join(SECRETS_FILE)
    }

    pub fn config(&self) -> PathBuf {
        self.home.join(CONFIG_FILE)
    }
}

/// Persisted `config.json`. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_export_rule_names: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_part_properties: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_policy: Option<CollisionPolicy>,
}

impl DocumentConfig {
    /// Load `path`; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ExportError::io(format!("read {}", path.display()), err)),
        };
        serde_json::from_str(&text)
            .map_err(|err| ExportError::Config(format!("parse {}: {err}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        staging::write_json_atomic(path, self)
    }

    /// The configured document, if it names a real one.
    pub fn context(&self) -> Result<Option<DocumentContext>> {
        let Some(document_id) = real_id(&self.document_id) else {
            return Ok(None);
        };
        let workspace_id = real_id(&self.workspace_id);
        let version_id = real_id(&self.version_id);
        if workspace_id.is_none() && version_id.is_none() {
            return Ok(None);
        }
        DocumentContext::make(document_id, workspace_id, version_id).map(Some)
    }

    pub fn naming(&self) -> NamingOptions {
        let defaults = NamingOptions::default();
        NamingOptions {
            prefer_export_rule_names: self
                .prefer_export_rule_names
                .unwrap_or(defaults.prefer_export_rule_names),
            use_part_properties: self
                .use_part_properties
                .unwrap_or(defaults.use_part_properties),
        }
    }

    pub fn collision_policy(&self) -> CollisionPolicy {
        self.collision_policy.unwrap_or_default()
    }

    /// `ONSHAPE_API_BASE`, then the config file, then the public endpoint.
    pub fn api_base(&self) -> String {
        std::env::var(API_BASE_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.api_base.clone().filter(|value| !value.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }
}

/// Ids left blank or still holding template text count as unset.
pub fn is_placeholder(id: &str) -> bool {
    let id = id.trim();
    id.is_empty() || id.starts_with("YOUR_") || id.starts_with('<')
}

fn real_id(id: &Option<String>) -> Option<&str> {
    id.as_deref().map(str::trim).filter(|id| !is_placeholder(id))
}
