//! Error taxonomy for the export engine.
//!
//! Every fallible library operation returns [`ExportError`]; callers decide
//! whether a failure is fatal for the run or only for a single job by asking
//! [`ExportError::is_fatal`]. The CLI wraps these in `anyhow` at the edge.
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = ExportError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ExportError {
    /// Bad document context or configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("vault password must not be empty")]
    WeakPassword,

    /// Vault unlock failed or the platform rejected the API keys.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{operation} is not allowed on a read-only version context")]
    ReadOnlyMode { operation: &'static str },

    #[error("element {element_id} did not change within {waited:?}")]
    StaleState { element_id: String, waited: Duration },

    #[error("translation {translation_id} did not finish within {waited:?}")]
    TranslationTimeout {
        translation_id: String,
        waited: Duration,
    },

    #[error("translation {translation_id} failed: {reason}")]
    TranslationFailed {
        translation_id: String,
        reason: String,
    },

    /// Transport failure or a status the platform documents as retryable.
    #[error("network error: {0}")]
    Network(String),

    #[error("{method} {endpoint} returned {status}: {body}")]
    Api {
        method: &'static str,
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The platform answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{failed} of {total} export jobs failed")]
    PartialFailure { failed: usize, total: usize },

    #[error("export cancelled")]
    Cancelled,
}

impl ExportError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ExportError::Io {
            context: context.into(),
            source,
        }
    }

    /// Eligible for the bounded retry used by polling.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExportError::Network(_))
    }

    /// Aborts the whole run rather than a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExportError::Config(_)
                | ExportError::WeakPassword
                | ExportError::Auth(_)
                | ExportError::Cancelled
        )
    }
}
