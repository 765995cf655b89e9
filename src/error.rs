use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum PortalError {
    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error("invalid sort direction: {0}")]
    InvalidDirection(String),

    #[error("invalid view mode: {0}")]
    InvalidView(String),

    #[error("invalid page size: {0} (expected one of 10, 20, 30)")]
    InvalidPageSize(String),

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("invalid connection speed: {0}")]
    InvalidSpeed(String),

    #[error("missing config file portal.json")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("download service request failed: {0}")]
    DownloadHttp(String),

    #[error("download service returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl PortalError {
    /// Whether the error came from a remote service rather than local input.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PortalError::CatalogHttp(_)
                | PortalError::CatalogStatus { .. }
                | PortalError::DownloadHttp(_)
                | PortalError::DownloadStatus { .. }
                | PortalError::Decode(_)
        )
    }
}
