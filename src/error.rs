use miette::Diagnostic;
use thiserror::Error;

use crate::config::SettingsProblem;

#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error("invalid sort specifier: {0}")]
    InvalidSort(String),

    #[error("invalid filter specifier: {0}")]
    InvalidFilter(String),

    #[error("invalid query string: {0}")]
    InvalidQueryString(String),

    #[error("invalid email address: {0}")]
    #[diagnostic(help("leave the email empty or enter an address like name@example.com"))]
    InvalidEmail(String),

    #[error("failed to read settings file at {0}")]
    SettingsRead(String),

    #[error("failed to parse settings: {0}")]
    SettingsParse(String),

    #[error("{0}")]
    InvalidSettings(SettingsProblem),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("download API request failed: {0}")]
    DownloadHttp(String),

    #[error("download API returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("IDS request failed: {0}")]
    IdsHttp(String),

    #[error("IDS returned status {status}: {message}")]
    IdsStatus { status: u16, message: String },

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("the download cart is empty")]
    EmptyCart,

    #[error("download submission returned no download id")]
    MissingDownloadId,

    #[error("download not found: {0}")]
    DownloadNotFound(u64),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("download {download_id} uses transport {transport}, which does not deliver a zip archive")]
    #[diagnostic(help("only downloads fetched over https can be unpacked locally"))]
    NotAnArchive { download_id: u64, transport: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl GatewayError {
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            GatewayError::CatalogHttp(_)
                | GatewayError::CatalogStatus { .. }
                | GatewayError::DownloadHttp(_)
                | GatewayError::DownloadStatus { .. }
                | GatewayError::IdsHttp(_)
                | GatewayError::IdsStatus { .. }
                | GatewayError::Fetch(_)
                | GatewayError::MalformedResponse(_)
                | GatewayError::MissingDownloadId
        )
    }
}
