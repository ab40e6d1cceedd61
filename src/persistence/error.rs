//! Persistence layer error taxonomy.

use thiserror::Error;

/// Errors surfaced by the definition store and the dynamic data store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    #[error("API name already exists: {0}")]
    DuplicateName(String),

    #[error("API method and endpoint combination already exists: {0}")]
    DuplicateEndpoint(String),

    #[error("duplicate key error during insert/update")]
    DuplicateKey,

    #[error("missing required fields")]
    MissingRequiredFields,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("failed to update document: {0}")]
    UpdateFailed(String),

    #[error("failed to save data: {0}")]
    SaveFailed(String),

    #[error("failed to delete data: {0}")]
    DeleteFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

impl StoreError {
    /// Map an error kind to the HTTP status reported by the API layer.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::DuplicateName(_) | Self::DuplicateEndpoint(_) | Self::DuplicateKey => {
                StatusCode::CONFLICT
            }
            Self::MissingRequiredFields | Self::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
