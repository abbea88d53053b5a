use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, IngestionError>;

impl From<propsearch_core::CoreError> for IngestionError {
    fn from(e: propsearch_core::CoreError) -> Self {
        match e {
            propsearch_core::CoreError::InvalidInput(m) => IngestionError::InvalidInput(m),
            propsearch_core::CoreError::Contract(m) => IngestionError::Backend(format!("contract violation: {m}")),
            other => IngestionError::Backend(other.to_string()),
        }
    }
}

impl IntoResponse for IngestionError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            IngestionError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            IngestionError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            IngestionError::Backend(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            IngestionError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            IngestionError::Http(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            IngestionError::Other(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        let body = json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": message,
            "details": null,
        });
        (status, axum::Json(body)).into_response()
    }
}
