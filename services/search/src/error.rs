use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
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

pub type Result<T> = std::result::Result<T, SearchError>;

impl From<propsearch_core::CoreError> for SearchError {
    fn from(e: propsearch_core::CoreError) -> Self {
        match e {
            propsearch_core::CoreError::InvalidInput(m) => SearchError::InvalidInput(m),
            propsearch_core::CoreError::Contract(m) => SearchError::Backend(format!("contract violation: {m}")),
            other => SearchError::Backend(other.to_string()),
        }
    }
}

/// §7 error taxonomy: input errors surface as 4xx with a structured body;
/// everything else is a degraded-but-still-200-shaped systemic condition
/// upstream of this, or a 5xx if truly unrecoverable.
impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            SearchError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            SearchError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            SearchError::Backend(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            SearchError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            SearchError::Http(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            SearchError::Other(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        let body = json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": message,
            "details": null,
        });
        (status, axum::Json(body)).into_response()
    }
}
