use serde::{Deserialize, Serialize};

/// Body of `POST /ingest/batch`: the self-invocation/batching contract
/// (§4.5) — resumable by listing index (`start`, `limit`, an opaque job
/// id). The handler is a pure function of this slice; scheduling repeated
/// invocations across the full `listings` array is a caller concern.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestBatchRequest {
    pub listings: Vec<serde_json::Value>,
    #[serde(default)]
    pub start: usize,
    pub limit: Option<usize>,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestBatchResponse {
    pub job_id: String,
    pub start: usize,
    pub limit: usize,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// `None` once `start + processed >= total`; otherwise the `start` the
    /// caller should pass on its next invocation of this same job id.
    pub next_start: Option<usize>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestListingResponse {
    pub zpid: String,
    pub status: &'static str,
    pub has_valid_embeddings: bool,
}
