use std::env;

/// Reads typed config from the environment, following the donor's
/// `Config::from_env` convention: every field has an explicit default so
/// the service boots without a `.env` file in development.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// OpenSearch-compatible backend endpoint (§A2).
    pub backend_url: String,
    pub backend_timeout_ms: u64,
    pub backend_max_retries: u32,
    pub backend_backoff_ms: u64,
    pub index_name: String,

    /// Single multimodal embedding model id used for every vector (I9).
    pub embedding_model_id: String,
    pub model_endpoint_url: String,
    pub model_api_key: Option<String>,
    pub model_timeout_ms: u64,

    pub default_page_size: usize,
    pub max_page_size: usize,

    /// Per-strategy deadlines (§5); a strategy exceeding its deadline is
    /// dropped from fusion rather than blocking the response.
    pub bm25_deadline_ms: u64,
    pub knn_text_deadline_ms: u64,
    pub knn_image_deadline_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let backend_url = env::var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:9200".to_string());
        let backend_timeout_ms = env::var("BACKEND_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(30_000);
        let backend_max_retries = env::var("BACKEND_MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(3);
        let backend_backoff_ms = env::var("BACKEND_BACKOFF_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(250);
        let index_name = env::var("INDEX_NAME").unwrap_or_else(|_| "listings".to_string());

        let embedding_model_id = env::var("EMBEDDING_MODEL_ID").unwrap_or_else(|_| "propsearch-mm-v1".to_string());
        let model_endpoint_url = env::var("MODEL_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:9300".to_string());
        let model_api_key = env::var("MODEL_API_KEY").ok();
        let model_timeout_ms = env::var("MODEL_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(10_000);

        let default_page_size = env::var("DEFAULT_PAGE_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(20);
        let max_page_size = env::var("MAX_PAGE_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(100);

        let bm25_deadline_ms = env::var("BM25_DEADLINE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(5_000);
        let knn_text_deadline_ms = env::var("KNN_TEXT_DEADLINE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(5_000);
        let knn_image_deadline_ms = env::var("KNN_IMAGE_DEADLINE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(5_000);

        Self {
            port,
            backend_url,
            backend_timeout_ms,
            backend_max_retries,
            backend_backoff_ms,
            index_name,
            embedding_model_id,
            model_endpoint_url,
            model_api_key,
            model_timeout_ms,
            default_page_size,
            max_page_size,
            bm25_deadline_ms,
            knn_text_deadline_ms,
            knn_image_deadline_ms,
        }
    }
}
