use std::env;

use propsearch_core::ingestion::DEFAULT_IMAGE_CONCURRENCY;

/// Same `Config::from_env` convention as the search service: every field
/// has an explicit default so the service boots without a `.env` file.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
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

    /// Timeout for downloading a single listing photo (§4.5 step 2).
    pub image_download_timeout_ms: u64,
    /// Bounded per-listing image concurrency (§5).
    pub image_concurrency: usize,

    /// Default `limit` for a batch when the caller omits one (§4.5
    /// self-invocation/batching contract).
    pub default_batch_size: usize,
    pub max_batch_size: usize,

    pub bulk_chunk_size: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let get = |k: &str| env::var(k).ok();

        let port: u16 = get("PORT").and_then(|s| s.parse().ok()).unwrap_or(8081);
        let backend_url = get("BACKEND_URL").unwrap_or_else(|| "http://localhost:9200".to_string());
        let backend_timeout_ms: u64 = get("BACKEND_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(30_000);
        let backend_max_retries: u32 = get("BACKEND_MAX_RETRIES").and_then(|s| s.parse().ok()).unwrap_or(3);
        let backend_backoff_ms: u64 = get("BACKEND_BACKOFF_MS").and_then(|s| s.parse().ok()).unwrap_or(250);
        let index_name = get("INDEX_NAME").unwrap_or_else(|| "listings".to_string());

        let embedding_model_id = get("EMBEDDING_MODEL_ID").unwrap_or_else(|| "propsearch-mm-v1".to_string());
        let model_endpoint_url = get("MODEL_ENDPOINT_URL").unwrap_or_else(|| "http://localhost:9300".to_string());
        let model_api_key = get("MODEL_API_KEY");
        let model_timeout_ms: u64 = get("MODEL_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(10_000);

        let image_download_timeout_ms: u64 =
            get("IMAGE_DOWNLOAD_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(15_000);
        let image_concurrency: usize =
            get("IMAGE_CONCURRENCY").and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_IMAGE_CONCURRENCY);

        let default_batch_size: usize = get("DEFAULT_BATCH_SIZE").and_then(|s| s.parse().ok()).unwrap_or(50);
        let max_batch_size: usize = get("MAX_BATCH_SIZE").and_then(|s| s.parse().ok()).unwrap_or(500);

        let bulk_chunk_size: usize = get("BULK_CHUNK_SIZE").and_then(|s| s.parse().ok()).unwrap_or(100);

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
            image_download_timeout_ms,
            image_concurrency,
            default_batch_size,
            max_batch_size,
            bulk_chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_a_dotenv_file() {
        for key in ["PORT", "BACKEND_URL", "IMAGE_CONCURRENCY", "DEFAULT_BATCH_SIZE"] {
            std::env::remove_var(key);
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.image_concurrency, DEFAULT_IMAGE_CONCURRENCY);
        assert!(cfg.default_batch_size <= cfg.max_batch_size);
    }
}
