//! Thin HTTP client for the OpenSearch-compatible backend: search, index
//! lifecycle (C4), and chunked bulk upsert with adaptive splitting (§4.5
//! step 9). Retries follow the donor's bounded-exponential-backoff loop.

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{CoreError, Result};

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl BackendClient {
    pub fn new(base_url: String, timeout_ms: u64, max_retries: u32, base_backoff_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .connect_timeout(std::time::Duration::from_millis(timeout_ms.min(10_000)))
            .build()
            .expect("failed to build backend http client");

        Self { client, base_url, max_retries, base_backoff_ms }
    }

    fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << attempt))
    }

    /// Runs `f` with bounded exponential backoff on transient (5xx / 429 /
    /// network) failures; gives up and returns the last error once
    /// `max_retries` is exhausted.
    async fn with_retry<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
        T: for<'de> serde::Deserialize<'de>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map_err(|e| CoreError::Other(format!("{op}: decode error: {e}")));
                    }
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let preview: String = text.chars().take(300).collect();
                    let transient = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    if transient && attempt < self.max_retries {
                        tracing::warn!(op, %status, attempt = attempt + 1, body = %preview, "backend transient error, retrying");
                        tokio::time::sleep(self.backoff_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    tracing::event!(
                        tracing::Level::ERROR,
                        op,
                        %status,
                        body = %preview,
                        "backend request failed"
                    );
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(CoreError::Transient(format!("{op}: status={status} body={preview}")));
                    }
                    return Err(CoreError::Systemic(format!("{op}: status={status} body={preview}")));
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tracing::warn!(op, error = %e, attempt = attempt + 1, "backend request error, retrying");
                        tokio::time::sleep(self.backoff_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(CoreError::Transient(format!("{op}: {e}")));
                }
            }
        }
    }

    pub async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}/_search", self.base_url, index);
        self.with_retry("search", || self.client.post(&url).json(body).send()).await
    }

    pub async fn create_index(&self, index: &str, mapping: &Value) -> Result<()> {
        let url = format!("{}/{}", self.base_url, index);
        let head = self.client.head(&url).send().await.map_err(CoreError::Http)?;
        if head.status().is_success() {
            let existing: Value = self.get_mapping(index).await?;
            return match crate::backend::index::mapping_is_compatible(&existing, crate::model::VECTOR_DIM) {
                Ok(()) => Ok(()),
                Err(msg) => Err(CoreError::Contract(msg)),
            };
        }
        let _: serde_json::Map<String, Value> = self
            .with_retry("create_index", || self.client.put(&url).json(mapping).send())
            .await?;
        Ok(())
    }

    pub async fn get_mapping(&self, index: &str) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, index);
        self.with_retry("get_mapping", || self.client.get(&url).send()).await
    }

    /// Deletes a single document by id. A missing document is treated as
    /// success (§6.2 "delete is idempotent").
    pub async fn delete(&self, index: &str, doc_id: &str) -> Result<()> {
        let url = format!("{}/{}/_doc/{}", self.base_url, index, doc_id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(CoreError::Http)?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let preview: String = text.chars().take(300).collect();
        Err(CoreError::Systemic(format!("delete: status={status} body={preview}")))
    }

    /// Chunked bulk upsert (default chunk 100). On repeated throttling for
    /// a chunk, halves the chunk size and retries with the smaller chunks
    /// before giving up, per the adaptive-splitting step in §4.5.
    pub async fn bulk_upsert(&self, index: &str, documents: Vec<(String, Value)>, chunk_size: usize) -> Result<()> {
        let mut remaining = documents;
        let mut size = chunk_size.max(1);
        while !remaining.is_empty() {
            let take = size.min(remaining.len());
            let chunk: Vec<_> = remaining.drain(..take).collect();
            match self.bulk_upsert_chunk(index, &chunk).await {
                Ok(()) => continue,
                Err(e) if e.is_transient() && size > 1 => {
                    tracing::warn!(chunk_size = size, "bulk upsert chunk throttled, splitting chunk size in half");
                    size = (size / 2).max(1);
                    remaining.splice(0..0, chunk);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn bulk_upsert_chunk(&self, index: &str, chunk: &[(String, Value)]) -> Result<()> {
        let mut body = String::new();
        for (doc_id, doc) in chunk {
            body.push_str(&serde_json::to_string(&serde_json::json!({
                "index": { "_index": index, "_id": doc_id }
            })).unwrap());
            body.push('\n');
            body.push_str(&serde_json::to_string(doc).unwrap());
            body.push('\n');
        }
        let url = format!("{}/_bulk", self.base_url);
        let body_bytes = body.into_bytes();
        let result: Value = self
            .with_retry("bulk_upsert", || {
                self.client
                    .post(&url)
                    .header("Content-Type", "application/x-ndjson")
                    .body(body_bytes.clone())
                    .send()
            })
            .await?;

        if result.get("errors").and_then(|v| v.as_bool()).unwrap_or(false) {
            let preview = serde_json::to_string(&result).unwrap_or_default();
            let preview: String = preview.chars().take(500).collect();
            return Err(CoreError::Contract(format!("bulk upsert reported item errors: {preview}")));
        }
        Ok(())
    }
}
