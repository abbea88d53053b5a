//! Concrete HTTP-backed implementations of the C2/C3/C6 provider traits,
//! shared by both binaries (`propsearch-search` for query-time text
//! embedding + query understanding, `propsearch-ingestion` for image/text
//! embedding + vision analysis). Talks to an OpenAI-API-compatible
//! multimodal model endpoint the same way `backend::client::BackendClient`
//! talks to the search backend: hand-built JSON bodies over `reqwest`,
//! truncated-body error logging, bounded retry on transient failures.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::embeddings::{ImageEmbedder, TextEmbedder};
use crate::error::{CoreError, Result};
use crate::model::Constraints;
use crate::query_understanding::QueryUnderstandingProvider;
use crate::vision::VisionProvider;

#[derive(Clone)]
pub struct ModelClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

/// Thin multimodal-model HTTP client backing all four provider traits.
/// One client, one `base_url`: the donor's single-endpoint-per-service
/// pattern, generalized so text embedding, image embedding, vision
/// analysis, and query understanding are just different request bodies
/// against the same model-serving endpoint (I9: one model id for every
/// vector regardless of which trait method produced it).
#[derive(Clone)]
pub struct HttpModelClient {
    client: Client,
    cfg: ModelClientConfig,
}

impl HttpModelClient {
    pub fn new(cfg: ModelClientConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .expect("failed to build model http client");
        Self { client, cfg }
    }

    fn request(&self, path: &str, body: Value) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.cfg.base_url, path);
        let mut req = self.client.post(url).json(&body);
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let response = self.request(path, body).send().await.map_err(CoreError::Http)?;
        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(|e| CoreError::Other(format!("decode error: {e}")));
        }
        let text = response.text().await.unwrap_or_default();
        let preview: String = text.chars().take(300).collect();
        tracing::warn!(%status, path, body = %preview, "model endpoint returned an error");
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(CoreError::Transient(format!("{path}: status={status} body={preview}")))
        } else {
            Err(CoreError::Systemic(format!("{path}: status={status} body={preview}")))
        }
    }
}

#[async_trait::async_trait]
impl TextEmbedder for HttpModelClient {
    async fn embed(&self, text: &str, model_id: &str) -> Result<Vec<f32>> {
        let body = json!({ "model": model_id, "input": text });
        let resp = self.post_json("/v1/embeddings/text", body).await?;
        resp.pointer("/data/0/embedding")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|x| x.as_f64()).map(|f| f as f32).collect())
            .ok_or_else(|| CoreError::Other("malformed text embedding response".to_string()))
    }
}

#[async_trait::async_trait]
impl ImageEmbedder for HttpModelClient {
    async fn embed(&self, bytes: &[u8], model_id: &str) -> Result<Vec<f32>> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let body = json!({ "model": model_id, "input": { "image_base64": encoded } });
        let resp = self.post_json("/v1/embeddings/image", body).await?;
        resp.pointer("/data/0/embedding")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|x| x.as_f64()).map(|f| f as f32).collect())
            .ok_or_else(|| CoreError::Other("malformed image embedding response".to_string()))
    }
}

#[async_trait::async_trait]
impl VisionProvider for HttpModelClient {
    async fn complete(&self, image_bytes: &[u8], model_id: &str) -> Result<String> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let prompt = "Classify this real-estate photo. Respond with ONLY a JSON object: \
            {\"image_type\": one of exterior|interior|detail|floorplan|backyard|unknown, \
            \"features\": [string], \"architecture_style\": string or null, \
            \"exterior_color\": string or null, \"materials\": [string], \
            \"visual_features\": [string], \"room_type\": string or null, \
            \"confidence\": one of high|medium|low}. No prose, no markdown fence.";
        let body = json!({
            "model": model_id,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_base64", "image_base64": encoded }
                ]
            }]
        });
        let resp = self.post_json("/v1/chat/completions", body).await?;
        resp.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CoreError::Other("malformed vision completion response".to_string()))
    }
}

#[async_trait::async_trait]
impl QueryUnderstandingProvider for HttpModelClient {
    async fn understand(&self, query: &str) -> Result<Constraints> {
        let prompt = format!(
            "Decompose this real-estate search query into structured constraints. \
             Respond with ONLY a JSON object matching: {{\"must_have\": [string], \
             \"nice_to_have\": [string], \"hard_filters\": {{\"price_min\": number|null, \
             \"price_max\": number|null, \"beds_min\": number|null, \"beds_max\": number|null, \
             \"baths_min\": number|null, \"baths_max\": number|null, \"living_area_min\": number|null, \
             \"living_area_max\": number|null, \"property_types\": [string], \"status\": [string]}}, \
             \"architecture_style\": string|null, \"proximity\": {{\"poi_type\": string, \
             \"max_distance_km\": number|null}}|null, \"query_type\": one of \
             color|material|specific_feature|visual_style|proximity|general}}. Query: {query}"
        );
        let body = json!({
            "model": "query-understanding",
            "messages": [{ "role": "user", "content": prompt }]
        });
        let resp = self.post_json("/v1/chat/completions", body).await?;
        let content = resp
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Other("malformed query-understanding response".to_string()))?;
        serde_json::from_str::<Constraints>(content)
            .map_err(|e| CoreError::Other(format!("query-understanding JSON parse failure: {e}")))
    }
}
