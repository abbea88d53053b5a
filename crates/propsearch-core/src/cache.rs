//! C1 Embedding Cache (§4.1, §3.4).
//!
//! At-most-once computation per (text, model) or (image, model) pair, with
//! per-record cost accounting. Cache failures must degrade to pass-through:
//! this module never panics or fails the caller on a backend error, it
//! returns `Err` so the call site (see `propsearch-core::embeddings`) can
//! log a warning and fall through to computing the value fresh.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::vision::VisionAnalysis;

pub const CACHE_VERSION: u32 = 1;

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Image cache record, keyed by image URL (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCacheRecord {
    pub image_hash: String,
    pub embedding: Vec<f32>,
    pub analysis: VisionAnalysis,
    pub llm_response: String,
    pub embedding_model_id: String,
    pub analysis_model_id: String,
    pub cache_version: u32,
    pub first_seen: String,
    pub last_accessed: String,
    pub access_count: u64,
    pub cost_embedding: f64,
    pub cost_analysis: f64,
    pub cost_total: f64,
    pub cost_saved: f64,
}

/// Text cache record, keyed by `sha256(text)#model_id` (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCacheRecord {
    pub text_sample: String,
    pub embedding: Vec<f32>,
    pub model_id: String,
    pub first_seen: String,
    pub last_accessed: String,
    pub access_count: u64,
    pub cost: f64,
}

pub fn text_cache_key(text: &str, model_id: &str) -> String {
    format!("{}#{}", sha256_hex(text.as_bytes()), model_id)
}

/// A store-agnostic embedding cache. Implementations may back onto Redis,
/// a SQL table, or (as here) an in-process map; all must honor I6-I8.
#[async_trait::async_trait]
pub trait EmbeddingCache: Send + Sync {
    async fn get_image(&self, url: &str, model_id: &str) -> Result<Option<ImageCacheRecord>>;
    async fn put_image(
        &self,
        url: &str,
        bytes: &[u8],
        embedding: Vec<f32>,
        analysis: VisionAnalysis,
        llm_response: String,
        embedding_model_id: &str,
        analysis_model_id: &str,
        cost_embedding: f64,
        cost_analysis: f64,
    ) -> Result<()>;

    async fn get_text(&self, text: &str, model_id: &str) -> Result<Option<Vec<f32>>>;
    async fn put_text(&self, text: &str, embedding: Vec<f32>, model_id: &str, cost: f64) -> Result<()>;

    /// Running totals for the metrics endpoint; best-effort.
    async fn cost_totals(&self) -> (f64, f64);
}

#[derive(Default)]
struct Inner {
    images: HashMap<String, ImageCacheRecord>,
    texts: HashMap<String, TextCacheRecord>,
    cost_total: f64,
    cost_saved: f64,
}

/// In-process reference implementation. Read-mostly, write-once per key
/// (§5 "Shared-resource policy"); guarded by a single mutex since writes
/// are whole-record replacements and contention is expected to be low
/// relative to the cost of the embedding/vision calls being cached.
#[derive(Clone, Default)]
pub struct InMemoryEmbeddingCache {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryEmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EmbeddingCache for InMemoryEmbeddingCache {
    async fn get_image(&self, url: &str, model_id: &str) -> Result<Option<ImageCacheRecord>> {
        let mut inner = self.inner.lock().await;
        let hit = match inner.images.get(url) {
            // I6: a record produced by a different embedding model id is a miss,
            // never returned as if it matched the caller's requested model.
            Some(rec) if rec.embedding_model_id == model_id => Some(rec.clone()),
            _ => None,
        };
        if let Some(rec) = &hit {
            let cost_total = rec.cost_total;
            if let Some(stored) = inner.images.get_mut(url) {
                stored.access_count += 1;
                stored.last_accessed = now_rfc3339();
            }
            inner.cost_saved += cost_total;
        }
        Ok(hit)
    }

    async fn put_image(
        &self,
        url: &str,
        bytes: &[u8],
        embedding: Vec<f32>,
        analysis: VisionAnalysis,
        llm_response: String,
        embedding_model_id: &str,
        analysis_model_id: &str,
        cost_embedding: f64,
        cost_analysis: f64,
    ) -> Result<()> {
        let now = now_rfc3339();
        let cost_total = cost_embedding + cost_analysis;
        // I7: embedding + analysis for one image are written in a single record;
        // no intermediate state is ever visible to a concurrent reader.
        let record = ImageCacheRecord {
            image_hash: sha256_hex(bytes),
            embedding,
            analysis,
            llm_response,
            embedding_model_id: embedding_model_id.to_string(),
            analysis_model_id: analysis_model_id.to_string(),
            cache_version: CACHE_VERSION,
            first_seen: now.clone(),
            last_accessed: now,
            access_count: 0,
            cost_embedding,
            cost_analysis,
            cost_total,
            cost_saved: 0.0,
        };
        let mut inner = self.inner.lock().await;
        inner.cost_total += cost_total;
        inner.images.insert(url.to_string(), record);
        Ok(())
    }

    async fn get_text(&self, text: &str, model_id: &str) -> Result<Option<Vec<f32>>> {
        let key = text_cache_key(text, model_id);
        let mut inner = self.inner.lock().await;
        let hit = inner
            .texts
            .get(&key)
            .filter(|rec| rec.model_id == model_id)
            .map(|rec| rec.embedding.clone());
        if hit.is_some() {
            let cost = inner.texts.get(&key).map(|r| r.cost).unwrap_or(0.0);
            if let Some(stored) = inner.texts.get_mut(&key) {
                stored.access_count += 1;
                stored.last_accessed = now_rfc3339();
            }
            inner.cost_saved += cost;
        }
        Ok(hit)
    }

    async fn put_text(&self, text: &str, embedding: Vec<f32>, model_id: &str, cost: f64) -> Result<()> {
        let key = text_cache_key(text, model_id);
        let now = now_rfc3339();
        let record = TextCacheRecord {
            text_sample: text.chars().take(200).collect(),
            embedding,
            model_id: model_id.to_string(),
            first_seen: now.clone(),
            last_accessed: now,
            access_count: 0,
            cost,
        };
        let mut inner = self.inner.lock().await;
        inner.cost_total += cost;
        inner.texts.insert(key, record);
        Ok(())
    }

    async fn cost_totals(&self) -> (f64, f64) {
        let inner = self.inner.lock().await;
        (inner.cost_total, inner.cost_saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::VisionAnalysis;

    fn blank_analysis() -> VisionAnalysis {
        VisionAnalysis {
            image_type: "exterior".into(),
            features: vec![],
            architecture_style: None,
            exterior_color: None,
            materials: vec![],
            visual_features: vec![],
            room_type: None,
            confidence: "low".into(),
        }
    }

    #[tokio::test]
    async fn image_cache_hit_tracks_cost_saved_and_access_count() {
        let cache = InMemoryEmbeddingCache::new();
        cache
            .put_image(
                "http://example.com/a.jpg",
                b"bytes",
                vec![0.1; 4],
                blank_analysis(),
                "{}".into(),
                "model-a",
                "model-a",
                1.0,
                2.0,
            )
            .await
            .unwrap();

        let hit = cache.get_image("http://example.com/a.jpg", "model-a").await.unwrap();
        assert!(hit.is_some());
        let (cost_total, cost_saved) = cache.cost_totals().await;
        assert_eq!(cost_total, 3.0);
        assert_eq!(cost_saved, 3.0);
    }

    #[tokio::test]
    async fn model_mismatch_is_a_miss_not_a_wrong_model_hit() {
        let cache = InMemoryEmbeddingCache::new();
        cache
            .put_image(
                "http://example.com/a.jpg",
                b"bytes",
                vec![0.1; 4],
                blank_analysis(),
                "{}".into(),
                "model-a",
                "model-a",
                1.0,
                0.0,
            )
            .await
            .unwrap();

        let miss = cache.get_image("http://example.com/a.jpg", "model-b").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn text_cache_keys_are_composite_on_model_id() {
        let cache = InMemoryEmbeddingCache::new();
        cache.put_text("a white house", vec![1.0; 4], "model-a", 0.5).await.unwrap();
        assert!(cache.get_text("a white house", "model-a").await.unwrap().is_some());
        assert!(cache.get_text("a white house", "model-b").await.unwrap().is_none());
    }
}
