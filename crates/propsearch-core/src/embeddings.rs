//! C3 Embedding Providers (§4.3). `text -> vector` and `image_bytes ->
//! vector`, both fronted by the embedding cache (C1). I9: a single model id
//! is used for every vector in an index; I10: dimension is fixed at index
//! create time.

use crate::cache::EmbeddingCache;
use crate::error::Result;
use crate::model::VECTOR_DIM;
use std::sync::Arc;

#[async_trait::async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str, model_id: &str) -> Result<Vec<f32>>;
}

#[async_trait::async_trait]
pub trait ImageEmbedder: Send + Sync {
    async fn embed(&self, bytes: &[u8], model_id: &str) -> Result<Vec<f32>>;
}

/// Per-request/per-call cost estimate passed through to the cache for
/// accounting; callers that cannot price a call may pass `0.0`.
#[derive(Clone)]
pub struct EmbeddingService<C: EmbeddingCache> {
    cache: Arc<C>,
    text_provider: Arc<dyn TextEmbedder>,
    image_provider: Arc<dyn ImageEmbedder>,
    model_id: String,
}

impl<C: EmbeddingCache> EmbeddingService<C> {
    pub fn new(
        cache: Arc<C>,
        text_provider: Arc<dyn TextEmbedder>,
        image_provider: Arc<dyn ImageEmbedder>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            text_provider,
            image_provider,
            model_id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Empty text yields a zero vector; callers must treat this as "no
    /// embedding" (does not set `has_valid_embeddings`), not as a D-zero
    /// failure.
    pub async fn embed_text(&self, text: &str, cost: f64) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; VECTOR_DIM]);
        }

        match self.cache.get_text(text, &self.model_id).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => {
                // §4.1: cache backend failures degrade to pass-through, never fail the caller.
                tracing::warn!(error = %e, "text cache read failed; computing embedding without cache");
            }
        }

        let vector = self.text_provider.embed(text, &self.model_id).await?;

        if let Err(e) = self.cache.put_text(text, vector.clone(), &self.model_id, cost).await {
            tracing::warn!(error = %e, "text cache write failed; continuing without caching this result");
        }

        Ok(vector)
    }

    /// Embeds image bytes only (no vision analysis); used when a caller
    /// needs just the vector, e.g. re-embedding without re-analyzing.
    pub async fn embed_image(&self, bytes: &[u8], cost: f64) -> Result<Vec<f32>> {
        let vector = self.image_provider.embed(bytes, &self.model_id).await?;
        let _ = cost;
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryEmbeddingCache;

    struct ConstantText(Vec<f32>);
    #[async_trait::async_trait]
    impl TextEmbedder for ConstantText {
        async fn embed(&self, _text: &str, _model_id: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct ConstantImage(Vec<f32>);
    #[async_trait::async_trait]
    impl ImageEmbedder for ConstantImage {
        async fn embed(&self, _bytes: &[u8], _model_id: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn empty_text_yields_zero_vector_without_calling_provider() {
        let cache = Arc::new(InMemoryEmbeddingCache::new());
        let svc = EmbeddingService::new(
            cache,
            Arc::new(ConstantText(vec![9.0; VECTOR_DIM])),
            Arc::new(ConstantImage(vec![9.0; VECTOR_DIM])),
            "model-a",
        );
        let v = svc.embed_text("   ", 0.1).await.unwrap();
        assert_eq!(v, vec![0.0; VECTOR_DIM]);
    }

    #[tokio::test]
    async fn repeated_text_embed_hits_cache_on_second_call() {
        let cache = Arc::new(InMemoryEmbeddingCache::new());
        let svc = EmbeddingService::new(
            cache.clone(),
            Arc::new(ConstantText(vec![1.0; VECTOR_DIM])),
            Arc::new(ConstantImage(vec![1.0; VECTOR_DIM])),
            "model-a",
        );
        svc.embed_text("a white house", 1.0).await.unwrap();
        svc.embed_text("a white house", 1.0).await.unwrap();
        let (_, cost_saved) = cache.cost_totals().await;
        assert_eq!(cost_saved, 1.0);
    }
}
