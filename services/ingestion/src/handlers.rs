use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use propsearch_core::backend::client::BackendClient;
use propsearch_core::backend::mapping;
use propsearch_core::cache::{EmbeddingCache, InMemoryEmbeddingCache};
use propsearch_core::ingestion::{
    self, assemble_document, build_text_for_embedding, extract_fields, resolve_image_urls, EnrichmentOutcome,
    FailableTextEmbedder, ImageEnricher, TextEmbedderFailable,
};
use propsearch_core::providers::HttpModelClient;
use propsearch_core::{CoreError, Result as CoreResult};

use crate::config::Config;
use crate::error::{IngestionError, Result};
use crate::metrics;
use crate::models::{IngestBatchRequest, IngestBatchResponse, IngestListingResponse};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub backend: Arc<BackendClient>,
    pub cache: Arc<InMemoryEmbeddingCache>,
    pub image_enricher: Arc<ImageEnricher<InMemoryEmbeddingCache>>,
    pub text_embedder: Arc<FailableTextEmbedder<HttpModelClient>>,
    pub http: reqwest::Client,
}

/// Downloads one listing photo over plain `reqwest`, the same truncated-
/// error-logging shape as the model/backend HTTP clients. A non-2xx status
/// or transport failure is `Transient` -- the caller (`ImageEnricher`)
/// treats this single image as failed and continues (§5 "per-image
/// failures are isolated").
async fn download_image(http: reqwest::Client, timeout_ms: u64, url: String) -> CoreResult<Vec<u8>> {
    let resp = http
        .get(&url)
        .timeout(Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(CoreError::Http)?;
    if !resp.status().is_success() {
        return Err(CoreError::Transient(format!("image fetch {url}: status={}", resp.status())));
    }
    resp.bytes().await.map(|b| b.to_vec()).map_err(CoreError::Http)
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_default()
}

async fn fetch_existing(state: &AppState, zpid: &str) -> Option<propsearch_core::model::Listing> {
    let lookup = serde_json::json!({"query": {"term": {"zpid": zpid}}, "size": 1});
    let resp = state.backend.search(&state.cfg.index_name, &lookup).await.ok()?;
    let source = resp.pointer("/hits/hits/0/_source")?;
    Some(mapping::map_listing(source))
}

/// Runs one raw listing through the full pipeline (§4.5 steps 1-8):
/// field extraction, image URL resolution, per-image enrichment (cached
/// through C1), tag aggregation, visual-features summary, architecture
/// style, text embedding, and document assembly. Preserves the CRUD-owned
/// custom status fields (`listing_status`, `sold_date`, `listed_date`) of
/// any existing document, since those are orthogonal to the ingestion
/// source and MUST NOT be clobbered by a re-ingestion (§3.4, §4.5).
async fn ingest_one(state: &AppState, raw: &Value) -> Result<propsearch_core::model::Listing> {
    let t0 = Instant::now();
    let mut listing = extract_fields(raw);
    if listing.zpid.is_empty() {
        return Err(IngestionError::InvalidInput("zpid is required".to_string()));
    }

    let image_urls = resolve_image_urls(raw);
    let http = state.http.clone();
    let timeout_ms = state.cfg.image_download_timeout_ms;
    let enriched = state
        .image_enricher
        .enrich_all(&image_urls, move |url| download_image(http.clone(), timeout_ms, url))
        .await;

    let failed_images = enriched.iter().filter(|i| i.is_none()).count();
    for _ in 0..failed_images {
        metrics::record_image_failed();
    }
    let images: Vec<_> = enriched.into_iter().flatten().collect();

    let visual_features_text = ingestion::build_visual_features_summary(&images);
    let text_to_embed = build_text_for_embedding(&listing.description, &visual_features_text);
    let text_vector = state.text_embedder.try_embed(&text_to_embed).await;

    let outcome = EnrichmentOutcome { images, text_vector };
    let now = now_rfc3339();
    let mut assembled = assemble_document(listing.clone(), outcome, &now).ok_or_else(|| {
        IngestionError::Other(format!("listing {}: text embedding and every image failed", listing.zpid))
    })?;

    if let Some(existing) = fetch_existing(state, &assembled.zpid).await {
        if assembled.listing_status.is_none() {
            assembled.listing_status = existing.listing_status;
        }
        if assembled.sold_date.is_none() {
            assembled.sold_date = existing.sold_date;
        }
        if assembled.listed_date.is_none() {
            assembled.listed_date = existing.listed_date;
        }
    }

    metrics::record_listing_latency(t0.elapsed().as_millis() as u64);
    Ok(assembled)
}

/// `POST /ingest/listing`: synchronous single-listing ingest, used both
/// directly and as the callback target from `propsearch-search`'s CRUD
/// handlers when embeddings need (re)computing.
pub async fn ingest_listing_handler(State(state): State<AppState>, Json(raw): Json<Value>) -> Result<Json<IngestListingResponse>> {
    let listing = ingest_one(&state, &raw).await;
    let listing = match listing {
        Ok(l) => l,
        Err(e) => {
            metrics::record_listing_failed();
            return Err(e);
        }
    };
    let doc = serde_json::to_value(&listing).map_err(|e| IngestionError::Other(e.to_string()))?;
    state
        .backend
        .bulk_upsert(&state.cfg.index_name, vec![(listing.zpid.clone(), doc)], 1)
        .await
        .map_err(IngestionError::from)?;
    metrics::record_listing_ingested();
    Ok(Json(IngestListingResponse { zpid: listing.zpid, status: "ingested", has_valid_embeddings: listing.has_valid_embeddings }))
}

/// `POST /ingest/batch`: the self-invocation/batching contract (§4.5).
/// Processes `listings[start..start+limit]`, bulk-upserts whatever
/// succeeded in one backend call, and reports `next_start` so the caller
/// (an external scheduler; out of this crate's scope) can resume.
pub async fn ingest_batch_handler(State(state): State<AppState>, Json(req): Json<IngestBatchRequest>) -> Result<Json<IngestBatchResponse>> {
    let total = req.listings.len();
    let limit = req.limit.unwrap_or(state.cfg.default_batch_size).min(state.cfg.max_batch_size).max(1);
    let start = req.start.min(total);
    let end = (start + limit).min(total);
    let job_id = req.job_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut docs: Vec<(String, Value)> = Vec::new();
    let mut errors: Vec<String> = Vec::new();
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    for raw in &req.listings[start..end] {
        match ingest_one(&state, raw).await {
            Ok(listing) => {
                let doc = match serde_json::to_value(&listing) {
                    Ok(v) => v,
                    Err(e) => {
                        failed += 1;
                        errors.push(e.to_string());
                        continue;
                    }
                };
                docs.push((listing.zpid.clone(), doc));
                succeeded += 1;
                metrics::record_listing_ingested();
            }
            Err(e) => {
                failed += 1;
                metrics::record_listing_failed();
                errors.push(e.to_string());
            }
        }
    }

    if !docs.is_empty() {
        state.backend.bulk_upsert(&state.cfg.index_name, docs, state.cfg.bulk_chunk_size).await.map_err(IngestionError::from)?;
    }

    let processed = end - start;
    let next_start = if end < total { Some(end) } else { None };

    Ok(Json(IngestBatchResponse { job_id, start, limit, total, processed, succeeded, failed, next_start, errors }))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Json<Value> {
    let (cost_total, cost_saved) = state.cache.cost_totals().await;
    Json(metrics::export_metrics_json(cost_total, cost_saved))
}

pub async fn health_handler() -> &'static str {
    "OK"
}
