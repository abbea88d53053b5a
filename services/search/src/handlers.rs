use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use propsearch_core::analytics::{self, QualitySummary, ResultCounts, SearchEvent, Timings, Warning};
use propsearch_core::backend::{client::BackendClient, index, mapping, query as qbuild};
use propsearch_core::cache::{EmbeddingCache, InMemoryEmbeddingCache};
use propsearch_core::embeddings::EmbeddingService;
use propsearch_core::fusion::{self, RankedHit};
use propsearch_core::model::{Constraints, PropertyResult};
use propsearch_core::providers::HttpModelClient;
use propsearch_core::query_understanding;
use propsearch_core::weighting;

use crate::config::Config;
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::models::{parse_csv_set, CrudResponse, PatchListingRequest, QueryInfo, SearchAfterCursor, SearchParams, SearchResponse};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub backend: Arc<BackendClient>,
    pub model_client: Arc<HttpModelClient>,
    pub embedding_service: Arc<EmbeddingService<InMemoryEmbeddingCache>>,
    pub cache: Arc<InMemoryEmbeddingCache>,
    pub analytics: Arc<dyn analytics::AnalyticsSink>,
    pub http: reqwest::Client,
    pub ingestion_url: Option<String>,
}

fn query_type_str(constraints: &Constraints) -> String {
    serde_json::to_value(constraints.query_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "general".to_string())
}

fn apply_query_param_filters(params: &SearchParams, constraints: &mut Constraints) {
    let hf = &mut constraints.hard_filters;
    if params.min_price.is_some() {
        hf.price_min = params.min_price;
    }
    if params.max_price.is_some() {
        hf.price_max = params.max_price;
    }
    if params.min_bedrooms.is_some() {
        hf.beds_min = params.min_bedrooms;
    }
    if params.min_bathrooms.is_some() {
        hf.baths_min = params.min_bathrooms;
    }
    if params.min_living_area.is_some() {
        hf.living_area_min = params.min_living_area;
    }
    if params.max_living_area.is_some() {
        hf.living_area_max = params.max_living_area;
    }
    let property_types = parse_csv_set(&params.property_types);
    if !property_types.is_empty() {
        hf.property_types = property_types;
    }
    let statuses = parse_csv_set(&params.listing_status);
    if !statuses.is_empty() {
        hf.status = statuses;
    }
}

/// Outcome of one retrieval strategy: its ranked hits (empty on error or
/// timeout), any warning to surface, and how long it took -- timed from
/// inside this function so concurrent siblings don't skew each other's
/// reading (§5 "per-strategy deadline").
struct StrategyOutcome {
    hits: Vec<RankedHit>,
    warning: Option<Warning>,
    elapsed_ms: u64,
}

async fn run_with_deadline<F>(fut: F, deadline_ms: u64, component: &str) -> StrategyOutcome
where
    F: std::future::Future<Output = Result<Vec<RankedHit>>>,
{
    let t0 = Instant::now();
    let (hits, warning) = match tokio::time::timeout(Duration::from_millis(deadline_ms), fut).await {
        Ok(Ok(v)) => (v, None),
        Ok(Err(e)) => {
            tracing::warn!(component, error = %e, "retrieval strategy errored");
            (Vec::new(), Some(Warning { component: component.to_string(), message: e.to_string(), impact: "high".to_string() }))
        }
        Err(_) => {
            metrics::record_strategy_timeout();
            tracing::warn!(component, deadline_ms, "retrieval strategy exceeded its deadline");
            (Vec::new(), Some(Warning { component: component.to_string(), message: "timeout".to_string(), impact: "high".to_string() }))
        }
    };
    StrategyOutcome { hits, warning, elapsed_ms: t0.elapsed().as_millis() as u64 }
}

/// `GET /search` (§6.1). Runs C6 query understanding + the text query
/// embedding, then the three retrieval strategies (C8) concurrently under
/// per-strategy deadlines (§5), computes adaptive RRF k-values (C9), fuses
/// and boosts (C10), and emits the analytics event fire-and-forget (C11).
pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>> {
    let request_start = Instant::now();
    metrics::record_query();

    if params.query.trim().is_empty() {
        return Err(SearchError::InvalidInput("query must not be empty".to_string()));
    }
    let size = params.limit.unwrap_or(state.cfg.default_page_size).min(state.cfg.max_page_size).max(1);

    let t0 = Instant::now();
    let mut constraints = query_understanding::understand(state.model_client.as_ref(), &params.query).await;
    apply_query_param_filters(&params, &mut constraints);
    let constraint_extraction_ms = t0.elapsed().as_millis() as u64;

    let t0 = Instant::now();
    let query_vector = match state.embedding_service.embed_text(&params.query, 0.0).await {
        Ok(v) => {
            metrics::record_cache_miss();
            v
        }
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed; proceeding with BM25 only");
            Vec::new()
        }
    };
    let embedding_ms = t0.elapsed().as_millis() as u64;
    let has_query_vector = query_vector.iter().any(|v| *v != 0.0);

    let mut warnings: Vec<Warning> = Vec::new();

    // E5 mixed-model protection (§7): a matching vector dimension says
    // nothing about whether the index was built from the same embedding
    // model the query was just embedded with. Read the model id the index
    // was created with and refuse the kNN paths rather than trust neighbors
    // that may come from an unrelated embedding space.
    let mut run_knn = has_query_vector;
    if has_query_vector {
        match state.backend.get_mapping(&state.cfg.index_name).await {
            Ok(existing) => {
                let index_model_id = index::index_embedding_model_id(&existing);
                if index_model_id.as_deref() != Some(state.cfg.embedding_model_id.as_str()) {
                    run_knn = false;
                    tracing::warn!(
                        index_model_id = ?index_model_id,
                        query_model_id = %state.cfg.embedding_model_id,
                        "embedding model mismatch between index and query; skipping kNN paths"
                    );
                    warnings.push(Warning {
                        component: "embedding".to_string(),
                        message: "model mismatch".to_string(),
                        impact: "high".to_string(),
                    });
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read index mapping for model-identity check; proceeding with kNN");
            }
        }
    }

    let bm25_query = qbuild::build_bm25_query(&params.query, &constraints, size);
    let bm25_fut = run_with_deadline(
        async {
            let resp = state.backend.search(&state.cfg.index_name, &bm25_query).await.map_err(SearchError::from)?;
            Ok(mapping::map_ranked_hits(&resp))
        },
        state.cfg.bm25_deadline_ms,
        "bm25",
    );

    let knn_text_fut = async {
        if !run_knn {
            return StrategyOutcome { hits: Vec::new(), warning: None, elapsed_ms: 0 };
        }
        let text_query = qbuild::build_knn_text_query(&query_vector, &constraints, size);
        run_with_deadline(
            async {
                let resp = state.backend.search(&state.cfg.index_name, &text_query).await.map_err(SearchError::from)?;
                Ok(mapping::map_ranked_hits(&resp))
            },
            state.cfg.knn_text_deadline_ms,
            "knn_text",
        )
        .await
    };

    let knn_image_fut = async {
        if !run_knn {
            return StrategyOutcome { hits: Vec::new(), warning: None, elapsed_ms: 0 };
        }
        let image_query = qbuild::build_knn_image_query(&query_vector, &constraints, size);
        run_with_deadline(
            async {
                let resp = state.backend.search(&state.cfg.index_name, &image_query).await.map_err(SearchError::from)?;
                Ok(mapping::map_ranked_hits(&resp))
            },
            state.cfg.knn_image_deadline_ms,
            "knn_image",
        )
        .await
    };

    // §5/§P5: the three strategies run concurrently, each under its own
    // deadline, so worst-case latency is the max of the three, not the sum.
    let (bm25_outcome, knn_text_outcome, knn_image_outcome) = tokio::join!(bm25_fut, knn_text_fut, knn_image_fut);

    let bm25_hits = bm25_outcome.hits;
    let bm25_ms = bm25_outcome.elapsed_ms;
    metrics::record_bm25_latency(bm25_ms);
    warnings.extend(bm25_outcome.warning);

    let knn_text_hits = knn_text_outcome.hits;
    let knn_text_ms = knn_text_outcome.elapsed_ms;
    metrics::record_knn_text_latency(knn_text_ms);
    warnings.extend(knn_text_outcome.warning);

    let knn_image_hits = knn_image_outcome.hits;
    let knn_image_ms = knn_image_outcome.elapsed_ms;
    metrics::record_knn_image_latency(knn_image_ms);
    warnings.extend(knn_image_outcome.warning);

    // §9 Open Question #3: all three strategies returning zero candidates is
    // a contract-tier condition, not a silent empty-result no-match.
    if bm25_hits.is_empty() && knn_text_hits.is_empty() && knn_image_hits.is_empty() {
        warnings.push(Warning {
            component: "fusion".to_string(),
            message: "all three retrieval strategies returned zero candidates".to_string(),
            impact: "high".to_string(),
        });
    }

    let t0 = Instant::now();
    let k = weighting::adaptive_k(&constraints);
    let rrf_ms = t0.elapsed().as_millis() as u64;

    // Fetch full documents for every candidate doc id so boosting has tags
    // to match against and the response can carry the scalar fields (§6.1).
    // A single `terms` lookup keeps this one round trip regardless of how
    // many distinct candidates the three strategies produced.
    let doc_ids: std::collections::BTreeSet<String> =
        bm25_hits.iter().chain(knn_text_hits.iter()).chain(knn_image_hits.iter()).map(|h| h.doc_id.clone()).collect();
    let mut tags_by_doc = std::collections::BTreeMap::new();
    let mut listings_by_doc = std::collections::BTreeMap::new();
    if !doc_ids.is_empty() {
        let lookup = serde_json::json!({"query": {"terms": {"zpid": doc_ids}}, "size": doc_ids.len()});
        if let Ok(resp) = state.backend.search(&state.cfg.index_name, &lookup).await {
            for (doc_id, source) in mapping::map_sources(&resp) {
                let listing = mapping::map_listing(&source);
                tags_by_doc.insert(doc_id.clone(), listing.all_tags());
                listings_by_doc.insert(doc_id, listing);
            }
        }
    }

    let t0 = Instant::now();
    let fused = fusion::fuse_and_boost(&bm25_hits, &knn_text_hits, &knn_image_hits, k, &constraints.must_have, &tags_by_doc, size);
    let boost_ms = t0.elapsed().as_millis() as u64;

    let properties: Vec<PropertyResult> = fused
        .iter()
        .filter_map(|f| {
            let listing = listings_by_doc.get(&f.doc_id)?;
            if !constraints.hard_filters.is_satisfied_by(listing) {
                return None;
            }
            let tags = tags_by_doc.get(&f.doc_id).cloned().unwrap_or_default();
            let matched_tags: std::collections::BTreeSet<String> = constraints.must_have.intersection(&tags).cloned().collect();
            let listing_fields = serde_json::to_value(listing)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .map(|m| m.into_iter().collect())
                .unwrap_or_default();
            Some(PropertyResult {
                zpid: f.doc_id.clone(),
                listing: listing_fields,
                scores: propsearch_core::model::ScoreBreakdown {
                    bm25: f.bm25_score,
                    knn_text: f.knn_text_score,
                    knn_image: f.knn_image_score,
                    fused: f.rrf_score,
                    final_score: f.final_score,
                },
                matched_tags,
            })
        })
        .collect();

    let total_ms = request_start.elapsed().as_millis() as u64;

    let quality = summarize_quality(&properties, &constraints);
    let overlap = result_overlap(&bm25_hits, &knn_text_hits, &knn_image_hits);

    let event = SearchEvent {
        query_id: Uuid::new_v4(),
        timestamp: now_rfc3339(),
        session_id: None,
        query: params.query.clone(),
        filters: serde_json::to_value(&constraints.hard_filters).unwrap_or(serde_json::Value::Null),
        total_results: properties.len(),
        timings: Timings {
            constraint_extraction_ms,
            embedding_ms,
            bm25_ms,
            knn_text_ms,
            knn_image_ms,
            rrf_ms,
            boost_ms,
            total_ms,
        },
        result_counts: ResultCounts { bm25: bm25_hits.len(), knn_text: knn_text_hits.len(), knn_image: knn_image_hits.len(), fused: properties.len() },
        result_overlap: overlap,
        quality,
        errors: Vec::new(),
        warnings: warnings.clone(),
        top_results: properties.iter().take(10).map(|p| p.zpid.clone()).collect(),
    };
    analytics::emit_fire_and_forget(state.analytics.clone(), event);

    let has_more = properties.len() >= size;
    let search_after = properties
        .last()
        .map(|p| SearchAfterCursor { sort_value: p.scores.final_score, doc_id: p.zpid.clone() }.encode());

    Ok(Json(SearchResponse {
        total: properties.len(),
        properties,
        query_info: QueryInfo { original_query: params.query, subqueries: None, classification: query_type_str(&constraints) },
        search_after,
        has_more,
        warnings,
    }))
}

fn summarize_quality(properties: &[PropertyResult], constraints: &Constraints) -> QualitySummary {
    if properties.is_empty() {
        return QualitySummary::default();
    }
    let mut perfect = 0;
    let mut partial = 0;
    let mut none = 0;
    let mut total_ratio = 0.0f32;
    let mut total_score = 0.0f32;
    for p in properties {
        total_score += p.scores.final_score;
        if constraints.must_have.is_empty() {
            continue;
        }
        let ratio = p.matched_tags.len() as f32 / constraints.must_have.len() as f32;
        total_ratio += ratio;
        if ratio >= 1.0 {
            perfect += 1;
        } else if ratio > 0.0 {
            partial += 1;
        } else {
            none += 1;
        }
    }
    QualitySummary {
        avg_score: total_score / properties.len() as f32,
        avg_match_ratio: total_ratio / properties.len() as f32,
        perfect_matches: perfect,
        partial_matches: partial,
        no_matches: none,
    }
}

fn result_overlap(bm25: &[RankedHit], text: &[RankedHit], image: &[RankedHit]) -> f32 {
    let ids = |hits: &[RankedHit]| hits.iter().map(|h| h.doc_id.clone()).collect::<std::collections::BTreeSet<_>>();
    let a = ids(bm25);
    let b = ids(text);
    let c = ids(image);
    let ab: std::collections::BTreeSet<_> = a.union(&b).cloned().collect();
    let union: std::collections::BTreeSet<_> = ab.union(&c).cloned().collect();
    if union.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).filter(|id| c.contains(*id)).count();
    intersection as f32 / union.len() as f32
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_default()
}

/// `POST /listings` (§6.2). A bare create is indexed directly; embeddings
/// are populated by a subsequent ingestion run, or synchronously if an
/// ingestion service URL is configured.
pub async fn create_listing_handler(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Result<Json<CrudResponse>> {
    let zpid = body.get("zpid").and_then(|v| v.as_str()).ok_or_else(|| SearchError::InvalidInput("zpid is required".to_string()))?.to_string();
    trigger_ingestion_or_index_raw(&state, &zpid, &body).await?;
    Ok(Json(CrudResponse { zpid, status: "created" }))
}

/// `PATCH /listings/{zpid}` (§6.2). When `preserve_embeddings` is true,
/// only scalar fields are merged into the existing document and
/// vectors/image analyses are left untouched; when false, a full
/// re-enrichment is triggered via the ingestion service.
pub async fn patch_listing_handler(
    State(state): State<AppState>,
    Path(zpid): Path<String>,
    Json(body): Json<PatchListingRequest>,
) -> Result<Json<CrudResponse>> {
    if body.options.preserve_embeddings {
        let existing = fetch_document(&state, &zpid).await?.ok_or_else(|| SearchError::NotFound(format!("unknown zpid {zpid}")))?;
        let mut merged = existing;
        if let (Some(dst), Some(src)) = (merged.as_object_mut(), body.updates.as_object()) {
            for (k, v) in src {
                dst.insert(k.clone(), v.clone());
            }
        }
        state.backend.bulk_upsert(&state.cfg.index_name, vec![(zpid.clone(), merged)], 1).await.map_err(SearchError::from)?;
    } else {
        trigger_ingestion_or_index_raw(&state, &zpid, &body.updates).await?;
    }
    Ok(Json(CrudResponse { zpid, status: "updated" }))
}

/// `DELETE /listings/{zpid}` (§6.2).
pub async fn delete_listing_handler(State(state): State<AppState>, Path(zpid): Path<String>) -> Result<Json<CrudResponse>> {
    state.backend.delete(&state.cfg.index_name, &zpid).await.map_err(SearchError::from)?;
    Ok(Json(CrudResponse { zpid, status: "deleted" }))
}

async fn fetch_document(state: &AppState, zpid: &str) -> Result<Option<serde_json::Value>> {
    let lookup = serde_json::json!({"query": {"term": {"zpid": zpid}}, "size": 1});
    let resp = state.backend.search(&state.cfg.index_name, &lookup).await.map_err(SearchError::from)?;
    Ok(resp.pointer("/hits/hits/0/_source").cloned())
}

async fn trigger_ingestion_or_index_raw(state: &AppState, zpid: &str, raw: &serde_json::Value) -> Result<()> {
    if let Some(url) = &state.ingestion_url {
        let resp = state
            .http
            .post(format!("{url}/ingest/listing"))
            .json(raw)
            .send()
            .await
            .map_err(|e| SearchError::Backend(format!("ingestion service call failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(SearchError::Backend(format!("ingestion service returned {}", resp.status())));
        }
        return Ok(());
    }
    // No ingestion service configured: index the raw document as-is, unembedded.
    state.backend.bulk_upsert(&state.cfg.index_name, vec![(zpid.to_string(), raw.clone())], 1).await.map_err(SearchError::from)?;
    Ok(())
}

pub async fn metrics_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (cost_total, cost_saved) = state.cache.cost_totals().await;
    Json(metrics::export_metrics_json(cost_total, cost_saved))
}

pub async fn health_handler() -> &'static str {
    "OK"
}

pub async fn ensure_index_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let index_mapping =
        index::build_index_mapping(&index::VectorIndexParams::default(), &index::Bm25Params::default(), &state.cfg.embedding_model_id);
    state.backend.create_index(&state.cfg.index_name, &index_mapping).await.map_err(SearchError::from)?;
    Ok(Json(serde_json::json!({"index": state.cfg.index_name, "status": "ready"})))
}
