//! C11 Analytics Event Emitter (§6.3). Fire-and-forget per-query event.
//! Emission failures must never fail the search itself.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub constraint_extraction_ms: u64,
    pub embedding_ms: u64,
    pub bm25_ms: u64,
    pub knn_text_ms: u64,
    pub knn_image_ms: u64,
    pub rrf_ms: u64,
    pub boost_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultCounts {
    pub bm25: usize,
    pub knn_text: usize,
    pub knn_image: usize,
    pub fused: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualitySummary {
    pub avg_score: f32,
    pub avg_match_ratio: f32,
    pub perfect_matches: usize,
    pub partial_matches: usize,
    pub no_matches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub component: String,
    pub message: String,
    pub impact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEvent {
    pub query_id: Uuid,
    pub timestamp: String,
    pub session_id: Option<String>,
    pub query: String,
    pub filters: serde_json::Value,
    pub total_results: usize,
    pub timings: Timings,
    pub result_counts: ResultCounts,
    pub result_overlap: f32,
    pub quality: QualitySummary,
    pub errors: Vec<String>,
    pub warnings: Vec<Warning>,
    pub top_results: Vec<String>,
}

/// Best-effort sink. The `tracing`-based emitter below is the stand-in for
/// the external search-quality analytics sink, which is out of scope
/// (§1); it exists so the event contract itself is still exercised end to
/// end.
#[async_trait::async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn emit(&self, event: SearchEvent);
}

pub struct TracingAnalyticsSink;

#[async_trait::async_trait]
impl AnalyticsSink for TracingAnalyticsSink {
    async fn emit(&self, event: SearchEvent) {
        tracing::info!(
            query_id = %event.query_id,
            query = %event.query,
            total_results = event.total_results,
            total_ms = event.timings.total_ms,
            warnings = event.warnings.len(),
            errors = event.errors.len(),
            "search analytics event"
        );
    }
}

/// Spawns the emission so a slow or failing sink never delays the response
/// (§6.3 "never blocks the response").
pub fn emit_fire_and_forget<S: AnalyticsSink + 'static>(sink: std::sync::Arc<S>, event: SearchEvent) {
    tokio::spawn(async move {
        sink.emit(event).await;
    });
}
