use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use propsearch_core::backend::client::BackendClient;
use propsearch_core::cache::InMemoryEmbeddingCache;
use propsearch_core::ingestion::{FailableTextEmbedder, ImageEnricher};
use propsearch_core::providers::{HttpModelClient, ModelClientConfig};

use propsearch_ingestion::config;
use propsearch_ingestion::handlers::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::from_default_env().add_directive("info".parse().unwrap());
    fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .init();

    let cfg = config::Config::from_env();
    tracing::info!(
        backend_url = %cfg.backend_url,
        index_name = %cfg.index_name,
        embedding_model_id = %cfg.embedding_model_id,
        image_concurrency = cfg.image_concurrency,
        "loaded config"
    );

    let backend = Arc::new(BackendClient::new(
        cfg.backend_url.clone(),
        cfg.backend_timeout_ms,
        cfg.backend_max_retries,
        cfg.backend_backoff_ms,
    ));

    let model_client = Arc::new(HttpModelClient::new(ModelClientConfig {
        base_url: cfg.model_endpoint_url.clone(),
        api_key: cfg.model_api_key.clone(),
        timeout_ms: cfg.model_timeout_ms,
    }));

    let cache = Arc::new(InMemoryEmbeddingCache::new());

    let mut image_enricher =
        ImageEnricher::new(cache.clone(), model_client.clone(), model_client.clone(), cfg.embedding_model_id.clone());
    image_enricher.concurrency = cfg.image_concurrency;
    let image_enricher = Arc::new(image_enricher);

    let text_embedder = Arc::new(FailableTextEmbedder { inner: model_client.clone(), model_id: cfg.embedding_model_id.clone() });

    let state = AppState {
        cfg: cfg.clone(),
        backend: backend.clone(),
        cache,
        image_enricher,
        text_embedder,
        http: reqwest::Client::new(),
    };

    // Idempotent index bootstrap (C4, §4.4): the ingestion service may be
    // the first thing to run against a fresh backend, so it bootstraps the
    // same way `propsearch-search` does -- creating is a no-op if the index
    // (with a compatible vector dimension) already exists.
    let index_mapping = propsearch_core::backend::index::build_index_mapping(
        &propsearch_core::backend::index::VectorIndexParams::default(),
        &propsearch_core::backend::index::Bm25Params::default(),
        &cfg.embedding_model_id,
    );
    if let Err(e) = backend.create_index(&cfg.index_name, &index_mapping).await {
        tracing::error!(error = %e, index = %cfg.index_name, "index bootstrap failed; continuing, will surface on first request");
    }

    let app = Router::new()
        .route("/ingest/listing", post(handlers::ingest_listing_handler))
        .route("/ingest/batch", post(handlers::ingest_batch_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/health", get(handlers::health_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO))
                .make_span_with(|req: &Request<_>| {
                    let id = Uuid::new_v4();
                    tracing::info_span!(
                        "http.request",
                        req.id = %id,
                        http.method = %req.method(),
                        http.path = %req.uri().path(),
                    )
                }),
        );

    let port = cfg.port;
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    tracing::info!("ingestion-service listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
