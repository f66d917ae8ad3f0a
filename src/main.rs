//! aicounsel - customer-support chat response pipeline
//!
//! Classifies each user turn, answers from the knowledge base or a local
//! model, and learns from the answers it gives.

mod api;
mod classifier;
mod config;
mod db;
mod embedding;
mod formatting;
mod generation;
mod learning;
mod llm;
mod metrics;
mod pipeline;
mod retrieval;

use api::{create_router, AppState};
use config::PipelineConfig;
use db::Database;
use embedding::{Embedder, OllamaEmbedder};
use learning::LearningUpdater;
use llm::{LlmConfig, ModelManager};
use metrics::Metrics;
use pipeline::{DatabaseStore, Pipeline};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aicounsel=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("AICOUNSEL_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.aicounsel/aicounsel.db")
    });

    let port: u16 = std::env::var("AICOUNSEL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let pipeline_config = PipelineConfig::from_env();
    let llm_config = LlmConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize database
    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;
    let seeded = db.seed_default_patterns()?;
    tracing::info!(
        entries = db.count_entries()?,
        seeded_patterns = seeded,
        "Knowledge base ready"
    );
    let store = Arc::new(DatabaseStore::new(db));

    // Models
    let manager = Arc::new(ModelManager::from_config(&llm_config));
    let initial = manager.active_model_id();
    match manager.switch_model(&initial).await {
        Ok(status) => tracing::info!(model = %status.active_model, "Model loaded"),
        Err(e) => tracing::warn!(
            model = %initial,
            error = %e,
            "Initial model load failed; turns needing generation will fail until a switch succeeds"
        ),
    }

    let embedder: Option<Arc<dyn Embedder>> = llm_config.embedding_model.as_deref().map(|model| {
        tracing::info!(model = %model, "Embeddings enabled");
        Arc::new(OllamaEmbedder::new(&llm_config.ollama_url, model)) as Arc<dyn Embedder>
    });

    // Pipeline and learning worker
    let metrics = Arc::new(Metrics::default());
    let shutdown = CancellationToken::new();
    let mut pipeline = Pipeline::new(
        pipeline_config.clone(),
        manager,
        store.clone(),
        store.clone(),
        embedder.clone(),
        metrics.clone(),
    );
    let learner = if pipeline_config.stages.learning {
        let updater = LearningUpdater::new(store, embedder, pipeline_config.learning, metrics);
        let (queue, handle) = learning::spawn(updater, shutdown.clone());
        pipeline = pipeline.with_learning(queue);
        Some(handle)
    } else {
        tracing::info!("Learning disabled");
        None
    };

    let state = AppState::new(Arc::new(pipeline));

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("aicounsel server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = learner {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Learning worker ended abnormally");
        }
    }

    Ok(())
}
