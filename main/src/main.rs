use std::{sync::Arc, time::Duration};

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        vector_index::{self, DynVectorIndex},
    },
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
        generation::{Generator, OllamaClient, WarmupOptions},
    },
};
use ingestion_pipeline::{
    run_worker_pool, ContentStore, DocumentProcessor, ProcessingQueue, SharedReceiver,
};
use retrieval_pipeline::{RetrievalConfig, RetrievalEngine};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod maintenance;

use maintenance::run_maintenance;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let storage = StorageManager::new(&config).await?;

    let embedding_provider = Arc::new(EmbeddingProvider::from_config(&config)?);
    info!(
        embedding_backend = embedding_provider.backend_label(),
        vector_index = ?config.vector_index,
        "Embedding provider initialized"
    );
    let vector_index = vector_index::from_config(&config)?;

    let cancel = CancellationToken::new();

    let ollama = Arc::new(OllamaClient::from_config(&config)?);
    if config.ollama_warmup {
        let options = WarmupOptions {
            auto_pull: config.ollama_auto_pull,
            ..WarmupOptions::default()
        };
        ollama.warm_up(&options, &cancel).await?;
    }

    let (api_state, receiver) = build_api_state(
        &config,
        Arc::clone(&db),
        storage,
        embedding_provider,
        vector_index,
        ollama,
    );

    let workers = tokio::spawn(run_worker_pool(
        Arc::clone(&api_state.processor),
        receiver,
        config.worker_count,
        cancel.clone(),
    ));
    let maintenance = tokio::spawn(run_maintenance(
        db,
        Arc::clone(&api_state.processor),
        api_state.content_store.clone(),
        Duration::from_secs(config.maintenance_interval_secs),
        cancel.clone(),
    ));

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    let shutdown = cancel.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await
    {
        error!("Server error: {}", e);
    }

    cancel.cancel();
    if let Err(e) = workers.await {
        error!("Worker pool panicked: {:?}", e);
    }
    if let Err(e) = maintenance.await {
        error!("Maintenance loop panicked: {:?}", e);
    }

    Ok(())
}

/// Wires the core services into the router state. The returned receiver feeds the worker
/// pool and keeps the processing queue open.
fn build_api_state(
    config: &AppConfig,
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    embedding_provider: Arc<EmbeddingProvider>,
    vector_index: DynVectorIndex,
    generator: Arc<dyn Generator>,
) -> (ApiState, SharedReceiver) {
    let content_store = ContentStore::new(
        Arc::clone(&db),
        storage,
        config.storage_bucket.clone(),
    );
    let processor = Arc::new(DocumentProcessor::new(
        Arc::clone(&db),
        config,
        content_store.clone(),
        Arc::clone(&embedding_provider),
        Arc::clone(&vector_index),
    ));
    let engine = Arc::new(RetrievalEngine::new(
        Arc::clone(&db),
        embedding_provider,
        vector_index,
        generator,
        RetrievalConfig::from_app_config(config),
    ));
    let (queue, receiver) = ProcessingQueue::new(config.queue_capacity);

    (
        ApiState {
            db,
            config: config.clone(),
            content_store,
            processor,
            engine,
            queue,
        },
        receiver,
    )
}
