use std::sync::Arc;

use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use ingestion_pipeline::{ContentStore, DocumentProcessor, ProcessingQueue};
use retrieval_pipeline::RetrievalEngine;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub content_store: ContentStore,
    pub processor: Arc<DocumentProcessor>,
    pub engine: Arc<RetrievalEngine>,
    pub queue: ProcessingQueue,
}
