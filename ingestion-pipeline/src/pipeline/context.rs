use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{document::Document, document_chunk::DocumentChunk},
        vector_index::collection_name,
    },
    utils::embedding::EmbeddingBatch,
};
use tracing::error;

use crate::extraction::PageText;

use super::{config::IngestionConfig, services::PipelineServices};

/// Chunk text tagged with the page it was cut from, before it gets an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    pub text: String,
    pub page_number: u32,
}

pub struct PipelineContext<'a> {
    pub document: &'a Document,
    pub document_id: String,
    pub workspace_id: String,
    pub collection: String,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub pages: Vec<PageText>,
    pub chunks: Vec<PendingChunk>,
    pub embeddings: Option<EmbeddingBatch>,
    pub stored_chunks: Vec<DocumentChunk>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        document: &'a Document,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        Self {
            document,
            document_id: document.id.clone(),
            workspace_id: document.workspace_id.clone(),
            collection: collection_name(&document.workspace_id),
            db,
            pipeline_config,
            services,
            pages: Vec::new(),
            chunks: Vec::new(),
            embeddings: None,
            stored_chunks: Vec::new(),
        }
    }

    pub fn take_pages(&mut self) -> Vec<PageText> {
        std::mem::take(&mut self.pages)
    }

    pub fn take_embeddings(&mut self) -> Result<EmbeddingBatch, AppError> {
        self.embeddings.take().ok_or_else(|| {
            AppError::InternalError("embeddings expected to be available for persistence".into())
        })
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            document_id = %self.document_id,
            workspace_id = %self.workspace_id,
            error = %err,
            "document processing aborted"
        );
        err
    }
}
