mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use context::PendingChunk;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, LoadedContent, PipelineServices};
pub use stages::{build_points, chunk_pages, validate_embeddings};

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::{Document, DocumentStatus, ProcessingStatus},
            document_chunk::{ChunkPage, DocumentChunk},
        },
        vector_index::{collection_name, DynVectorIndex},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tracing::{debug, error, info, warn};

use crate::content_store::ContentStore;

use self::{
    context::PipelineContext,
    stages::{chunk, clear_previous, embed, extract, index, persist},
    state::ready,
};

/// Runs documents through extraction, chunking, embedding and indexing, and owns the
/// document-scoped operations that touch both stores.
pub struct DocumentProcessor {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl DocumentProcessor {
    pub fn new(
        db: Arc<SurrealDbClient>,
        config: &AppConfig,
        content_store: ContentStore,
        embedding_provider: Arc<EmbeddingProvider>,
        vector_index: DynVectorIndex,
    ) -> Self {
        let pipeline_config = IngestionConfig::from_app_config(config);
        let services = DefaultPipelineServices::new(
            content_store,
            embedding_provider,
            vector_index,
            pipeline_config.tuning.point_batch_size,
        );

        Self::with_services(db, pipeline_config, Arc::new(services))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
        }
    }

    /// Processes one document end to end.
    ///
    /// `NotFound` and `Conflict` from the status guard are returned as is and leave the
    /// document untouched. Any later failure marks the document `failed` with the error text.
    #[tracing::instrument(
        skip_all,
        fields(document_id = %document_id, workspace_id = %workspace_id, force)
    )]
    pub async fn process_document(
        &self,
        workspace_id: &str,
        document_id: &str,
        force: bool,
    ) -> Result<Document, AppError> {
        let document = Document::begin_processing(document_id, workspace_id, force, &self.db)
            .await?;

        match self.drive_pipeline(&document).await {
            Ok(chunk_count) => {
                let processed = document.mark_processed(chunk_count, &self.db).await?;
                info!(
                    document_id = %processed.id,
                    chunk_count,
                    "document processed"
                );
                Ok(processed)
            }
            Err(err) => {
                if let Err(mark_err) = document.mark_failed(&err.to_string(), &self.db).await {
                    error!(
                        document_id = %document.id,
                        error = %mark_err,
                        "failed to record processing failure"
                    );
                }
                Err(err)
            }
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    #[tracing::instrument(skip_all, fields(document_id = %document.id))]
    async fn drive_pipeline(&self, document: &Document) -> Result<u32, AppError> {
        let mut ctx = PipelineContext::new(
            document,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
        );

        let pipeline_started = Instant::now();

        clear_previous(&mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        let machine = ready();

        let stage_start = Instant::now();
        let machine = extract(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let extract_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = chunk(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let chunk_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = embed(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let embed_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = persist(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = index(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let index_duration = stage_start.elapsed();

        let chunk_count = u32::try_from(ctx.stored_chunks.len())
            .map_err(|_| AppError::InternalError("chunk count exceeds u32".into()))?;

        info!(
            document_id = %ctx.document_id,
            chunk_count,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            extract_ms = Self::duration_millis(extract_duration),
            chunk_ms = Self::duration_millis(chunk_duration),
            embed_ms = Self::duration_millis(embed_duration),
            persist_ms = Self::duration_millis(persist_duration),
            index_ms = Self::duration_millis(index_duration),
            "document pipeline finished"
        );

        Ok(chunk_count)
    }

    pub async fn get_status(
        &self,
        workspace_id: &str,
        document_id: &str,
    ) -> Result<DocumentStatus, AppError> {
        Document::get_status(document_id, workspace_id, &self.db).await
    }

    /// Chunks of a processed document. Anything not yet processed is a `Conflict`.
    pub async fn list_chunks(
        &self,
        workspace_id: &str,
        document_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<ChunkPage, AppError> {
        let document = Document::get_in_workspace(document_id, workspace_id, &self.db).await?;
        if document.status != ProcessingStatus::Processed {
            return Err(AppError::Conflict(format!(
                "document {document_id} is not processed (status: {})",
                document.status.as_str()
            )));
        }
        DocumentChunk::list_page(document_id, page, page_size, &self.db).await
    }

    /// Removes vector points, chunks and the document row. The blob stays until garbage
    /// collection finds it unreferenced.
    pub async fn delete_document(
        &self,
        workspace_id: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        let document = Document::get_in_workspace(document_id, workspace_id, &self.db).await?;

        let collection = collection_name(workspace_id);
        if let Err(err) = self
            .services
            .remove_indexed_document(&collection, &document.id)
            .await
        {
            warn!(
                document_id = %document.id,
                collection = %collection,
                error = %err,
                "failed to delete vector points, continuing with relational delete"
            );
        }

        DocumentChunk::delete_by_document(&document.id, &self.db).await?;
        self.db.delete_item::<Document>(&document.id).await?;

        info!(document_id = %document.id, workspace_id, "document deleted");
        Ok(())
    }

    /// Restores vector points that are missing for processed documents, using their
    /// persisted chunks. Documents that fail are logged and skipped. Returns the number of
    /// points upserted.
    #[tracing::instrument(skip_all, fields(workspace_id = %workspace_id))]
    pub async fn reconcile_workspace(&self, workspace_id: &str) -> Result<usize, AppError> {
        let documents = Document::list_by_workspace(workspace_id, &self.db).await?;
        let collection = collection_name(workspace_id);
        let mut reconciled = 0;

        for document in documents
            .iter()
            .filter(|document| document.status == ProcessingStatus::Processed)
        {
            match self.reindex_document(document, &collection).await {
                Ok(count) => {
                    debug!(document_id = %document.id, points = count, "document reconciled");
                    reconciled += count;
                }
                Err(err) => {
                    warn!(
                        document_id = %document.id,
                        error = %err,
                        "failed to reconcile document"
                    );
                }
            }
        }

        info!(workspace_id, points = reconciled, "workspace reconciled");
        Ok(reconciled)
    }

    async fn reindex_document(
        &self,
        document: &Document,
        collection: &str,
    ) -> Result<usize, AppError> {
        let chunks = DocumentChunk::list_for_document(&document.id, &self.db).await?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let indexed: HashSet<String> = self
            .services
            .indexed_point_ids(collection, &document.id)
            .await?
            .into_iter()
            .collect();
        let missing: Vec<DocumentChunk> = chunks
            .into_iter()
            .filter(|chunk| !indexed.contains(&chunk.id))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = missing.iter().map(|chunk| chunk.content.clone()).collect();
        let batch = self.services.embed_chunks(&texts).await?;
        validate_embeddings(&batch, texts.len())?;

        // A reprocess that started in the meantime owns the document's points.
        if !self.still_processed(document).await? {
            debug!(document_id = %document.id, "document changed during reconcile, skipping");
            return Ok(0);
        }

        let dimension = batch.dimension;
        let points = build_points(&missing, batch.embeddings)?;
        let count = points.len();
        self.services
            .index_chunks(collection, dimension, points)
            .await?;
        Ok(count)
    }

    async fn still_processed(&self, document: &Document) -> Result<bool, AppError> {
        let current: Option<Document> = self.db.get_item(&document.id).await?;
        Ok(current.is_some_and(|current| {
            current.status == ProcessingStatus::Processed
                && current.processed_at == document.processed_at
        }))
    }
}

#[cfg(test)]
mod tests;
