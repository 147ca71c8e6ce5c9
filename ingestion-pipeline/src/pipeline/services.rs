use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        types::document::Document,
        vector_index::{ensure_collection, upsert_with_retry, DynVectorIndex, VectorPoint},
    },
    utils::embedding::{EmbeddingBatch, EmbeddingProvider},
};
use tracing::debug;

use crate::{
    content_store::ContentStore,
    extraction::{self, PageText},
};

/// Raw document bytes plus the media type recorded on the blob.
#[derive(Debug, Clone)]
pub struct LoadedContent {
    pub bytes: Bytes,
    pub mime_type: String,
}

/// External collaborators of the processing pipeline.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn load_content(&self, document: &Document) -> Result<LoadedContent, AppError>;

    async fn extract_pages(
        &self,
        bytes: Bytes,
        mime_type: &str,
    ) -> Result<Vec<PageText>, AppError>;

    async fn embed_chunks(&self, texts: &[String]) -> Result<EmbeddingBatch, AppError>;

    /// Ensures the collection exists with `dimension` and upserts the points.
    async fn index_chunks(
        &self,
        collection: &str,
        dimension: usize,
        points: Vec<VectorPoint>,
    ) -> Result<(), AppError>;

    async fn remove_indexed_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), AppError>;

    async fn indexed_point_ids(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<String>, AppError>;
}

pub struct DefaultPipelineServices {
    content_store: ContentStore,
    embedding_provider: Arc<EmbeddingProvider>,
    vector_index: DynVectorIndex,
    point_batch_size: usize,
}

impl DefaultPipelineServices {
    pub fn new(
        content_store: ContentStore,
        embedding_provider: Arc<EmbeddingProvider>,
        vector_index: DynVectorIndex,
        point_batch_size: usize,
    ) -> Self {
        Self {
            content_store,
            embedding_provider,
            vector_index,
            point_batch_size: point_batch_size.max(1),
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn load_content(&self, document: &Document) -> Result<LoadedContent, AppError> {
        let blob = self.content_store.load_blob(&document.blob_id).await?;
        let bytes = self.content_store.get(&blob).await?;
        debug!(
            document_id = %document.id,
            blob_id = %blob.id,
            size = bytes.len(),
            "loaded document content"
        );
        Ok(LoadedContent {
            bytes,
            mime_type: blob.mime_type,
        })
    }

    async fn extract_pages(
        &self,
        bytes: Bytes,
        mime_type: &str,
    ) -> Result<Vec<PageText>, AppError> {
        extraction::extract_pages(bytes, mime_type).await
    }

    async fn embed_chunks(&self, texts: &[String]) -> Result<EmbeddingBatch, AppError> {
        self.embedding_provider.embed_batch(texts).await
    }

    async fn index_chunks(
        &self,
        collection: &str,
        dimension: usize,
        points: Vec<VectorPoint>,
    ) -> Result<(), AppError> {
        ensure_collection(self.vector_index.as_ref(), collection, dimension).await?;
        let mut remaining = points;
        while !remaining.is_empty() {
            let rest = remaining.split_off(remaining.len().min(self.point_batch_size));
            upsert_with_retry(self.vector_index.as_ref(), collection, remaining).await?;
            remaining = rest;
        }
        Ok(())
    }

    async fn remove_indexed_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), AppError> {
        self.vector_index
            .delete_by_document(collection, document_id)
            .await
    }

    async fn indexed_point_ids(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Vec<String>, AppError> {
        self.vector_index
            .document_point_ids(collection, document_id)
            .await
    }
}
