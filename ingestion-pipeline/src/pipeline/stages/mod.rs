use common::{
    error::AppError,
    storage::{
        types::document_chunk::DocumentChunk,
        vector_index::{ChunkPayload, VectorPoint},
    },
    utils::embedding::EmbeddingBatch,
};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use crate::chunker::Chunker;

use super::{
    context::{PendingChunk, PipelineContext},
    state::{Chunked, Embedded, Extracted, Indexed, Persisted, ProcessingMachine, Ready},
};

/// Drops chunks and vector points left by an earlier run. Point removal is best effort.
#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, workspace_id = %ctx.workspace_id)
)]
pub async fn clear_previous(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    if let Err(err) = ctx
        .services
        .remove_indexed_document(&ctx.collection, &ctx.document_id)
        .await
    {
        warn!(
            document_id = %ctx.document_id,
            collection = %ctx.collection,
            error = %err,
            "failed to remove previous vector points"
        );
    }
    DocumentChunk::delete_by_document(&ctx.document_id, ctx.db).await
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, workspace_id = %ctx.workspace_id)
)]
pub async fn extract(
    machine: ProcessingMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), Extracted>, AppError> {
    let content = ctx.services.load_content(ctx.document).await?;
    let byte_len = content.bytes.len();
    let pages = ctx
        .services
        .extract_pages(content.bytes, &content.mime_type)
        .await?;

    info!(
        document_id = %ctx.document_id,
        mime_type = %content.mime_type,
        bytes = byte_len,
        pages = pages.len(),
        "document text extracted"
    );

    ctx.pages = pages;

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, workspace_id = %ctx.workspace_id)
)]
pub async fn chunk(
    machine: ProcessingMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), Chunked>, AppError> {
    let tuning = &ctx.pipeline_config.tuning;
    let chunker = Chunker::new(tuning.chunk_size, tuning.chunk_overlap);
    let pages = ctx.take_pages();

    let chunks = chunk_pages(&chunker, &pages);
    if chunks.is_empty() {
        return Err(AppError::DataIntegrity(
            "no chunks produced from extracted text".into(),
        ));
    }

    debug!(
        document_id = %ctx.document_id,
        pages = pages.len(),
        chunk_count = chunks.len(),
        chunk_size = chunker.size(),
        overlap = chunker.overlap(),
        "document chunked"
    );

    ctx.chunks = chunks;

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, workspace_id = %ctx.workspace_id)
)]
pub async fn embed(
    machine: ProcessingMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), Embedded>, AppError> {
    let texts: Vec<String> = ctx.chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let batch = ctx.services.embed_chunks(&texts).await?;
    validate_embeddings(&batch, texts.len())?;

    debug!(
        document_id = %ctx.document_id,
        embeddings = batch.embeddings.len(),
        dimension = batch.dimension,
        model = batch.model.as_deref().unwrap_or("unknown"),
        "chunks embedded"
    );

    ctx.embeddings = Some(batch);

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, workspace_id = %ctx.workspace_id)
)]
pub async fn persist(
    machine: ProcessingMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), Persisted>, AppError> {
    let pending = std::mem::take(&mut ctx.chunks);
    let mut stored = Vec::with_capacity(pending.len());
    for (index, chunk) in pending.into_iter().enumerate() {
        let chunk_index = u32::try_from(index)
            .map_err(|_| AppError::InternalError("chunk index exceeds u32".into()))?;
        stored.push(DocumentChunk::new(
            ctx.document_id.clone(),
            ctx.workspace_id.clone(),
            chunk_index,
            chunk.page_number,
            chunk.text,
        ));
    }

    let chunk_count = u32::try_from(stored.len())
        .map_err(|_| AppError::InternalError("chunk count exceeds u32".into()))?;
    DocumentChunk::insert_batch(stored.clone(), ctx.db).await?;
    ctx.document.record_progress(chunk_count, ctx.db).await?;

    debug!(
        document_id = %ctx.document_id,
        chunk_count,
        "chunks persisted"
    );

    ctx.stored_chunks = stored;

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(document_id = %ctx.document_id, workspace_id = %ctx.workspace_id)
)]
pub async fn index(
    machine: ProcessingMachine<(), Persisted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), Indexed>, AppError> {
    let batch = ctx.take_embeddings()?;
    let dimension = batch.dimension;
    let points = build_points(&ctx.stored_chunks, batch.embeddings)?;
    let point_count = points.len();

    ctx.services
        .index_chunks(&ctx.collection, dimension, points)
        .await?;

    debug!(
        document_id = %ctx.document_id,
        collection = %ctx.collection,
        point_count,
        "chunks indexed"
    );

    machine
        .index()
        .map_err(|(_, guard)| map_guard_error("index", &guard))
}

/// Chunks every page on its own so no chunk spans two pages.
pub fn chunk_pages(chunker: &Chunker, pages: &[crate::extraction::PageText]) -> Vec<PendingChunk> {
    pages
        .iter()
        .flat_map(|page| {
            chunker
                .chunk(&page.text)
                .into_iter()
                .map(move |text| PendingChunk {
                    text,
                    page_number: page.page_number,
                })
        })
        .collect()
}

/// One vector per text, all of the batch's declared dimension.
pub fn validate_embeddings(batch: &EmbeddingBatch, expected: usize) -> Result<(), AppError> {
    if batch.embeddings.len() != expected {
        return Err(AppError::embedding_count_mismatch(
            batch.embeddings.len(),
            expected,
        ));
    }
    if let Some((position, vector)) = batch
        .embeddings
        .iter()
        .enumerate()
        .find(|(_, vector)| vector.len() != batch.dimension)
    {
        return Err(AppError::DataIntegrity(format!(
            "embedding {position} has dimension {}, expected {}",
            vector.len(),
            batch.dimension
        )));
    }
    Ok(())
}

/// Pairs persisted chunks with their vectors. Point ids are the chunk ids.
pub fn build_points(
    chunks: &[DocumentChunk],
    embeddings: Vec<Vec<f32>>,
) -> Result<Vec<VectorPoint>, AppError> {
    if chunks.len() != embeddings.len() {
        return Err(AppError::embedding_count_mismatch(
            embeddings.len(),
            chunks.len(),
        ));
    }
    Ok(chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, vector)| VectorPoint {
            id: chunk.id.clone(),
            vector,
            payload: ChunkPayload {
                document_id: chunk.document_id.clone(),
                workspace_id: chunk.workspace_id.clone(),
                chunk_index: chunk.chunk_index,
                page_number: chunk.page_number,
                text: chunk.content.clone(),
            },
        })
        .collect())
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid document processing transition during {event}: {guard:?}"
    ))
}
