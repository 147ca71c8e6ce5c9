use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::types::{
        document::{Document, ProcessingStatus},
        document_chunk::{DocumentChunk, DEFAULT_PAGE_SIZE},
    },
};
use ingestion_pipeline::{NewDocument, ProcessRequest};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "unlimited")]
    pub file: FieldData<NamedTempFile>,
    pub directory: Option<String>,
    #[form_data(default)]
    pub tags: Vec<String>,
    pub auto_process: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub directory: Option<String>,
    pub tags: Vec<String>,
    pub status: ProcessingStatus,
    pub blob_id: String,
    pub error_message: Option<String>,
    pub chunk_count: u32,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            workspace_id: document.workspace_id,
            name: document.name,
            directory: document.directory,
            tags: document.tags,
            status: document.status,
            blob_id: document.blob_id,
            error_message: document.error_message,
            chunk_count: document.chunk_count,
            processed_at: document.processed_at,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    document: DocumentResponse,
    is_new: bool,
    queued: bool,
}

pub async fn upload_document(
    State(state): State<ApiState>,
    Path(workspace_id): Path<String>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = input.file.metadata.file_name.clone().unwrap_or_default();
    let content_type = input.file.metadata.content_type.clone();
    let bytes = Bytes::from(
        tokio::fs::read(input.file.contents.path())
            .await
            .map_err(AppError::from)?,
    );

    info!(
        workspace_id = %workspace_id,
        file_name = %file_name,
        size = bytes.len(),
        tag_count = input.tags.len(),
        "Received document upload"
    );

    let tags = input
        .tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();

    let uploaded = state
        .content_store
        .upload_document(
            NewDocument {
                workspace_id: workspace_id.clone(),
                file_name,
                directory: input.directory.filter(|dir| !dir.trim().is_empty()),
                tags,
                content_type,
            },
            bytes,
        )
        .await?;

    // The upload is kept even when the queue is full; processing can be requested again.
    let queued = if input.auto_process.unwrap_or(true) {
        match state.queue.enqueue(ProcessRequest {
            workspace_id,
            document_id: uploaded.document.id.clone(),
            force: false,
        }) {
            Ok(()) => true,
            Err(err) => {
                warn!(document_id = %uploaded.document.id, error = %err, "Could not queue uploaded document");
                false
            }
        }
    } else {
        false
    };

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            document: uploaded.document.into(),
            is_new: uploaded.is_new,
            queued,
        }),
    ))
}

pub async fn list_documents(
    State(state): State<ApiState>,
    Path(workspace_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let documents = Document::list_by_workspace(&workspace_id, &state.db).await?;
    Ok(Json(
        documents
            .into_iter()
            .map(DocumentResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProcessParams {
    pub force: bool,
    /// Run the pipeline inside the request instead of queueing it.
    pub wait: bool,
}

pub async fn process_document(
    State(state): State<ApiState>,
    Path((workspace_id, document_id)): Path<(String, String)>,
    Query(params): Query<ProcessParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.wait {
        let document = state
            .processor
            .process_document(&workspace_id, &document_id, params.force)
            .await?;
        return Ok((StatusCode::OK, Json(DocumentResponse::from(document))).into_response());
    }

    let document = Document::get_in_workspace(&document_id, &workspace_id, &state.db).await?;
    if document.status == ProcessingStatus::Processing && !params.force {
        return Err(AppError::already_processing(&document_id).into());
    }

    state.queue.enqueue(ProcessRequest {
        workspace_id,
        document_id,
        force: params.force,
    })?;

    Ok((StatusCode::ACCEPTED, Json(DocumentResponse::from(document))).into_response())
}

pub async fn get_status(
    State(state): State<ApiState>,
    Path((workspace_id, document_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .processor
        .get_status(&workspace_id, &document_id)
        .await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct ChunkParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub id: String,
    pub chunk_index: u32,
    pub page_number: u32,
    pub content: String,
}

impl From<DocumentChunk> for ChunkResponse {
    fn from(chunk: DocumentChunk) -> Self {
        Self {
            id: chunk.id,
            chunk_index: chunk.chunk_index,
            page_number: chunk.page_number,
            content: chunk.content,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChunkPageResponse {
    items: Vec<ChunkResponse>,
    total: u64,
    page: u32,
    page_size: u32,
}

pub async fn list_chunks(
    State(state): State<ApiState>,
    Path((workspace_id, document_id)): Path<(String, String)>,
    Query(params): Query<ChunkParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .processor
        .list_chunks(
            &workspace_id,
            &document_id,
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;

    Ok(Json(ChunkPageResponse {
        items: page.items.into_iter().map(ChunkResponse::from).collect(),
        total: page.total,
        page: page.page,
        page_size: page.page_size,
    }))
}

pub async fn delete_document(
    State(state): State<ApiState>,
    Path((workspace_id, document_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .processor
        .delete_document(&workspace_id, &document_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
