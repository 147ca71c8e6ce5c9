use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use retrieval_pipeline::{SearchResponse, SourcesResponse};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResult {
    #[serde(flatten)]
    response: SearchResponse,
    documents: SourcesResponse,
}

pub async fn search(
    State(state): State<ApiState>,
    Path(workspace_id): Path<String>,
    Json(params): Json<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        workspace_id = %workspace_id,
        query_chars = params.query.chars().count(),
        top_k = ?params.top_k,
        "Received search request"
    );

    let response = state
        .engine
        .search(&workspace_id, &params.query, params.top_k)
        .await?;
    let documents = state
        .engine
        .search_sources(&workspace_id, &response.sources)
        .await?;

    Ok(Json(SearchResult {
        response,
        documents,
    }))
}
