//! Groups chunk references by source document for attribution.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{document::Document, message::DocumentReference},
    },
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkSource {
    pub chunk_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub content_preview: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSources {
    pub document_id: String,
    pub document_name: String,
    pub referenced_pages: Vec<u32>,
    pub chunks: Vec<ChunkSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcesResponse {
    pub sources: Vec<DocumentSources>,
    pub total_documents: usize,
    pub total_chunks: usize,
}

/// Pure grouping step. References to documents missing from `names` are dropped.
pub fn group_references(
    references: &[DocumentReference],
    names: &HashMap<String, String>,
) -> Vec<DocumentSources> {
    let mut grouped: HashMap<&str, (BTreeSet<u32>, Vec<ChunkSource>)> = HashMap::new();

    for reference in references {
        let entry = grouped.entry(reference.document_id.as_str()).or_default();
        if let Some(page) = reference.page_number {
            entry.0.insert(page);
        }
        entry.1.push(ChunkSource {
            chunk_index: reference.chunk_index,
            page_number: reference.page_number,
            content_preview: reference.content_preview.clone(),
            score: reference.score,
        });
    }

    let mut sources: Vec<DocumentSources> = grouped
        .into_iter()
        .filter_map(|(document_id, (pages, mut chunks))| {
            let name = names.get(document_id)?;
            chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
            Some(DocumentSources {
                document_id: document_id.to_string(),
                document_name: name.clone(),
                referenced_pages: pages.into_iter().collect(),
                chunks,
            })
        })
        .collect();

    sources.sort_by(|a, b| {
        a.document_name
            .cmp(&b.document_name)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    sources
}

/// Resolves document names within the workspace and groups the references.
pub async fn group_sources(
    workspace_id: &str,
    references: &[DocumentReference],
    db: &SurrealDbClient,
) -> Result<SourcesResponse, AppError> {
    if references.is_empty() {
        return Ok(SourcesResponse {
            sources: Vec::new(),
            total_documents: 0,
            total_chunks: 0,
        });
    }

    let mut ids: Vec<String> = references
        .iter()
        .map(|reference| reference.document_id.clone())
        .collect();
    ids.sort();
    ids.dedup();

    let names: HashMap<String, String> = Document::get_by_ids(&ids, db)
        .await?
        .into_iter()
        .filter(|document| document.workspace_id == workspace_id)
        .map(|document| (document.id, document.name))
        .collect();

    let sources = group_references(references, &names);
    Ok(SourcesResponse {
        total_documents: sources.len(),
        total_chunks: references.len(),
        sources,
    })
}
