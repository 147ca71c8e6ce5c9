use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chat::Chat,
            document_chunk::DocumentChunk,
            message::{DocumentReference, Message},
        },
        vector_index::{collection_name, DynVectorIndex},
    },
    utils::{embedding::EmbeddingProvider, generation::Generator},
};

use crate::{
    config::RetrievalConfig,
    context::{
        build_context, build_prompt, preview, RetrievedChunk, CHAT_FALLBACK_ANSWER,
        NO_RESULTS_ANSWER,
    },
    sources::{group_sources, SourcesResponse},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchSource {
    pub document_id: String,
    pub chunk_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub answer: String,
    pub sources: Vec<SearchSource>,
}

/// The persisted messages of one chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub user_message: Message,
    pub assistant_message: Message,
}

/// Embeds a question, finds the nearest chunks of a workspace and asks the generator for an
/// answer grounded in them.
pub struct RetrievalEngine {
    db: Arc<SurrealDbClient>,
    embedding_provider: Arc<EmbeddingProvider>,
    vector_index: DynVectorIndex,
    generator: Arc<dyn Generator>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedding_provider: Arc<EmbeddingProvider>,
        vector_index: DynVectorIndex,
        generator: Arc<dyn Generator>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            db,
            embedding_provider,
            vector_index,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Nearest chunks for `query`, best first.
    ///
    /// Chunk text comes from the chunk table; the payload excerpt is only used when the row
    /// cannot be found.
    #[instrument(skip_all, fields(workspace_id = %workspace_id, top_k))]
    pub async fn retrieve(
        &self,
        workspace_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, AppError> {
        let vector = self.embedding_provider.embed_query(query).await?;
        if vector.is_empty() {
            return Err(AppError::DataIntegrity(
                "embedding provider returned no query vector".into(),
            ));
        }

        let collection = collection_name(workspace_id);
        let limit = top_k.clamp(1, self.config.max_top_k);
        let hits = self.vector_index.search(&collection, &vector, limit).await?;
        if hits.is_empty() {
            debug!(collection = %collection, "no vector hits");
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|hit| hit.id.clone()).collect();
        let rows: HashMap<String, DocumentChunk> = DocumentChunk::get_by_ids(&ids, &self.db)
            .await?
            .into_iter()
            .filter(|chunk| chunk.workspace_id == workspace_id)
            .map(|chunk| (chunk.id.clone(), chunk))
            .collect();

        let mut resolved = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(chunk) = rows.get(&hit.id) {
                resolved.push(RetrievedChunk {
                    chunk_id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    chunk_index: chunk.chunk_index,
                    page_number: known_page(chunk.page_number),
                    content: chunk.content.clone(),
                    score: hit.score,
                });
            } else if let Some(payload) = hit.payload {
                debug!(point_id = %hit.id, "chunk row missing, using payload excerpt");
                resolved.push(RetrievedChunk {
                    chunk_id: hit.id,
                    document_id: payload.document_id,
                    chunk_index: payload.chunk_index,
                    page_number: known_page(payload.page_number),
                    content: payload.text,
                    score: hit.score,
                });
            } else {
                warn!(point_id = %hit.id, "dropping search hit without chunk or payload");
            }
        }

        resolved.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(resolved)
    }

    /// Single-shot question answering. Generation errors are returned to the caller.
    #[instrument(skip_all, fields(workspace_id = %workspace_id))]
    pub async fn search(
        &self,
        workspace_id: &str,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<SearchResponse, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation("query is required".into()));
        }

        let top_k = top_k.unwrap_or(self.config.search_top_k);
        let hits = self.retrieve(workspace_id, query, top_k).await?;
        if hits.is_empty() {
            return Ok(SearchResponse {
                answer: NO_RESULTS_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let prompt = build_prompt(&build_context(&hits), query);
        let answer = self.generator.generate(&prompt).await?;

        info!(workspace_id, hits = hits.len(), "search answered");

        Ok(SearchResponse {
            answer,
            sources: hits
                .into_iter()
                .map(|hit| SearchSource {
                    document_id: hit.document_id,
                    chunk_index: hit.chunk_index,
                    page_number: hit.page_number,
                    content: hit.content,
                    score: hit.score,
                })
                .collect(),
        })
    }

    /// Answers a chat message and stores the user and assistant messages as one turn.
    /// A failed retrieval or generation is replaced by a fixed apology so the transcript
    /// stays usable.
    #[instrument(skip_all, fields(workspace_id = %workspace_id, chat_id = %chat_id))]
    pub async fn respond(
        &self,
        workspace_id: &str,
        chat_id: &str,
        user_text: &str,
    ) -> Result<ChatTurn, AppError> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(AppError::Validation("message content is required".into()));
        }
        let chat = Chat::get_in_workspace(chat_id, workspace_id, &self.db).await?;

        let (answer, hits) = match self
            .retrieve(workspace_id, user_text, self.config.chat_top_k)
            .await
        {
            Ok(hits) if hits.is_empty() => (NO_RESULTS_ANSWER.to_string(), hits),
            Ok(hits) => {
                let prompt = build_prompt(&build_context(&hits), user_text);
                match self.generator.generate(&prompt).await {
                    Ok(answer) => (answer, hits),
                    Err(err) => {
                        warn!(chat_id = %chat.id, error = %err, "generation failed, using fallback answer");
                        (CHAT_FALLBACK_ANSWER.to_string(), hits)
                    }
                }
            }
            Err(err) => {
                warn!(chat_id = %chat.id, error = %err, "retrieval failed, using fallback answer");
                (CHAT_FALLBACK_ANSWER.to_string(), Vec::new())
            }
        };

        let references: Vec<DocumentReference> = hits
            .iter()
            .map(|hit| DocumentReference {
                document_id: hit.document_id.clone(),
                chunk_index: hit.chunk_index,
                page_number: hit.page_number,
                score: hit.score,
                content_preview: preview(&hit.content, self.config.preview_chars),
            })
            .collect();

        let (user_message, assistant_message) =
            Message::append_turn(&chat.id, user_text, &answer, references, &self.db).await?;

        info!(
            chat_id = %chat.id,
            message_index = assistant_message.message_index,
            references = assistant_message.document_refs.len(),
            "chat turn stored"
        );

        Ok(ChatTurn {
            user_message,
            assistant_message,
        })
    }

    pub async fn chat_history(
        &self,
        workspace_id: &str,
        chat_id: &str,
    ) -> Result<Vec<Message>, AppError> {
        let chat = Chat::get_in_workspace(chat_id, workspace_id, &self.db).await?;
        Message::list_for_chat(&chat.id, &self.db).await
    }

    /// Sources behind one assistant message, grouped by document.
    pub async fn message_sources(
        &self,
        workspace_id: &str,
        chat_id: &str,
        message_id: &str,
    ) -> Result<SourcesResponse, AppError> {
        let chat = Chat::get_in_workspace(chat_id, workspace_id, &self.db).await?;
        let message = self
            .db
            .get_item::<Message>(message_id)
            .await?
            .filter(|message| message.chat_id == chat.id)
            .ok_or_else(|| AppError::NotFound(format!("message {message_id} not found")))?;

        group_sources(workspace_id, &message.document_refs, &self.db).await
    }

    /// Groups search sources the same way chat references are grouped.
    pub async fn search_sources(
        &self,
        workspace_id: &str,
        sources: &[SearchSource],
    ) -> Result<SourcesResponse, AppError> {
        let references: Vec<DocumentReference> = sources
            .iter()
            .map(|source| DocumentReference {
                document_id: source.document_id.clone(),
                chunk_index: source.chunk_index,
                page_number: source.page_number,
                score: source.score,
                content_preview: preview(&source.content, self.config.preview_chars),
            })
            .collect();
        group_sources(workspace_id, &references, &self.db).await
    }
}

fn known_page(page_number: u32) -> Option<u32> {
    (page_number > 0).then_some(page_number)
}
