//! Context block and prompt assembly for grounded generation.

use serde::Serialize;

pub const NO_RESULTS_ANSWER: &str =
    "Sorry, no relevant information was found in the documents of this workspace.";

pub const CHAT_FALLBACK_ANSWER: &str =
    "Sorry, an error occurred while generating the response. Please contact your system administrator.";

const GROUNDING_INSTRUCTIONS: &str = "You are an assistant that answers accurately based on the provided material.
Follow these rules:
1. Answer using only the content of the provided material.
2. If the material does not contain the answer, reply \"The material does not contain this information.\"
3. Do not speculate or answer from general knowledge.
4. Keep the answer concise and accurate.";

/// A search hit resolved to its chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: u32,
    /// `None` when the hit carried no page information.
    pub page_number: Option<u32>,
    pub content: String,
    pub score: f32,
}

/// Numbers the hits from 1 in the given order, tagging each with its page when known.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| {
            let page = chunk
                .page_number
                .map(|page| format!(" [P.{page}]"))
                .unwrap_or_default();
            format!(
                "--- Document {}{page} (Score: {:.3}) ---\n{}",
                position + 1,
                chunk.score,
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "{GROUNDING_INSTRUCTIONS}\n\nReference material:\n{context}\n\nUser question: {question}\n\nAnswer:"
    )
}

/// First `max_chars` code points of `text`.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
