pub mod config;
pub mod context;
pub mod engine;
pub mod sources;

pub use config::RetrievalConfig;
pub use context::{RetrievedChunk, CHAT_FALLBACK_ANSWER, NO_RESULTS_ANSWER};
pub use engine::{ChatTurn, RetrievalEngine, SearchResponse, SearchSource};
pub use sources::{group_references, group_sources, DocumentSources, SourcesResponse};
