use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Upstream error from {provider} (status {status:?}): {message}")]
    Upstream {
        provider: &'static str,
        status: Option<u16>,
        message: String,
    },
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn document_not_found(document_id: &str) -> Self {
        Self::NotFound(format!("document {document_id} not found"))
    }

    pub fn already_processing(document_id: &str) -> Self {
        Self::Conflict(format!("document {document_id} is already processing"))
    }

    pub fn embedding_count_mismatch(got: usize, expected: usize) -> Self {
        Self::DataIntegrity(format!(
            "embedding count mismatch: got {got}, expected {expected}"
        ))
    }

    pub fn upstream(provider: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider,
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_constructors() {
        let err = AppError::embedding_count_mismatch(2, 3);
        assert!(matches!(err, AppError::DataIntegrity(_)));
        assert_eq!(
            err.to_string(),
            "Data integrity error: embedding count mismatch: got 2, expected 3"
        );

        assert!(matches!(
            AppError::already_processing("doc-1"),
            AppError::Conflict(msg) if msg.contains("doc-1")
        ));
        assert!(matches!(
            AppError::document_not_found("doc-2"),
            AppError::NotFound(_)
        ));

        let upstream = AppError::upstream("qdrant", Some(503), "unavailable");
        assert_eq!(
            upstream.to_string(),
            "Upstream error from qdrant (status Some(503)): unavailable"
        );
    }
}
