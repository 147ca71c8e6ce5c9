use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorIndexKind {
    Qdrant,
    Memory,
}

fn default_vector_index_kind() -> VectorIndexKind {
    VectorIndexKind::Qdrant
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    Remote,
    OpenAI,
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackendKind {
    EmbeddingBackendKind::Remote
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,
    #[serde(default = "default_vector_index_kind")]
    pub vector_index: VectorIndexKind,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default = "default_ai_worker_url")]
    pub ai_worker_url: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
    #[serde(default)]
    pub ollama_auto_pull: bool,
    #[serde(default = "default_true")]
    pub ollama_warmup: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: i64,
    #[serde(default = "default_top_k")]
    pub search_top_k: usize,
    #[serde(default = "default_top_k")]
    pub chat_top_k: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_storage_bucket() -> String {
    "documents".to_string()
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_ai_worker_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1024
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "phi3:mini".to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> i64 {
    500
}

fn default_chunk_overlap() -> i64 {
    50
}

fn default_top_k() -> usize {
    5
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_maintenance_interval_secs() -> u64 {
    60 * 60
}

fn default_request_timeout_secs() -> u64 {
    180
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "ws://localhost:8000".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "docs".to_string(),
            surrealdb_database: "docs".to_string(),
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            storage: default_storage_kind(),
            storage_bucket: default_storage_bucket(),
            vector_index: default_vector_index_kind(),
            qdrant_url: default_qdrant_url(),
            qdrant_api_key: None,
            embedding_backend: default_embedding_backend(),
            ai_worker_url: default_ai_worker_url(),
            openai_api_key: None,
            openai_base_url: default_base_url(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            ollama_url: default_ollama_url(),
            ollama_model: default_ollama_model(),
            ollama_auto_pull: false,
            ollama_warmup: true,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            search_top_k: default_top_k(),
            chat_top_k: default_top_k(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_keys() {
        let config = Config::builder()
            .set_override("surrealdb_address", "mem://")
            .and_then(|b| b.set_override("surrealdb_username", "root"))
            .and_then(|b| b.set_override("surrealdb_password", "root"))
            .and_then(|b| b.set_override("surrealdb_namespace", "ns"))
            .and_then(|b| b.set_override("surrealdb_database", "db"))
            .and_then(|b| b.set_override("vector_index", "memory"))
            .expect("overrides")
            .build()
            .expect("build config");

        let app: AppConfig = config.try_deserialize().expect("deserialize");
        assert_eq!(app.http_port, 8080);
        assert_eq!(app.chunk_size, 500);
        assert_eq!(app.chunk_overlap, 50);
        assert_eq!(app.ollama_model, "phi3:mini");
        assert_eq!(app.storage, StorageKind::Local);
        assert_eq!(app.vector_index, VectorIndexKind::Memory);
        assert_eq!(app.embedding_backend, EmbeddingBackendKind::Remote);
        assert!(app.ollama_warmup);
        assert_eq!(app.max_upload_bytes, 100 * 1024 * 1024);
        assert!(!app.ollama_auto_pull);
    }
}
