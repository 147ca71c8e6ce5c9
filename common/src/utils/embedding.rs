use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackendKind},
};

const AI_WORKER: &str = "ai-worker";
const DEFAULT_DIMENSION: usize = 1024;

/// Vectors for a batch of texts, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
    pub embeddings: Vec<Vec<f32>>,
    pub dimension: usize,
    pub model: Option<String>,
}

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    Remote {
        http: reqwest::Client,
        base_url: String,
    },
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
}

#[derive(Serialize)]
struct EmbedDocumentsRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedDocumentsResponse {
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    dim: Option<usize>,
}

#[derive(Serialize)]
struct EmbedQueryRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedQueryResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct AiWorkerError {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

impl EmbeddingProvider {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackendKind::Remote => Self::new_remote(
                &config.ai_worker_url,
                Duration::from_secs(config.request_timeout_secs),
            ),
            EmbeddingBackendKind::OpenAI => {
                let api_key = config.openai_api_key.clone().ok_or_else(|| {
                    AppError::Validation("openai_api_key is required for the openai backend".into())
                })?;
                let client = Client::with_config(
                    OpenAIConfig::new()
                        .with_api_key(api_key)
                        .with_api_base(&config.openai_base_url),
                );
                Ok(Self::new_openai(
                    Arc::new(client),
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                ))
            }
            EmbeddingBackendKind::Hashed => {
                Ok(Self::new_hashed(config.embedding_dimensions as usize))
            }
        }
    }

    pub fn new_remote(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: EmbeddingInner::Remote {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
            },
        })
    }

    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        Self {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        }
    }

    /// Deterministic token-bucket vectors, for tests and offline use.
    pub fn new_hashed(dimension: usize) -> Self {
        Self {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Remote { .. } => "remote",
            EmbeddingInner::OpenAI { .. } => "openai",
            EmbeddingInner::Hashed { .. } => "hashed",
        }
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, AppError> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(EmbeddingBatch {
                embeddings: texts
                    .iter()
                    .map(|text| hashed_embedding(text, *dimension))
                    .collect(),
                dimension: *dimension,
                model: None,
            }),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                if texts.is_empty() {
                    return Ok(EmbeddingBatch {
                        embeddings: Vec::new(),
                        dimension: *dimensions as usize,
                        model: Some(model.clone()),
                    });
                }
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts.to_vec())
                    .dimensions(*dimensions)
                    .build()?;
                let response = client.embeddings().create(request).await?;

                Ok(EmbeddingBatch {
                    embeddings: response.data.into_iter().map(|item| item.embedding).collect(),
                    dimension: *dimensions as usize,
                    model: Some(model.clone()),
                })
            }
            EmbeddingInner::Remote { http, base_url } => {
                let response = http
                    .post(format!("{base_url}/api/v1/embed"))
                    .json(&EmbedDocumentsRequest { texts })
                    .send()
                    .await?;
                let response = check_ai_worker(response).await?;
                let body: EmbedDocumentsResponse = response.json().await?;

                let dimension = body
                    .dim
                    .or_else(|| body.embeddings.first().map(Vec::len))
                    .unwrap_or(DEFAULT_DIMENSION);
                debug!(count = body.embeddings.len(), dimension, "Received embeddings");

                Ok(EmbeddingBatch {
                    embeddings: body.embeddings,
                    dimension,
                    model: body.model,
                })
            }
        }
    }

    /// Embeds a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let embedding = match &self.inner {
            EmbeddingInner::Hashed { dimension } => hashed_embedding(text, *dimension),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .dimensions(*dimensions)
                    .build()?;
                let response = client.embeddings().create(request).await?;
                response
                    .data
                    .into_iter()
                    .next()
                    .map(|item| item.embedding)
                    .unwrap_or_default()
            }
            EmbeddingInner::Remote { http, base_url } => {
                let response = http
                    .post(format!("{base_url}/api/v1/embed/query"))
                    .json(&EmbedQueryRequest { text })
                    .send()
                    .await?;
                let response = check_ai_worker(response).await?;
                let body: EmbedQueryResponse = response.json().await?;
                body.embedding
            }
        };

        if embedding.is_empty() {
            return Err(anyhow!("embedding provider returned no vector for query").into());
        }
        Ok(embedding)
    }
}

async fn check_ai_worker(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<AiWorkerError>(&body) {
        Ok(err) => match err.details {
            Some(details) => format!("{} - {} ({details})", err.code, err.message),
            None => format!("{} - {}", err.code, err.message),
        },
        Err(_) => format!("returned status {}", status.as_u16()),
    };
    warn!(provider = AI_WORKER, status = status.as_u16(), %message, "Embedding request failed");
    Err(AppError::upstream(AI_WORKER, Some(status.as_u16()), message))
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];

    for token in tokens(text) {
        if let Some(slot) = vector.get_mut(bucket(&token, dim)) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() % dimension as u64) as usize
}
