use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{error::AppError, utils::config::AppConfig};

const PROVIDER: &str = "ollama";

/// Text generation behind a single prompt call.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AppError>;
}

/// Client for an Ollama compatible local inference server.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Deserialize)]
struct PullProgress {
    #[serde(default)]
    status: String,
    #[serde(default)]
    completed: u64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    error: Option<String>,
}

impl PullProgress {
    fn render(&self) -> String {
        if self.total > 0 {
            let percentage = self.completed as f64 / self.total as f64 * 100.0;
            format!("{} ({percentage:.1}%)", self.status)
        } else {
            self.status.clone()
        }
    }
}

pub struct WarmupOptions {
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub auto_pull: bool,
}

impl Default for WarmupOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            auto_pull: false,
        }
    }
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            &config.ollama_url,
            &config.ollama_model,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn upstream_error(response: reqwest::Response, action: &str) -> AppError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(provider = PROVIDER, status, action, "Generation provider call failed");
        AppError::upstream(PROVIDER, Some(status), format!("{action} failed: {body}"))
    }

    pub async fn list_models(&self) -> Result<Vec<String>, AppError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response, "model listing").await);
        }
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    pub async fn model_exists(&self) -> Result<bool, AppError> {
        Ok(self.list_models().await?.iter().any(|name| name == &self.model))
    }

    /// Pulls the configured model, logging progress whenever the rendered status changes.
    pub async fn pull_model(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        info!(model = %self.model, "Pulling model, this may take a few minutes");
        let mut response = self
            .http
            .post(format!("{}/api/pull", self.base_url))
            .timeout(Duration::from_secs(60 * 60))
            .json(&serde_json::json!({ "name": self.model }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response, "model pull").await);
        }

        let mut buffer: Vec<u8> = Vec::new();
        let mut last_status = String::new();
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    return Err(AppError::Cancelled("model pull cancelled".into()));
                }
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                handle_pull_line(&line, &mut last_status)?;
            }
        }
        if !buffer.is_empty() {
            handle_pull_line(&buffer, &mut last_status)?;
        }

        info!(model = %self.model, "Model pulled");
        Ok(())
    }

    /// Polls the tags endpoint until the server answers or the timeout elapses.
    pub async fn wait_for_ready(
        &self,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled("waiting for generation provider".into()));
            }

            match self
                .http
                .get(format!("{}/api/tags", self.base_url))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    info!(url = %self.base_url, "Generation provider is ready");
                    return Ok(());
                }
                Ok(response) => {
                    info!(status = response.status().as_u16(), "Waiting for generation provider");
                }
                Err(err) => info!(error = %err, "Waiting for generation provider"),
            }

            tokio::select! {
                () = sleep(poll_interval) => {}
                () = cancel.cancelled() => {
                    return Err(AppError::Cancelled("waiting for generation provider".into()));
                }
            }
        }

        Err(AppError::upstream(
            PROVIDER,
            None,
            format!("timeout waiting for provider (waited {}s)", timeout.as_secs()),
        ))
    }

    /// Readiness wait, model check (and optional pull), then one throwaway generation that
    /// loads the model into memory.
    pub async fn warm_up(
        &self,
        options: &WarmupOptions,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        info!(model = %self.model, "Starting generation provider warm-up");
        self.wait_for_ready(options.ready_timeout, options.poll_interval, cancel)
            .await?;

        if self.model_exists().await? {
            info!(model = %self.model, "Model already present");
        } else {
            warn!(model = %self.model, "Model not found");
            if !options.auto_pull {
                return Err(AppError::Validation(format!(
                    "model '{0}' not found. Run 'ollama pull {0}' first, or set ollama_auto_pull=true",
                    self.model
                )));
            }
            self.pull_model(cancel).await?;
        }

        info!(model = %self.model, "Loading model into memory");
        self.generate("warmup").await?;
        info!(model = %self.model, "Warm-up complete");
        Ok(())
    }
}

fn handle_pull_line(line: &[u8], last_status: &mut String) -> Result<(), AppError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }

    let progress: PullProgress = serde_json::from_str(text)?;
    if let Some(error) = progress.error {
        return Err(AppError::upstream(PROVIDER, None, format!("model pull failed: {error}")));
    }

    let rendered = progress.render();
    if rendered != *last_status {
        info!(status = %rendered, "Model pull progress");
        *last_status = rendered;
    }
    Ok(())
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, AppError> {
        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response, "generation").await);
        }

        let body: GenerateResponse = response.json().await?;
        Ok(body.response)
    }
}
