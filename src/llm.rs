//! Model backend abstraction
//!
//! Local inference servers (Ollama, llama.cpp) behind one load/unload/generate
//! interface, plus the manager that owns which one is active.

mod error;
mod llama_server;
mod manager;
mod models;
mod ollama;
mod types;

#[cfg(test)]
pub mod testing;

pub use error::{LlmError, LlmErrorKind};
pub use llama_server::LlamaServerBackend;
pub use manager::{Invocation, ModelManager, ModelStatus, ModelSummary};
pub use models::{all_models, ModelDef};
pub use ollama::OllamaBackend;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Configuration for model backends
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Ollama base URL (e.g., `http://localhost:11434`)
    pub ollama_url: String,
    /// llama.cpp server base URL (e.g., `http://localhost:8080`)
    pub llama_server_url: String,
    /// Model activated at startup
    pub default_model: Option<String>,
    /// Ollama embedding model; embeddings are disabled when unset
    pub embedding_model: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            llama_server_url: "http://localhost:8080".to_string(),
            default_model: None,
            embedding_model: None,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ollama_url: std::env::var("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            llama_server_url: std::env::var("LLAMA_SERVER_URL")
                .unwrap_or(defaults.llama_server_url),
            default_model: std::env::var("DEFAULT_MODEL").ok(),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .ok()
                .filter(|m| !m.is_empty()),
        }
    }
}

/// Common interface for inference servers
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Bring the model's weights into memory
    async fn load(&self) -> Result<(), LlmError>;

    /// Release the model's weights
    async fn unload(&self) -> Result<(), LlmError>;

    /// Run one completion over a fully rendered prompt
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError>;

    /// Descriptor id this backend serves
    fn model_id(&self) -> &str;
}

/// Logging wrapper for model backends
pub struct LoggingBackend {
    inner: Arc<dyn ModelBackend>,
    model_id: String,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn ModelBackend>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ModelBackend for LoggingBackend {
    async fn load(&self) -> Result<(), LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.load().await;
        let duration = start.elapsed();

        match &result {
            Ok(()) => tracing::info!(
                model = %self.model_id,
                duration_ms = %duration.as_millis(),
                "Model loaded"
            ),
            Err(e) => tracing::error!(
                model = %self.model_id,
                duration_ms = %duration.as_millis(),
                error = %e.message,
                "Model load failed"
            ),
        }
        result
    }

    async fn unload(&self) -> Result<(), LlmError> {
        let result = self.inner.unload().await;
        if let Err(e) = &result {
            tracing::warn!(model = %self.model_id, error = %e.message, "Model unload failed");
        } else {
            tracing::info!(model = %self.model_id, "Model unloaded");
        }
        result
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.generate(prompt, params).await;
        let duration = start.elapsed();

        match &result {
            Ok(text) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    prompt_chars = prompt.chars().count(),
                    output_chars = text.chars().count(),
                    temperature = params.temperature,
                    "Generation completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Generation failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
