//! Ollama backend

use super::types::GenerationParams;
use super::{LlmError, ModelBackend};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long Ollama keeps weights resident between requests
const KEEP_ALIVE: &str = "30m";

/// Ollama `/api/generate` client for one model
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model_id: String,
    backend_model: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model_id: &str, backend_model: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
            backend_model: backend_model.to_string(),
        }
    }

    async fn post(&self, request: &OllamaRequest<'_>) -> Result<OllamaResponse, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &body));
        }

        response
            .json::<OllamaResponse>()
            .await
            .map_err(|e| LlmError::from_reqwest(&e))
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn load(&self) -> Result<(), LlmError> {
        // An empty prompt makes Ollama load the weights and return immediately.
        let request = OllamaRequest {
            model: &self.backend_model,
            prompt: None,
            raw: false,
            stream: false,
            keep_alive: KeepAlive::Duration(KEEP_ALIVE),
            options: None,
        };
        self.post(&request)
            .await
            .map(|_| ())
            .map_err(|e| LlmError::load_failed(format!("{}: {}", self.backend_model, e.message)))
    }

    async fn unload(&self) -> Result<(), LlmError> {
        let request = OllamaRequest {
            model: &self.backend_model,
            prompt: None,
            raw: false,
            stream: false,
            keep_alive: KeepAlive::Seconds(0),
            options: None,
        };
        self.post(&request).await.map(|_| ())
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let request = OllamaRequest {
            model: &self.backend_model,
            prompt: Some(prompt),
            raw: true,
            stream: false,
            keep_alive: KeepAlive::Duration(KEEP_ALIVE),
            options: Some(OllamaOptions::from(params)),
        };
        let response = self.post(&request).await?;
        if !response.done {
            return Err(LlmError::server_error("Ollama returned an unfinished response"));
        }
        Ok(response.response)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    raw: bool,
    stream: bool,
    keep_alive: KeepAlive,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum KeepAlive {
    Duration(&'static str),
    Seconds(u32),
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    repeat_penalty: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

impl From<&GenerationParams> for OllamaOptions {
    fn from(p: &GenerationParams) -> Self {
        Self {
            temperature: p.temperature,
            top_p: p.top_p,
            top_k: p.top_k,
            repeat_penalty: p.repeat_penalty,
            presence_penalty: p.presence_penalty,
            frequency_penalty: p.frequency_penalty,
            num_predict: p.max_tokens,
            stop: p.stop.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}
