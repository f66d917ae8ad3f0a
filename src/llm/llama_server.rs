//! llama.cpp server backend
//!
//! The server process owns exactly one set of GGUF weights, so `load` only
//! waits for it to report healthy and `unload` releases our claim on it.

use super::types::GenerationParams;
use super::{LlmError, ModelBackend};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct LlamaServerBackend {
    client: Client,
    base_url: String,
    model_id: String,
    claimed: AtomicBool,
}

impl LlamaServerBackend {
    pub fn new(base_url: &str, model_id: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
            claimed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ModelBackend for LlamaServerBackend {
    async fn load(&self) -> Result<(), LlmError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LlmError::load_failed(format!("llama.cpp server unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // 503 while the server is still reading weights
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::load_failed(format!(
                "llama.cpp server not healthy ({status}): {body}"
            )));
        }

        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| LlmError::load_failed(format!("bad health response: {e}")))?;
        if health.status != "ok" {
            return Err(LlmError::load_failed(format!(
                "llama.cpp server status: {}",
                health.status
            )));
        }

        self.claimed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) -> Result<(), LlmError> {
        self.claimed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        if !self.claimed.load(Ordering::SeqCst) {
            return Err(LlmError::not_ready(&self.model_id));
        }

        let url = format!("{}/completion", self.base_url);
        let request = CompletionRequest::new(prompt, params);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &body));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(&e))?;
        Ok(completion.content)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// llama.cpp API types

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    repeat_penalty: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    stop: &'a [String],
    cache_prompt: bool,
    stream: bool,
}

impl<'a> CompletionRequest<'a> {
    fn new(prompt: &'a str, params: &'a GenerationParams) -> Self {
        Self {
            prompt,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            repeat_penalty: params.repeat_penalty,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            stop: &params.stop,
            cache_prompt: true,
            stream: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_request_maps_params() {
        let params = GenerationParams {
            max_tokens: 64,
            top_k: Some(50),
            stop: vec!["</s>".into()],
            ..GenerationParams::default()
        };
        let json = serde_json::to_value(CompletionRequest::new("[INST] hi [/INST]", &params)).unwrap();
        assert_eq!(json["n_predict"], 64);
        assert_eq!(json["top_k"], 50);
        assert_eq!(json["stop"][0], "</s>");
        assert_eq!(json["stream"], false);
    }

    #[tokio::test]
    async fn generate_before_load_is_not_ready() {
        let backend = LlamaServerBackend::new("http://127.0.0.1:9", "llama-2-7b-chat");
        let err = backend
            .generate("hi", &GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, super::super::LlmErrorKind::NotReady);
    }
}
