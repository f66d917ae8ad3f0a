//! Built-in model definitions
//!
//! Every servable model lives in this one table: which server hosts it, the
//! prompt template it expects, and the sampling defaults it was tuned with.

use super::types::{BackendKind, GenerationParams, ModelDescriptor, PromptFormat};
use super::{LlamaServerBackend, LlmConfig, ModelBackend, OllamaBackend};
use std::sync::Arc;

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "llama-3.1-8b")
    pub id: &'static str,
    pub backend: BackendKind,
    /// Name the serving process knows the model by
    pub backend_model: &'static str,
    pub prompt_format: PromptFormat,
    /// Human-readable description
    pub description: &'static str,
    pub defaults: fn() -> GenerationParams,
    /// Factory function to create the backend
    pub factory: fn(&ModelDef, &LlmConfig) -> Arc<dyn ModelBackend>,
}

impl ModelDef {
    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            id: self.id.to_string(),
            backend: self.backend,
            backend_model: self.backend_model.to_string(),
            prompt_format: self.prompt_format,
            description: self.description.to_string(),
            defaults: (self.defaults)(),
        }
    }
}

fn ollama_factory(def: &ModelDef, config: &LlmConfig) -> Arc<dyn ModelBackend> {
    Arc::new(OllamaBackend::new(
        &config.ollama_url,
        def.id,
        def.backend_model,
    ))
}

fn llama_server_factory(def: &ModelDef, config: &LlmConfig) -> Arc<dyn ModelBackend> {
    Arc::new(LlamaServerBackend::new(&config.llama_server_url, def.id))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "llama-3.1-8b",
            backend: BackendKind::Ollama,
            backend_model: "llama3.1:8b",
            prompt_format: PromptFormat::Llama3,
            description: "Llama 3.1 8B Instruct via Ollama (default)",
            defaults: || GenerationParams {
                temperature: 0.6,
                max_tokens: 256,
                top_p: 0.8,
                top_k: None,
                repeat_penalty: 1.1,
                presence_penalty: 0.0,
                frequency_penalty: 0.0,
                stop: vec!["<|eot_id|>".to_string()],
            },
            factory: ollama_factory,
        },
        ModelDef {
            id: "polyglot-ko-5.8b",
            backend: BackendKind::LlamaServer,
            backend_model: "polyglot-ko-5.8b.gguf",
            prompt_format: PromptFormat::Plain,
            description: "Polyglot-Ko 5.8B, Korean base model",
            defaults: || GenerationParams {
                temperature: 0.7,
                max_tokens: 128,
                top_p: 0.9,
                top_k: None,
                repeat_penalty: 1.1,
                presence_penalty: 0.0,
                frequency_penalty: 0.0,
                stop: vec!["사용자:".to_string()],
            },
            factory: llama_server_factory,
        },
        ModelDef {
            id: "llama-2-7b-chat",
            backend: BackendKind::LlamaServer,
            backend_model: "llama-2-7b-chat.Q4_K_M.gguf",
            prompt_format: PromptFormat::Llama2Inst,
            description: "Llama 2 7B Chat (GGUF)",
            defaults: || GenerationParams {
                temperature: 0.6,
                max_tokens: 256,
                top_p: 0.9,
                top_k: Some(50),
                repeat_penalty: 1.1,
                presence_penalty: 0.0,
                frequency_penalty: 0.0,
                stop: vec!["[INST]".to_string(), "</s>".to_string()],
            },
            factory: llama_server_factory,
        },
    ]
}
