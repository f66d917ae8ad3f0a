//! Common types for model invocation

use serde::{Deserialize, Serialize};

/// Sampling parameters for one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub top_k: Option<u32>,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 256,
            top_p: 0.9,
            top_k: None,
            repeat_penalty: 1.1,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            stop: Vec::new(),
        }
    }
}

/// Per-call adjustments layered on top of a descriptor's defaults
#[derive(Debug, Clone, Default)]
pub struct ParamOverrides {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ParamOverrides {
    pub fn apply(&self, base: &GenerationParams) -> GenerationParams {
        let mut params = base.clone();
        if let Some(t) = self.temperature {
            params.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            params.max_tokens = m;
        }
        params
    }
}

/// Which serving process hosts the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Ollama,
    LlamaServer,
}

impl BackendKind {
    pub fn display_name(self) -> &'static str {
        match self {
            BackendKind::Ollama => "Ollama",
            BackendKind::LlamaServer => "llama.cpp server",
        }
    }
}

/// Prompt template family a model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptFormat {
    /// `<|start_header_id|>` chat headers
    Llama3,
    /// `[INST] ... [/INST]`
    Llama2Inst,
    /// Plain Korean dialogue lines, for base models without a chat template
    Plain,
}

impl PromptFormat {
    /// Render a single-turn prompt. `context` is an authoritative reference
    /// answer the model must stay faithful to.
    pub fn render(self, system: &str, context: Option<&str>, utterance: &str) -> String {
        match self {
            PromptFormat::Llama3 => {
                let mut system_block = system.to_string();
                if let Some(ctx) = context {
                    system_block.push_str("\n\n[참고 답변]\n");
                    system_block.push_str(ctx);
                }
                format!(
                    "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{system_block}<|eot_id|>\
                     <|start_header_id|>user<|end_header_id|>\n\n{utterance}<|eot_id|>\
                     <|start_header_id|>assistant<|end_header_id|>\n\n"
                )
            }
            PromptFormat::Llama2Inst => match context {
                Some(ctx) => format!(
                    "<s>[INST] <<SYS>>\n{system}\n<</SYS>>\n\n{utterance}\n\n참고자료: {ctx}\n\n위 참고자료를 바탕으로 답변해주세요. [/INST]"
                ),
                None => format!("<s>[INST] <<SYS>>\n{system}\n<</SYS>>\n\n{utterance} [/INST]"),
            },
            PromptFormat::Plain => match context {
                Some(ctx) => format!(
                    "{system}\n\n사용자 질문: {utterance}\n\n참고 답변: {ctx}\n\n위 답변을 친절하고 이해하기 쉽게 정리해주세요:\n상담사:"
                ),
                None => format!("{system}\n\n사용자: {utterance}\n상담사:"),
            },
        }
    }

    /// Stop markers that end a turn in this format
    pub fn stop_markers(self) -> &'static [&'static str] {
        match self {
            PromptFormat::Llama3 => &["<|eot_id|>", "<|start_header_id|>"],
            PromptFormat::Llama2Inst => &["[INST]", "</s>"],
            PromptFormat::Plain => &["사용자:", "\n\n\n"],
        }
    }
}

/// Lifecycle of a loaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Error { message: String },
}

impl LoadState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready)
    }
}

/// Static description of a servable model
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub backend: BackendKind,
    /// Name the serving process knows the model by
    pub backend_model: String,
    pub prompt_format: PromptFormat,
    pub description: String,
    pub defaults: GenerationParams,
}
