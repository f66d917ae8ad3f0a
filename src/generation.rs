//! Reply generation
//!
//! Renders a persona prompt in the active model's format, cleans the raw
//! completion, and retries once at a lower temperature when the output is
//! empty or meaningless. A second rejection yields a fixed apology.

use crate::llm::{
    GenerationParams, Invocation, LlmError, LlmErrorKind, ModelDescriptor, ModelManager,
    ParamOverrides,
};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Returned when no acceptable text could be produced
pub const APOLOGY: &str =
    "죄송합니다. 지금은 정확한 답변을 드리기 어렵습니다. 잠시 후 다시 문의해 주세요.";

/// Retry temperature is the original scaled by this, floored at `MIN_RETRY_TEMPERATURE`
const RETRY_TEMPERATURE_SCALE: f32 = 0.5;
const MIN_RETRY_TEMPERATURE: f32 = 0.1;

const SPECIAL_TOKENS: &[&str] = &[
    "<|im_end|>",
    "<|im_start|>",
    "<|endoftext|>",
    "<|begin_of_text|>",
    "<|eot_id|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
    "<s>",
    "</s>",
    "[INST]",
    "[/INST]",
];

const ROLE_PREFIXES: &[&str] = &[
    "답변:",
    "응답:",
    "상담사:",
    "assistant:",
    "Assistant:",
    "AI:",
];

static MEANINGLESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:(?:네|넵|예|응|음|흠|아|어|오|ㅋ|ㅎ|ㅠ|ㅜ|ok|okay|yes|lol|hmm|um)[\s.,!?~…]*)+$",
    )
    .expect("filler pattern is valid")
});

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model not ready: {0}")]
    ModelNotReady(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("model backend failed: {0}")]
    Backend(LlmError),
}

impl From<LlmError> for GenerationError {
    fn from(e: LlmError) -> Self {
        if e.kind == LlmErrorKind::NotReady {
            GenerationError::ModelNotReady(e.message)
        } else {
            GenerationError::Backend(e)
        }
    }
}

/// System instruction set for a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    /// Small talk
    Friendly,
    /// Support answers, optionally grounded in a knowledge entry
    Counselor,
    /// Intent-only classification
    IntentClassifier,
}

impl Persona {
    fn system_prompt(self, company: &str) -> String {
        match self {
            Persona::Friendly => format!(
                "당신은 {company}의 친절한 AI 상담사입니다. 고객의 인사나 일상적인 말에 \
                 한두 문장으로 자연스럽고 따뜻하게 한국어로 답하세요."
            ),
            Persona::Counselor => format!(
                "당신은 {company}의 고객지원 AI 상담사입니다. [참고 답변]이 주어지면 그 내용이 \
                 정확한 정답입니다. 내용을 바꾸거나 새로운 절차를 지어내지 말고, 고객이 이해하기 \
                 쉽게 다듬어 설명하세요. 참고 답변이 없으면 일반적인 지식으로 간결하게 안내하고, \
                 확실하지 않은 내용은 단정하지 마세요."
            ),
            Persona::IntentClassifier => "다음 사용자 발화를 분류하세요. 고객 상담과 무관한 일반 \
                 지식 질문(역사, 요리, 연예, 날씨 등)이면 non_counseling, 인사나 일상 대화이면 \
                 casual 이라고 한 단어로만 답하세요."
                .to_string(),
        }
    }
}

/// Accepted generation output
#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub model_id: String,
    /// The apology was substituted after two rejected outputs
    pub fallback: bool,
    pub attempts: u8,
}

/// Strip prompt echoes, special tokens and role prefixes; cut at the first
/// stop marker.
pub fn clean_output(raw: &str, prompt: &str, stops: &[String]) -> String {
    let mut text = raw.strip_prefix(prompt).unwrap_or(raw).to_string();

    for stop in stops.iter().map(String::as_str).filter(|s| !s.is_empty()) {
        text = text.split(stop).next().unwrap_or_default().to_string();
    }
    for token in SPECIAL_TOKENS {
        text = text.replace(token, "");
    }

    let mut trimmed = text.trim();
    loop {
        let stripped = ROLE_PREFIXES
            .iter()
            .find_map(|p| trimmed.strip_prefix(p))
            .map(str::trim_start);
        match stripped {
            Some(rest) => trimmed = rest,
            None => break,
        }
    }
    trimmed.trim().to_string()
}

/// Empty, punctuation-only, or pure filler
pub fn is_meaningless(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.chars().any(char::is_alphanumeric) || MEANINGLESS_RE.is_match(trimmed)
}

pub struct GenerationEngine {
    manager: Arc<ModelManager>,
    company_name: String,
    timeout: Duration,
}

impl GenerationEngine {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self {
            manager,
            company_name: "아름".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_company(mut self, company_name: impl Into<String>) -> Self {
        self.company_name = company_name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    /// Produce a reply. `context` is an authoritative answer to paraphrase.
    pub async fn generate(
        &self,
        persona: Persona,
        context: Option<&str>,
        utterance: &str,
        overrides: &ParamOverrides,
    ) -> Result<Generated, GenerationError> {
        timeout(
            self.timeout,
            self.generate_with_retry(persona, context, utterance, overrides),
        )
        .await
        .map_err(|_| GenerationError::Timeout(self.timeout))?
    }

    async fn generate_with_retry(
        &self,
        persona: Persona,
        context: Option<&str>,
        utterance: &str,
        overrides: &ParamOverrides,
    ) -> Result<Generated, GenerationError> {
        let system = persona.system_prompt(&self.company_name);

        let first = self
            .attempt(&system, context, utterance, |d| overrides.apply(&d.defaults))
            .await?;
        if let Some(text) = accept(&first) {
            return Ok(Generated {
                text,
                model_id: first.invocation.model_id,
                fallback: false,
                attempts: 1,
            });
        }
        tracing::info!(
            model = %first.invocation.model_id,
            output = %first.cleaned,
            "Rejected generation, retrying at lower temperature"
        );

        let second = self
            .attempt(&system, context, utterance, |d| {
                let mut params = overrides.apply(&d.defaults);
                params.temperature =
                    (params.temperature * RETRY_TEMPERATURE_SCALE).max(MIN_RETRY_TEMPERATURE);
                params
            })
            .await?;
        if let Some(text) = accept(&second) {
            return Ok(Generated {
                text,
                model_id: second.invocation.model_id,
                fallback: false,
                attempts: 2,
            });
        }

        tracing::warn!(
            model = %second.invocation.model_id,
            "Second generation rejected, returning apology"
        );
        Ok(Generated {
            text: APOLOGY.to_string(),
            model_id: second.invocation.model_id,
            fallback: true,
            attempts: 2,
        })
    }

    async fn attempt<P>(
        &self,
        system: &str,
        context: Option<&str>,
        utterance: &str,
        params_for: P,
    ) -> Result<Attempt, GenerationError>
    where
        P: FnOnce(&ModelDescriptor) -> GenerationParams + Send,
    {
        let mut stops = Vec::new();
        let invocation = self
            .manager
            .invoke_with(|d| {
                let mut params = params_for(d);
                for marker in d.prompt_format.stop_markers() {
                    if !params.stop.iter().any(|s| s == marker) {
                        params.stop.push((*marker).to_string());
                    }
                }
                stops.clone_from(&params.stop);
                (d.prompt_format.render(system, context, utterance), params)
            })
            .await?;

        let cleaned = clean_output(&invocation.text, &invocation.prompt, &stops);
        Ok(Attempt { invocation, cleaned })
    }

    /// Intent-only call for the classifier; returns the cleaned raw answer
    pub async fn classify_intent(&self, utterance: &str) -> Result<String, GenerationError> {
        let system = Persona::IntentClassifier.system_prompt(&self.company_name);
        let overrides = ParamOverrides {
            temperature: Some(0.1),
            max_tokens: Some(8),
        };
        let attempt = self
            .attempt(&system, None, utterance, |d| overrides.apply(&d.defaults))
            .await?;
        Ok(attempt.cleaned)
    }
}

struct Attempt {
    invocation: Invocation,
    cleaned: String,
}

fn accept(attempt: &Attempt) -> Option<String> {
    (!is_meaningless(&attempt.cleaned)).then(|| attempt.cleaned.clone())
}
