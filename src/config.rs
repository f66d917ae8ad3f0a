//! Pipeline configuration
//!
//! Everything that used to be a process-wide flag is a field here, read once
//! from the environment and handed to each component at construction. Only
//! retrieval priority can change at runtime.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Which optional stages run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageToggles {
    /// Ask the model when no rule classifies an utterance
    pub classification_fallback: bool,
    pub retrieval: bool,
    pub formatting: bool,
    pub learning: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            classification_fallback: true,
            retrieval: true,
            formatting: true,
            learning: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    /// Blended score an entry needs to count as a confident match
    pub min_confidence: f32,
    /// Share of the blended score given to embedding similarity
    pub semantic_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.35,
            semantic_weight: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningConfig {
    /// Cosine similarity at or above which a question is a duplicate
    pub dedup_threshold: f32,
    /// Keyword Jaccard similarity used when no embeddings are available
    pub lexical_dedup_threshold: f32,
    pub max_patterns_per_entry: usize,
    /// Answers shorter than this are not worth keeping
    pub min_answer_chars: usize,
    /// Pending jobs before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: 0.9,
            lexical_dedup_threshold: 0.8,
            max_patterns_per_entry: 3,
            min_answer_chars: 10,
            queue_capacity: 256,
        }
    }
}

/// Independent per-stage deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub classification: Duration,
    pub retrieval: Duration,
    pub generation: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            classification: Duration::from_secs(10),
            retrieval: Duration::from_secs(3),
            generation: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub stages: StageToggles,
    pub retrieval: RetrievalConfig,
    pub learning: LearningConfig,
    pub timeouts: StageTimeouts,
    /// How long a profanity warning blocks the user
    pub profanity_cooldown: Duration,
    /// Initial value of the runtime retrieval-priority switch
    pub retrieval_priority: bool,
    /// Company name used in the refusal for off-topic questions
    pub company_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: StageToggles::default(),
            retrieval: RetrievalConfig::default(),
            learning: LearningConfig::default(),
            timeouts: StageTimeouts::default(),
            profanity_cooldown: Duration::from_secs(30 * 60),
            retrieval_priority: true,
            company_name: "아름".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| get(key).map(|v| v.trim().to_string());
        let flag = |key: &str, default: bool| parsed(key).map_or(default, |v| parse_bool(&v).unwrap_or(default));
        let millis = |key: &str, default: Duration| {
            parsed(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(default, Duration::from_millis)
        };

        Self {
            stages: StageToggles {
                classification_fallback: flag(
                    "AICOUNSEL_ENABLE_CLASSIFICATION_FALLBACK",
                    d.stages.classification_fallback,
                ),
                retrieval: flag("AICOUNSEL_ENABLE_RETRIEVAL", d.stages.retrieval),
                formatting: flag("AICOUNSEL_ENABLE_FORMATTING", d.stages.formatting),
                learning: flag("AICOUNSEL_ENABLE_LEARNING", d.stages.learning),
            },
            retrieval: RetrievalConfig {
                min_confidence: unit(parsed("AICOUNSEL_MIN_CONFIDENCE"), d.retrieval.min_confidence),
                semantic_weight: unit(parsed("AICOUNSEL_SEMANTIC_WEIGHT"), d.retrieval.semantic_weight),
            },
            learning: LearningConfig {
                dedup_threshold: unit(parsed("AICOUNSEL_DEDUP_THRESHOLD"), d.learning.dedup_threshold),
                lexical_dedup_threshold: unit(
                    parsed("AICOUNSEL_LEXICAL_DEDUP_THRESHOLD"),
                    d.learning.lexical_dedup_threshold,
                ),
                max_patterns_per_entry: number(
                    parsed("AICOUNSEL_MAX_PATTERNS_PER_ENTRY"),
                    d.learning.max_patterns_per_entry,
                ),
                min_answer_chars: number(parsed("AICOUNSEL_MIN_ANSWER_CHARS"), d.learning.min_answer_chars),
                queue_capacity: number(parsed("AICOUNSEL_LEARNING_QUEUE"), d.learning.queue_capacity).max(1),
            },
            timeouts: StageTimeouts {
                classification: millis("AICOUNSEL_CLASSIFICATION_TIMEOUT_MS", d.timeouts.classification),
                retrieval: millis("AICOUNSEL_RETRIEVAL_TIMEOUT_MS", d.timeouts.retrieval),
                generation: millis("AICOUNSEL_GENERATION_TIMEOUT_MS", d.timeouts.generation),
            },
            profanity_cooldown: parsed("AICOUNSEL_PROFANITY_COOLDOWN_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(d.profanity_cooldown, Duration::from_secs),
            retrieval_priority: flag("AICOUNSEL_RETRIEVAL_PRIORITY", d.retrieval_priority),
            company_name: get("AICOUNSEL_COMPANY_NAME").unwrap_or(d.company_name),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a value in `[0, 1]`
fn unit(value: Option<String>, default: f32) -> f32 {
    value
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|v| (0.0..=1.0).contains(v))
        .unwrap_or(default)
}

fn number<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Settings an operator can flip while the service runs
#[derive(Debug)]
pub struct RuntimeSettings {
    retrieval_priority: AtomicBool,
}

impl RuntimeSettings {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            retrieval_priority: AtomicBool::new(config.retrieval_priority),
        }
    }

    pub fn retrieval_priority(&self) -> bool {
        self.retrieval_priority.load(Ordering::SeqCst)
    }

    pub fn set_retrieval_priority(&self, enabled: bool) {
        self.retrieval_priority.store(enabled, Ordering::SeqCst);
    }
}
