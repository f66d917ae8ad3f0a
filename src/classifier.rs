//! Input classification
//!
//! Four steps, first match wins: profanity denylist, domain vocabulary,
//! stored context patterns, and finally a short intent-only model call.
//! Classification never fails; every error degrades to the next step or to
//! `casual`.

mod vocabulary;

pub use vocabulary::{DOMAIN_TERMS_ASCII, DOMAIN_TERMS_KO, STOPWORDS, TRAILING_PARTICLES};

use crate::generation::GenerationEngine;
use crate::metrics::Metrics;
use crate::pipeline::KnowledgeStore;
use crate::retrieval::extract_keywords;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::timeout;
use vocabulary::{PROFANITY_SUFFIXES, PROFANITY_TERMS};

/// What kind of utterance a turn carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Casual,
    Technical,
    NonCounseling,
    Profanity,
}

impl Label {
    pub const ALL: [Label; 4] = [
        Label::Casual,
        Label::Technical,
        Label::NonCounseling,
        Label::Profanity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Casual => "casual",
            Label::Technical => "technical",
            Label::NonCounseling => "non_counseling",
            Label::Profanity => "profanity",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| format!("unknown label: {s}"))
    }
}

/// Which step decided the label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Profanity,
    DomainKeyword,
    ContextPattern,
    IntentModel,
    /// Nothing matched and the intent call was skipped or failed
    Default,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub label: Label,
    /// Term or stored pattern that triggered the label
    pub matched_pattern: Option<String>,
    pub source: ClassificationSource,
}

impl Classification {
    fn new(label: Label, matched: Option<String>, source: ClassificationSource) -> Self {
        Self {
            label,
            matched_pattern: matched,
            source,
        }
    }
}

static PROFANITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    let terms = PROFANITY_TERMS
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    let suffixes = PROFANITY_SUFFIXES
        .iter()
        .map(|s| regex::escape(s))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"(?:^|[^\p{{L}}\p{{N}}])({terms})(?:{suffixes}){{0,2}}(?:$|[^\p{{L}}\p{{N}}])"
    ))
    .expect("profanity pattern is valid")
});

static ASCII_DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    let terms = DOMAIN_TERMS_ASCII.join("|");
    Regex::new(&format!(r"(?:^|[^a-z0-9])({terms})(?:$|[^a-z0-9])"))
        .expect("domain pattern is valid")
});

/// Lowercase and collapse whitespace
pub fn normalize(utterance: &str) -> String {
    utterance
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Denylisted term present as a whole word, if any
pub fn find_profanity(normalized: &str) -> Option<String> {
    PROFANITY_RE
        .captures(normalized)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Domain vocabulary term present, if any
pub fn find_domain_term(normalized: &str) -> Option<String> {
    if let Some(term) = DOMAIN_TERMS_KO.iter().find(|t| normalized.contains(*t)) {
        return Some((*term).to_string());
    }
    ASCII_DOMAIN_RE
        .captures(normalized)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Read the intent model's answer; anything but a clear off-topic verdict is casual
pub fn parse_intent(output: &str) -> Label {
    let lowered = output.to_lowercase();
    if lowered.contains("non_counseling") || lowered.contains("non-counseling") {
        Label::NonCounseling
    } else {
        Label::Casual
    }
}

pub struct Classifier {
    store: Arc<dyn KnowledgeStore>,
    generator: Arc<GenerationEngine>,
    metrics: Arc<Metrics>,
    classification_fallback: bool,
    intent_timeout: Duration,
}

impl Classifier {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        generator: Arc<GenerationEngine>,
        metrics: Arc<Metrics>,
        classification_fallback: bool,
        intent_timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            metrics,
            classification_fallback,
            intent_timeout,
        }
    }

    pub async fn classify(&self, utterance: &str) -> Classification {
        let normalized = normalize(utterance);
        if normalized.is_empty() {
            return Classification::new(Label::Casual, None, ClassificationSource::Default);
        }

        if let Some(term) = find_profanity(&normalized) {
            return Classification::new(Label::Profanity, Some(term), ClassificationSource::Profanity);
        }

        if let Some(term) = find_domain_term(&normalized) {
            return Classification::new(
                Label::Technical,
                Some(term),
                ClassificationSource::DomainKeyword,
            );
        }

        if let Some(found) = self.match_context_pattern(&normalized).await {
            return found;
        }

        self.classify_with_model(utterance).await
    }

    async fn match_context_pattern(&self, normalized: &str) -> Option<Classification> {
        let keywords = extract_keywords(normalized).join(" ");
        match self.store.match_pattern(normalized, &keywords).await {
            Ok(Some(pattern)) => {
                if let Err(e) = self.store.touch_pattern(pattern.id).await {
                    tracing::debug!(pattern = %pattern.pattern, error = %e, "Pattern usage bump failed");
                }
                Some(Classification::new(
                    pattern.label,
                    Some(pattern.pattern),
                    ClassificationSource::ContextPattern,
                ))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Context pattern lookup failed, skipping");
                None
            }
        }
    }

    async fn classify_with_model(&self, utterance: &str) -> Classification {
        if !self.classification_fallback {
            return Classification::new(Label::Casual, None, ClassificationSource::Default);
        }

        self.metrics.record_intent_call();
        match timeout(self.intent_timeout, self.generator.classify_intent(utterance)).await {
            Ok(Ok(output)) => Classification::new(
                parse_intent(&output),
                None,
                ClassificationSource::IntentModel,
            ),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Intent call failed, defaulting to casual");
                Classification::new(Label::Casual, None, ClassificationSource::Default)
            }
            Err(_) => {
                tracing::warn!("Intent call timed out, defaulting to casual");
                Classification::new(Label::Casual, None, ClassificationSource::Default)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::llm::testing::{test_descriptor, MockBackend};
    use crate::llm::{ModelBackend, ModelManager};
    use crate::pipeline::DatabaseStore;
    use proptest::prelude::*;

    async fn classifier_with(backend: Arc<MockBackend>, fallback: bool) -> Classifier {
        let db = Database::open_in_memory().unwrap();
        db.seed_default_patterns().unwrap();
        let manager = Arc::new(ModelManager::new(
            vec![(
                test_descriptor("model-a"),
                backend as Arc<dyn ModelBackend>,
            )],
            "model-a",
        ));
        manager.switch_model("model-a").await.unwrap();
        Classifier::new(
            Arc::new(DatabaseStore::new(db)),
            Arc::new(GenerationEngine::new(manager)),
            Arc::new(Metrics::default()),
            fallback,
            Duration::from_secs(2),
        )
    }

    #[test]
    fn profanity_matches_whole_words() {
        assert_eq!(find_profanity("이 씨발 프린터"), Some("씨발".to_string()));
        assert_eq!(find_profanity("시발"), Some("시발".to_string()));
        assert_eq!(find_profanity("병신아 왜 안돼"), Some("병신".to_string()));
        assert_eq!(find_profanity("you are an idiot!"), Some("idiot".to_string()));
        assert_eq!(find_profanity("fuck, this pos"), Some("fuck".to_string()));
        // stacked endings and compounds
        assert_eq!(find_profanity("씨발놈아 왜 안돼"), Some("씨발".to_string()));
        assert_eq!(find_profanity("병신같이 일하네"), Some("병신".to_string()));
        assert_eq!(find_profanity("지랄하네요 진짜"), Some("지랄".to_string()));
        assert_eq!(find_profanity("시발새끼"), Some("시발".to_string()));
        assert_eq!(find_profanity("개새끼야"), Some("개새끼".to_string()));
    }

    #[test]
    fn profanity_ignores_embedded_substrings() {
        assert_eq!(find_profanity("시발점이 어디인가요"), None);
        assert_eq!(find_profanity("password reset please"), None);
        assert_eq!(find_profanity("class assignment"), None);
        assert_eq!(find_profanity("scunthorpe"), None);
        assert_eq!(find_profanity("새끼 고양이 사진 올리는 법"), None);
        assert_eq!(find_profanity("시발역에서 출발"), None);
    }

    #[test]
    fn domain_terms() {
        assert_eq!(find_domain_term("포스가 안 켜져요"), Some("포스".to_string()));
        assert_eq!(find_domain_term("영수증 출력"), Some("영수증".to_string()));
        assert_eq!(find_domain_term("pos 재부팅"), Some("pos".to_string()));
        assert_eq!(find_domain_term("is it possible"), None);
        assert_eq!(find_domain_term("불고기 레시피"), None);
    }

    #[test]
    fn label_round_trips_through_str() {
        for label in Label::ALL {
            assert_eq!(label.as_str().parse::<Label>().unwrap(), label);
        }
        assert!("angry".parse::<Label>().is_err());
    }

    #[test]
    fn intent_output_parsing() {
        assert_eq!(parse_intent("non_counseling"), Label::NonCounseling);
        assert_eq!(parse_intent(" NON_COUNSELING\n"), Label::NonCounseling);
        assert_eq!(parse_intent("casual"), Label::Casual);
        assert_eq!(parse_intent("I think it's technical"), Label::Casual);
        assert_eq!(parse_intent(""), Label::Casual);
    }

    #[tokio::test]
    async fn domain_term_skips_intent_call() {
        let backend = Arc::new(MockBackend::new("model-a"));
        let classifier = classifier_with(backend.clone(), true).await;

        let c = classifier.classify("키오스크 화면이 멈췄어요").await;
        assert_eq!(c.label, Label::Technical);
        assert_eq!(c.source, ClassificationSource::DomainKeyword);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn seeded_patterns_classify_without_model() {
        let backend = Arc::new(MockBackend::new("model-a"));
        let classifier = classifier_with(backend.clone(), true).await;

        let greeting = classifier.classify("안녕하세요?").await;
        assert_eq!(greeting.label, Label::Casual);
        assert_eq!(greeting.source, ClassificationSource::ContextPattern);

        let recipe = classifier.classify("불고기 레시피 알려줘").await;
        assert_eq!(recipe.label, Label::NonCounseling);
        assert_eq!(recipe.matched_pattern.as_deref(), Some("레시피"));

        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn unmatched_input_uses_intent_model() {
        let backend = Arc::new(MockBackend::new("model-a"));
        backend.queue_response("non_counseling");
        let classifier = classifier_with(backend.clone(), true).await;

        let c = classifier.classify("달까지 거리가 얼마야").await;
        assert_eq!(c.label, Label::NonCounseling);
        assert_eq!(c.source, ClassificationSource::IntentModel);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn intent_failure_defaults_to_casual() {
        let backend = Arc::new(MockBackend::new("model-a"));
        // nothing queued: the mock errors
        let classifier = classifier_with(backend.clone(), true).await;

        let c = classifier.classify("오늘 기분이 어때").await;
        assert_eq!(c.label, Label::Casual);
        assert_eq!(c.source, ClassificationSource::Default);
    }

    #[tokio::test]
    async fn disabled_fallback_never_calls_model() {
        let backend = Arc::new(MockBackend::new("model-a"));
        let classifier = classifier_with(backend.clone(), false).await;

        let c = classifier.classify("오늘 기분이 어때").await;
        assert_eq!(c.label, Label::Casual);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_input_is_casual() {
        let backend = Arc::new(MockBackend::new("model-a"));
        let classifier = classifier_with(backend.clone(), true).await;
        let c = classifier.classify("   ").await;
        assert_eq!(c.label, Label::Casual);
        assert_eq!(backend.call_count(), 0);
    }

    proptest! {
        #[test]
        fn denylisted_word_between_spaces_is_detected(
            term in prop::sample::select(PROFANITY_TERMS),
            before in "[a-z가-힣]{0,6}",
            after in "[a-z가-힣]{0,6}",
        ) {
            let text = format!("{before} {term} {after}");
            prop_assert!(find_profanity(&normalize(&text)).is_some());
        }

        #[test]
        fn denylisted_word_with_stacked_endings_is_detected(
            term in prop::sample::select(PROFANITY_TERMS),
            first in prop::sample::select(PROFANITY_SUFFIXES),
            second in prop::option::of(prop::sample::select(PROFANITY_SUFFIXES)),
            after in "[a-z가-힣]{0,6}",
        ) {
            let second = second.unwrap_or("");
            let text = format!("{term}{first}{second} {after}");
            prop_assert!(find_profanity(&normalize(&text)).is_some(), "missed {}", text);
        }

        #[test]
        fn denylisted_word_glued_to_letters_is_ignored(
            term in prop::sample::select(vec!["시발", "병신", "fuck", "shit"]),
            prefix in "[a-z가-힣]{1,4}",
        ) {
            // a letter immediately before the term makes it part of another word
            let text = format!("{prefix}{term}점");
            let found = find_profanity(&normalize(&text));
            prop_assert!(found.is_none(), "matched {:?} in {}", found, text);
        }
    }
}
