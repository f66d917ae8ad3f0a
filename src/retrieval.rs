//! Knowledge retrieval
//!
//! Keyword extraction, OR-candidate lookup, blended lexical/semantic scoring
//! and a confidence threshold. The same store contents and utterance always
//! yield the same hit.

use crate::classifier::{STOPWORDS, TRAILING_PARTICLES};
use crate::config::RetrievalConfig;
use crate::db::KnowledgeEntry;
use crate::embedding::{cosine_similarity, Embedder};
use crate::metrics::Metrics;
use crate::pipeline::KnowledgeStore;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

/// Keywords kept per utterance
pub const MAX_KEYWORDS: usize = 8;

/// Tokens shorter than this carry no signal
const MIN_KEYWORD_CHARS: usize = 2;

/// Lowercase, split on anything that is not a letter or digit, strip trailing
/// particles, drop stopwords and single characters, dedupe in order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();

    for raw in lowered.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() || STOPWORDS.contains(&raw) {
            continue;
        }
        let token = strip_particle(raw);
        if token.chars().count() < MIN_KEYWORD_CHARS || STOPWORDS.contains(&token) {
            continue;
        }
        if !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

fn strip_particle(token: &str) -> &str {
    for particle in TRAILING_PARTICLES {
        if let Some(stem) = token.strip_suffix(particle) {
            if stem.chars().count() >= MIN_KEYWORD_CHARS {
                return stem;
            }
        }
    }
    token
}

/// Share of the candidate's keywords the query also has
pub fn lexical_score(query: &[String], candidate: &[String]) -> f32 {
    if candidate.is_empty() {
        return 0.0;
    }
    let shared = candidate.iter().filter(|k| query.contains(k)).count();
    ratio(shared, candidate.len())
}

/// Jaccard similarity of two keyword sets
pub fn jaccard(a: &[String], b: &[String]) -> f32 {
    let shared = a.iter().filter(|k| b.contains(k)).count();
    let union = a.len() + b.len() - shared;
    if union == 0 {
        return 0.0;
    }
    ratio(shared, union)
}

#[allow(clippy::cast_precision_loss)] // keyword counts are tiny
fn ratio(part: usize, whole: usize) -> f32 {
    part as f32 / whole as f32
}

/// A confident knowledge match
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub entry: KnowledgeEntry,
    pub score: f32,
    pub lexical: f32,
    pub semantic: Option<f32>,
}

pub struct RetrievalEngine {
    store: Arc<dyn KnowledgeStore>,
    embedder: Option<Arc<dyn Embedder>>,
    config: RetrievalConfig,
    metrics: Arc<Metrics>,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Option<Arc<dyn Embedder>>,
        config: RetrievalConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            metrics,
        }
    }

    /// Best entry at or above the confidence threshold. Store failures
    /// degrade to no match.
    pub async fn retrieve(&self, utterance: &str) -> Option<RetrievalHit> {
        let keywords = extract_keywords(utterance);
        if keywords.is_empty() {
            self.metrics.record_retrieval_miss();
            return None;
        }

        let candidates = match self.store.find_by_keywords(&keywords).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Knowledge lookup failed, continuing without retrieval");
                self.metrics.record_retrieval_degraded();
                return None;
            }
        };

        let query_embedding = if candidates.iter().any(|c| c.embedding.is_some()) {
            self.embed_query(utterance).await
        } else {
            None
        };

        let best = candidates
            .into_iter()
            .map(|entry| self.score(&keywords, query_embedding.as_deref(), entry))
            .max_by(compare_hits);

        match best {
            Some(hit) if hit.score >= self.config.min_confidence => {
                tracing::debug!(
                    entry_id = hit.entry.id,
                    score = hit.score,
                    lexical = hit.lexical,
                    semantic = ?hit.semantic,
                    "Knowledge match"
                );
                self.metrics.record_retrieval_hit();
                Some(hit)
            }
            other => {
                tracing::debug!(
                    keywords = ?keywords,
                    best_score = ?other.map(|h| h.score),
                    "No confident knowledge match"
                );
                self.metrics.record_retrieval_miss();
                None
            }
        }
    }

    async fn embed_query(&self, utterance: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(utterance).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(
                    model = embedder.model_name(),
                    error = %e,
                    "Query embedding failed, scoring lexically"
                );
                None
            }
        }
    }

    fn score(&self, keywords: &[String], query: Option<&[f32]>, entry: KnowledgeEntry) -> RetrievalHit {
        let lexical = lexical_score(keywords, &entry.keywords);
        let semantic = query
            .zip(entry.embedding.as_deref())
            .and_then(|(q, e)| cosine_similarity(q, e))
            .map(|s| s.max(0.0));
        let score = match semantic {
            Some(s) => {
                let w = self.config.semantic_weight;
                w * s + (1.0 - w) * lexical
            }
            None => lexical,
        };
        RetrievalHit {
            entry,
            score,
            lexical,
            semantic,
        }
    }
}

/// Higher score wins, then higher usage, then lower id
fn compare_hits(a: &RetrievalHit, b: &RetrievalHit) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then(a.entry.usage_count.cmp(&b.entry.usage_count))
        .then(b.entry.id.cmp(&a.entry.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewKnowledgeEntry};
    use crate::embedding::testing::MockEmbedder;
    use crate::pipeline::testing::FailingKnowledgeStore;
    use crate::pipeline::DatabaseStore;
    use proptest::prelude::*;

    fn store() -> Arc<DatabaseStore> {
        Arc::new(DatabaseStore::new(Database::open_in_memory().unwrap()))
    }

    fn engine(store: Arc<dyn KnowledgeStore>, embedder: Option<Arc<dyn Embedder>>) -> RetrievalEngine {
        RetrievalEngine::new(
            store,
            embedder,
            RetrievalConfig::default(),
            Arc::new(Metrics::default()),
        )
    }

    async fn add(store: &DatabaseStore, question: &str, answer: &str) -> KnowledgeEntry {
        store
            .insert_entry(&NewKnowledgeEntry {
                question: question.to_string(),
                answer: answer.to_string(),
                keywords: extract_keywords(question),
                embedding: None,
            })
            .await
            .unwrap()
    }

    #[test]
    fn keywords_drop_stopwords_and_particles() {
        assert_eq!(
            extract_keywords("포스가 안 켜져요. 어떻게 해요?"),
            vec!["포스", "켜져요"]
        );
        assert_eq!(extract_keywords("안녕하세요?"), Vec::<String>::new());
        assert_eq!(
            extract_keywords("POS 프린터 프린터를 재설치"),
            vec!["pos", "프린터", "재설치"]
        );
        assert!(extract_keywords("").is_empty());
    }

    #[test]
    fn keywords_are_capped() {
        let text = "하나둘 셋넷 다섯 여섯 일곱 여덟 아홉 열개 열하나";
        assert_eq!(extract_keywords(text).len(), MAX_KEYWORDS);
    }

    #[test]
    fn similarity_measures() {
        let q = vec!["포스".to_string(), "재설치".to_string()];
        let c = vec!["포스".to_string(), "재설치".to_string(), "순서".to_string(), "관리자".to_string()];
        assert!((lexical_score(&q, &c) - 0.5).abs() < 1e-6);
        assert!((jaccard(&q, &c) - 0.5).abs() < 1e-6);
        assert!(lexical_score(&q, &[]).abs() < f32::EPSILON);
        assert!(jaccard(&[], &[]).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn insert_then_query_finds_entry() {
        let store = store();
        let entry = add(&store, "포스 재설치 방법", "설치 파일을 관리자 권한으로 실행하세요.").await;
        add(&store, "프린터 용지 교체", "덮개를 열고 용지를 넣으세요.").await;

        let hit = engine(store, None)
            .retrieve("포스 재설치 방법")
            .await
            .unwrap();
        assert_eq!(hit.entry.id, entry.id);
        assert!((hit.score - 1.0).abs() < 1e-6);
        assert!(hit.semantic.is_none());
    }

    #[tokio::test]
    async fn below_threshold_is_no_match() {
        let store = store();
        add(&store, "영수증 프린터 용지 교체 덮개 위치", "덮개를 여세요.").await;

        // 1 of 6 candidate keywords shared
        assert!(engine(store, None).retrieve("영수증 재발행").await.is_none());
    }

    #[tokio::test]
    async fn retrieval_is_idempotent() {
        let store = store();
        add(&store, "키오스크 화면 멈춤", "전원을 껐다 켜세요.").await;
        add(&store, "키오스크 카드 결제 오류", "카드리더 연결을 확인하세요.").await;
        add(&store, "키오스크 화면 밝기", "설정 메뉴에서 조절하세요.").await;
        let engine = engine(store, None);

        let first = engine.retrieve("키오스크 화면이 멈췄어요").await.map(|h| h.entry.id);
        for _ in 0..5 {
            let again = engine.retrieve("키오스크 화면이 멈췄어요").await.map(|h| h.entry.id);
            assert_eq!(again, first);
        }
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn ties_prefer_usage_then_lower_id() {
        let store = store();
        let older = add(&store, "백업 복구", "A").await;
        let newer = add(&store, "백업 복구", "B").await;
        let engine = engine(store.clone(), None);

        assert_eq!(engine.retrieve("백업 복구").await.unwrap().entry.id, older.id);

        store.increment_usage(newer.id).await.unwrap();
        assert_eq!(engine.retrieve("백업 복구").await.unwrap().entry.id, newer.id);
    }

    #[tokio::test]
    async fn semantic_score_is_blended() {
        let store = store();
        store
            .insert_entry(&NewKnowledgeEntry {
                question: "매출 정산 방법".into(),
                answer: "영업 마감 메뉴를 사용하세요.".into(),
                keywords: vec!["매출".into(), "정산".into()],
                embedding: Some(vec![1.0, 0.0]),
            })
            .await
            .unwrap();
        let embedder: Arc<dyn Embedder> =
            Arc::new(MockEmbedder::default().with("매출 마감", vec![1.0, 0.0]));

        let hit = engine(store, Some(embedder))
            .retrieve("매출 마감")
            .await
            .unwrap();
        assert_eq!(hit.semantic, Some(1.0));
        // 0.6 * 1.0 + 0.4 * 0.5
        assert!((hit.score - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn embedder_failure_falls_back_to_lexical() {
        let store = store();
        store
            .insert_entry(&NewKnowledgeEntry {
                question: "매출 정산".into(),
                answer: "마감 메뉴".into(),
                keywords: vec!["매출".into(), "정산".into()],
                embedding: Some(vec![1.0, 0.0]),
            })
            .await
            .unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::default());

        let hit = engine(store, Some(embedder))
            .retrieve("매출 정산")
            .await
            .unwrap();
        assert!(hit.semantic.is_none());
        assert!((hit.score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn store_failure_degrades_to_none() {
        let metrics = Arc::new(Metrics::default());
        let engine = RetrievalEngine::new(
            Arc::new(FailingKnowledgeStore),
            None,
            RetrievalConfig::default(),
            metrics.clone(),
        );
        assert!(engine.retrieve("포스 재설치").await.is_none());
        assert_eq!(metrics.snapshot().retrieval.degraded, 1);
    }

    proptest! {
        #[test]
        fn keywords_are_unique_bounded_and_multichar(text in "[가-힣a-z0-9 ?.!]{0,80}") {
            let keywords = extract_keywords(&text);
            prop_assert!(keywords.len() <= MAX_KEYWORDS);
            for (i, k) in keywords.iter().enumerate() {
                prop_assert!(k.chars().count() >= MIN_KEYWORD_CHARS);
                prop_assert!(!STOPWORDS.contains(&k.as_str()));
                prop_assert!(!keywords[..i].contains(k));
            }
        }
    }
}
