//! End-to-end engine tests over mock embedding and generation providers.
//!
//! The mock embedder projects text onto a few keyword axes, which makes
//! similarity scores predictable: a chunk mentioning a keyword has
//! cosine similarity 1.0 with a query built from that keyword, and 0.0
//! otherwise.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use bookmind::config::Config;
use bookmind::embedding::EmbeddingService;
use bookmind::engine::{Engine, ExplainRequest};
use bookmind::generation::{GenerationRequest, GenerationService};
use bookmind::session::InMemorySessionStore;
use bookmind::{ComplexityLevel, ExplanationError, IngestError, ReadingPosition, RetrievalError};

const AXES: [&str; 4] = ["storm", "kraken", "harbor", "lantern"];

struct MockEmbedding {
    fail: bool,
}

impl MockEmbedding {
    fn vectorize(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        AXES.iter()
            .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
            .collect()
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedding {
    fn model_name(&self) -> &str {
        "mock-embed"
    }
    fn dims(&self) -> usize {
        AXES.len()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            bail!("mock embedding outage");
        }
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }
}

struct MockGeneration {
    calls: AtomicUsize,
    fail_first: usize,
    response: String,
    /// The first N calls sleep for `delay` before answering.
    delay_first: usize,
    delay: Duration,
    last_system_prompt: Mutex<Option<String>>,
}

impl MockGeneration {
    fn new(response: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first: 0,
            response: response.to_string(),
            delay_first: 0,
            delay: Duration::ZERO,
            last_system_prompt: Mutex::new(None),
        }
    }

    fn failing_first(response: &str, failures: usize) -> Self {
        Self {
            fail_first: failures,
            ..Self::new(response)
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_system_prompt(&self) -> Option<String> {
        self.last_system_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for MockGeneration {
    fn model_name(&self) -> &str {
        "mock-gen"
    }
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_system_prompt.lock().unwrap() = Some(request.system_prompt.clone());
        if n < self.delay_first {
            tokio::time::sleep(self.delay).await;
        }
        if n < self.fail_first {
            bail!("mock generation outage");
        }
        Ok(self.response.clone())
    }
}

/// Ten 4-token sentences, one page each, so `max_tokens = 6` yields one
/// chunk per sentence. "storm" appears in chunks 3, 5, and 8.
const HARBOR_BOOK: &str = "\
[[chapter:1]]
[[page:1]]
The harbor lay quiet.
[[page:2]]
Nets dried on racks.
[[page:3]]
Gulls circled the pier.
[[page:4]]
A storm brewed offshore.
[[page:5]]
Sailors watched the horizon.
[[page:6]]
The storm struck hard.
[[page:7]]
Boats broke their moorings.
[[page:8]]
People fled the quay.
[[page:9]]
The storm finally passed.
[[page:10]]
Dawn revealed the wreckage.
";

fn test_config() -> Config {
    let mut config = Config::default();
    config.chunking.max_tokens = 6;
    config.chunking.overlap_tokens = 0;
    config.retrieval.final_k = 2;
    config.engine.retry_backoff_ms = 10;
    config
}

fn engine_with(
    config: Config,
    generator: Arc<MockGeneration>,
) -> (Engine, Arc<InMemorySessionStore>) {
    let sessions = Arc::new(InMemorySessionStore::new());
    let engine = Engine::new(
        config,
        Arc::new(MockEmbedding { fail: false }),
        generator,
        sessions.clone(),
    );
    (engine, sessions)
}

fn position(page: u32) -> ReadingPosition {
    ReadingPosition {
        book_id: "harbor".to_string(),
        chapter: 1,
        page,
        paragraph: 1,
    }
}

fn request(query: &str) -> ExplainRequest {
    ExplainRequest {
        book_id: "harbor".to_string(),
        session_id: "s1".to_string(),
        query: query.to_string(),
        complexity: ComplexityLevel::Simple,
        allow_external_knowledge: false,
        position: None,
    }
}

#[tokio::test]
async fn test_ingest_reports_chunk_count() {
    let (engine, _) = engine_with(test_config(), Arc::new(MockGeneration::new("ok")));
    let report = engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    assert_eq!(report.chunk_count, 10);
    assert_eq!(report.token_total, 40);
    assert_eq!(report.embedding_model, "mock-embed");
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let (engine, _) = engine_with(test_config(), Arc::new(MockGeneration::new("ok")));
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    let first = engine.retrieve("harbor", "storm", &position(6), 3).await.unwrap();

    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    let second = engine.retrieve("harbor", "storm", &position(6), 3).await.unwrap();

    let ids = |cands: &[bookmind::RetrievalCandidate]| {
        cands.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn test_malformed_markers_leave_no_trace() {
    let (engine, _) = engine_with(test_config(), Arc::new(MockGeneration::new("ok")));
    let bad = "[[chapter:1]]\n[[page:5]]\nSome text here now.\n[[page:2]]\nPages went backwards.";
    let err = engine.ingest("harbor", bad).await.unwrap_err();
    assert!(matches!(err, IngestError::MalformedStructure { .. }));

    let err = engine
        .retrieve("harbor", "storm", &position(1), 3)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::UnknownBook(_)));
}

#[tokio::test]
async fn test_embedding_outage_fails_ingest() {
    let sessions = Arc::new(InMemorySessionStore::new());
    let engine = Engine::new(
        test_config(),
        Arc::new(MockEmbedding { fail: true }),
        Arc::new(MockGeneration::new("ok")),
        sessions,
    );
    let err = engine.ingest("harbor", HARBOR_BOOK).await.unwrap_err();
    assert!(matches!(err, IngestError::EmbeddingUnavailable(_)));
}

#[tokio::test]
async fn test_position_boost_prefers_nearby_chunks() {
    let (engine, _) = engine_with(test_config(), Arc::new(MockGeneration::new("ok")));
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();

    // Reader on page 6 sits at chunk 5. Chunks 3, 5, 8 all mention the
    // storm with identical similarity; proximity decides the order.
    let candidates = engine
        .retrieve("harbor", "storm", &position(6), 3)
        .await
        .unwrap();
    let order: Vec<u32> = candidates.iter().map(|c| c.sequence_index).collect();
    assert_eq!(order, vec![5, 3, 8]);
    assert!(candidates[0].position_boost > candidates[1].position_boost);
    assert_eq!(candidates[2].position_boost, 1.0 + 0.5 * (1.0 - 3.0 / 4.0));
}

#[tokio::test]
async fn test_position_from_another_book_is_ignored() {
    let (engine, _) = engine_with(test_config(), Arc::new(MockGeneration::new("ok")));
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();

    let mut foreign = position(6);
    foreign.book_id = "some-other-book".to_string();

    // Ranking falls back to the start of the book rather than mapping
    // the foreign page into this book's sequence space.
    let candidates = engine
        .retrieve("harbor", "storm", &foreign, 3)
        .await
        .unwrap();
    let order: Vec<u32> = candidates.iter().map(|c| c.sequence_index).collect();
    assert_eq!(order, vec![3, 5, 8]);

    let from_start = engine
        .retrieve(
            "harbor",
            "storm",
            &ReadingPosition {
                book_id: "harbor".to_string(),
                chapter: 0,
                page: 0,
                paragraph: 0,
            },
            3,
        )
        .await
        .unwrap();
    let start_order: Vec<u32> = from_start.iter().map(|c| c.sequence_index).collect();
    assert_eq!(order, start_order);
}

#[tokio::test]
async fn test_retrieval_does_not_cross_book_boundaries() {
    let (engine, _) = engine_with(test_config(), Arc::new(MockGeneration::new("ok")));
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    engine
        .ingest(
            "deep-sea",
            "[[chapter:1]]\n[[page:1]]\nThe kraken wakes below.",
        )
        .await
        .unwrap();

    // "kraken" only exists in the other book.
    let err = engine
        .retrieve("harbor", "kraken", &position(1), 3)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::NoRelevantContent { .. }));
}

#[tokio::test]
async fn test_explain_cites_and_scores_confidence() {
    let generator = Arc::new(MockGeneration::new(
        "The storm struck the town at page six [S1]. The reader saw it coming [S2].",
    ));
    let (engine, sessions) = engine_with(test_config(), generator.clone());
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    sessions.set_position("s1", position(6));

    let explanation = engine.explain(&request("what storm is this")).await.unwrap();
    assert!(!explanation.degraded);
    assert_eq!(explanation.citations, vec!["1:6", "1:4"]);
    assert!((explanation.confidence - 1.0).abs() < 1e-6);
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn test_invalid_citation_is_stripped_and_confidence_drops() {
    let generator = Arc::new(MockGeneration::new(
        "The storm struck hard [S1]. Legends blame a sea god [S9].",
    ));
    let (engine, sessions) = engine_with(test_config(), generator.clone());
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    sessions.set_position("s1", position(6));

    let explanation = engine.explain(&request("what storm is this")).await.unwrap();
    assert!(!explanation.content.contains("[S9]"));
    assert!(explanation.content.contains("[S1]"));
    assert_eq!(explanation.citations, vec!["1:6"]);
    // An invented citation caps confidence strictly below 0.5.
    assert!(explanation.confidence < 0.5);
    assert!((explanation.confidence - 0.25).abs() < 1e-6);
}

#[tokio::test]
async fn test_unanswerable_query_never_reaches_generation() {
    let generator = Arc::new(MockGeneration::new("should never be produced"));
    let (engine, sessions) = engine_with(test_config(), generator.clone());
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    sessions.set_position("s1", position(6));

    let err = engine.explain(&request("kraken")).await.unwrap_err();
    assert!(matches!(err, ExplanationError::NotInBook));
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_generation_retries_once_then_succeeds() {
    let generator = Arc::new(MockGeneration::failing_first("The storm struck [S1].", 1));
    let (engine, sessions) = engine_with(test_config(), generator.clone());
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    sessions.set_position("s1", position(6));

    let explanation = engine.explain(&request("what storm is this")).await.unwrap();
    assert!(!explanation.degraded);
    assert_eq!(generator.call_count(), 2);
}

#[tokio::test]
async fn test_double_generation_failure_degrades() {
    let generator = Arc::new(MockGeneration::failing_first("unused", 2));
    let (engine, sessions) = engine_with(test_config(), generator.clone());
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    sessions.set_position("s1", position(6));

    let explanation = engine.explain(&request("what storm is this")).await.unwrap();
    assert!(explanation.degraded);
    // The fallback is the top-ranked chunk's raw text with its citation.
    assert_eq!(explanation.content, "The storm struck hard.");
    assert_eq!(explanation.citations, vec!["1:6"]);
    assert!(explanation.confidence < 0.3);
    // Never a third attempt.
    assert_eq!(generator.call_count(), 2);
}

#[tokio::test]
async fn test_explicit_position_overrides_session_store() {
    let generator = Arc::new(MockGeneration::failing_first("unused", 2));
    let (engine, sessions) = engine_with(test_config(), generator);
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    sessions.set_position("s1", position(1));

    let mut req = request("what storm is this");
    req.position = Some(position(6));
    let explanation = engine.explain(&req).await.unwrap();
    // The degraded fallback exposes the top-ranked chunk: page 6, not the
    // stored page-1 position's nearest storm on page 4.
    assert_eq!(explanation.content, "The storm struck hard.");
    assert_eq!(explanation.citations, vec!["1:6"]);
}

#[tokio::test]
async fn test_history_flows_into_the_next_prompt() {
    let generator = Arc::new(MockGeneration::new("The storm struck [S1]."));
    let (engine, sessions) = engine_with(test_config(), generator.clone());
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    sessions.set_position("s1", position(6));

    engine.explain(&request("what storm is this")).await.unwrap();
    let first_prompt = generator.last_system_prompt().unwrap();
    assert!(!first_prompt.contains("Earlier in this conversation"));

    engine.explain(&request("did the storm pass")).await.unwrap();
    let second_prompt = generator.last_system_prompt().unwrap();
    assert!(second_prompt.contains("Earlier in this conversation"));
    assert!(second_prompt.contains("what storm is this"));
}

#[tokio::test]
async fn test_sessions_do_not_share_history() {
    let generator = Arc::new(MockGeneration::new("The storm struck [S1]."));
    let (engine, sessions) = engine_with(test_config(), generator.clone());
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    sessions.set_position("s1", position(6));
    sessions.set_position("s2", position(6));

    engine.explain(&request("what storm is this")).await.unwrap();

    let mut other = request("did the storm pass");
    other.session_id = "s2".to_string();
    engine.explain(&other).await.unwrap();
    let prompt = generator.last_system_prompt().unwrap();
    assert!(!prompt.contains("Earlier in this conversation"));
}

#[tokio::test]
async fn test_timeout_leaves_memory_untouched() {
    let mut generator = MockGeneration::new("The storm struck [S1].");
    generator.delay_first = 1;
    generator.delay = Duration::from_millis(200);
    let generator = Arc::new(generator);

    let mut config = test_config();
    config.engine.request_timeout_ms = 50;
    let (engine, sessions) = engine_with(config, generator.clone());
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    sessions.set_position("s1", position(6));

    let err = engine.explain(&request("what storm is this")).await.unwrap_err();
    assert!(matches!(err, ExplanationError::Timeout));

    // Only the first call was slow; this one succeeds within the deadline
    // and sees no history because the timed-out request recorded nothing.
    engine.explain(&request("did the storm pass")).await.unwrap();
    let prompt = generator.last_system_prompt().unwrap();
    assert!(!prompt.contains("Earlier in this conversation"));
}

#[tokio::test]
async fn test_remove_book_forgets_it() {
    let (engine, _) = engine_with(test_config(), Arc::new(MockGeneration::new("ok")));
    engine.ingest("harbor", HARBOR_BOOK).await.unwrap();
    engine.remove_book("harbor").await.unwrap();

    let err = engine
        .retrieve("harbor", "storm", &position(6), 3)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::UnknownBook(_)));
}
