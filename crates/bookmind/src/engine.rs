//! The explanation engine: ingestion, retrieval, and orchestration.
//!
//! [`Engine`] wires the pure core pipeline to its collaborators — an
//! embedding service, a generation service, a reading-position store —
//! and enforces the request deadline and the retry-then-degrade policy
//! around generation.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use bookmind_core::chunk::chunk_book;
use bookmind_core::citation::{confidence, review_citations};
use bookmind_core::context::assemble;
use bookmind_core::retrieval::rank_candidates;
use bookmind_core::{
    ComplexityLevel, Explanation, ExplanationError, IndexError, IngestError, InMemoryIndex,
    IndexedChunk, ReadingPosition, RetrievalCandidate, RetrievalError, VectorIndex,
};

use crate::config::Config;
use crate::embedding::{embed_query, EmbeddingService};
use crate::generation::GenerationService;
use crate::prompt::{build_request, summarize_response};
use crate::session::{ReadingSessionStore, SessionRegistry};

/// Words kept when condensing a response into a memory turn summary.
const SUMMARY_WORDS: usize = 50;

/// Outcome of ingesting one book.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub book_id: String,
    pub chunk_count: usize,
    pub token_total: usize,
    pub embedding_model: String,
}

/// One explanation request from a reader.
#[derive(Debug, Clone)]
pub struct ExplainRequest {
    pub book_id: String,
    pub session_id: String,
    pub query: String,
    pub complexity: ComplexityLevel,
    pub allow_external_knowledge: bool,
    /// Explicit reader position; when `None`, the session store's
    /// position for `session_id` is used (start of book if absent).
    pub position: Option<ReadingPosition>,
}

/// The retrieval-augmented explanation engine.
///
/// One engine owns one logical index. Cheap to share behind an `Arc`;
/// all methods take `&self`.
pub struct Engine {
    config: Config,
    index: Arc<InMemoryIndex>,
    embedder: Arc<dyn EmbeddingService>,
    generator: Arc<dyn GenerationService>,
    sessions: Arc<dyn ReadingSessionStore>,
    registry: SessionRegistry,
}

impl Engine {
    /// Assemble an engine from explicit collaborators.
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingService>,
        generator: Arc<dyn GenerationService>,
        sessions: Arc<dyn ReadingSessionStore>,
    ) -> Self {
        let registry = SessionRegistry::new(config.memory.capacity);
        Self {
            config,
            index: Arc::new(InMemoryIndex::new()),
            embedder,
            generator,
            sessions,
            registry,
        }
    }

    /// Assemble an engine with collaborators built from the configuration.
    pub fn from_config(
        config: Config,
        sessions: Arc<dyn ReadingSessionStore>,
    ) -> anyhow::Result<Self> {
        let embedder = crate::embedding::create_embedding_service(&config.embedding)?;
        let generator = crate::generation::create_generation_service(&config.generation)?;
        Ok(Self::new(config, embedder, generator, sessions))
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.engine.request_timeout_ms)
    }

    /// Chunk, embed, and index a book from normalized marker-annotated text.
    ///
    /// Replaces any previous entry for `book_id` in a single atomic write;
    /// any failure before that write leaves the index untouched.
    pub async fn ingest(&self, book_id: &str, text: &str) -> Result<IngestReport, IngestError> {
        let chunks = chunk_book(
            book_id,
            text,
            self.config.chunking.max_tokens,
            self.config.chunking.overlap_tokens,
        )?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| IngestError::EmbeddingUnavailable(e.to_string()))?;
        if vectors.len() != chunks.len() {
            return Err(IngestError::EmbeddingUnavailable(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let chunk_count = chunks.len();
        let token_total = chunks.iter().map(|c| c.token_count).sum();
        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk { chunk, vector })
            .collect();

        self.index.insert_book(book_id, indexed).await?;

        tracing::info!(book_id, chunk_count, token_total, "book ingested");

        Ok(IngestReport {
            book_id: book_id.to_string(),
            chunk_count,
            token_total,
            embedding_model: self.embedder.model_name().to_string(),
        })
    }

    /// Drop a book from the index. Idempotent.
    pub async fn remove_book(&self, book_id: &str) -> Result<(), IndexError> {
        self.index.remove_book(book_id).await
    }

    /// Position-aware retrieval of the top `k` candidates for a query.
    pub async fn retrieve(
        &self,
        book_id: &str,
        query: &str,
        position: &ReadingPosition,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
        tokio::time::timeout(
            self.request_timeout(),
            self.retrieve_inner(book_id, query, position, k),
        )
        .await
        .map_err(|_| RetrievalError::Timeout)?
    }

    async fn retrieve_inner(
        &self,
        book_id: &str,
        query: &str,
        position: &ReadingPosition,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
        // A position from another book lives in a different sequence
        // space; fall back to the start of this book instead of using it.
        let effective = if position.book_id == book_id {
            position.clone()
        } else {
            tracing::warn!(
                book_id,
                position_book = %position.book_id,
                "reading position belongs to a different book, ignoring it"
            );
            ReadingPosition {
                book_id: book_id.to_string(),
                chapter: 0,
                page: 0,
                paragraph: 0,
            }
        };

        let position_seq = self
            .index
            .resolve_position(book_id, &effective)
            .await
            .map_err(|_| RetrievalError::UnknownBook(book_id.to_string()))?
            .ok_or_else(|| RetrievalError::UnknownBook(book_id.to_string()))?;

        let query_vector = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(|e| RetrievalError::EmbeddingUnavailable(e.to_string()))?;

        let params = self.config.retrieval.ranking_params();
        let fetch = k.max(1) * params.candidate_multiplier.max(1);
        let scored = self
            .index
            .query(book_id, &query_vector, fetch)
            .await
            .map_err(|_| RetrievalError::UnknownBook(book_id.to_string()))?;

        rank_candidates(&scored, position_seq, query, k, &params)
    }

    /// Produce a grounded, cited explanation for a reader question.
    ///
    /// Requests for the same session serialize on that session's memory
    /// lock. The conversation turn is recorded only after a successful
    /// (possibly degraded) explanation; timeouts and errors leave the
    /// memory untouched.
    pub async fn explain(&self, request: &ExplainRequest) -> Result<Explanation, ExplanationError> {
        let memory_handle = self.registry.memory(&request.session_id);
        let mut memory = memory_handle.lock().await;

        let result = tokio::time::timeout(
            self.request_timeout(),
            self.explain_inner(request, &mut memory),
        )
        .await
        .map_err(|_| ExplanationError::Timeout)?;

        result
    }

    async fn explain_inner(
        &self,
        request: &ExplainRequest,
        memory: &mut bookmind_core::ConversationMemory,
    ) -> Result<Explanation, ExplanationError> {
        let position = request
            .position
            .clone()
            .or_else(|| {
                self.sessions
                    .position(&request.session_id)
                    .filter(|p| p.book_id == request.book_id)
            })
            .unwrap_or_else(|| ReadingPosition {
                book_id: request.book_id.clone(),
                chapter: 0,
                page: 0,
                paragraph: 0,
            });

        let k = self.config.retrieval.final_k;
        let candidates = match self
            .retrieve_inner(&request.book_id, &request.query, &position, k)
            .await
        {
            Ok(candidates) => candidates,
            Err(RetrievalError::NoRelevantContent { best_similarity }) => {
                tracing::debug!(
                    book_id = %request.book_id,
                    best_similarity,
                    "query not answerable from book content"
                );
                return Err(ExplanationError::NotInBook);
            }
            Err(e) => return Err(ExplanationError::Retrieval(e)),
        };

        let mut chunks = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let chunk = self
                .index
                .get_chunk(&request.book_id, &candidate.chunk_id)
                .await
                .map_err(|_| {
                    ExplanationError::Retrieval(RetrievalError::UnknownBook(
                        request.book_id.clone(),
                    ))
                })?;
            if let Some(chunk) = chunk {
                chunks.push(chunk);
            }
        }

        let context = assemble(
            &request.book_id,
            &chunks,
            memory,
            &self.config.context.assembly_params(),
        );

        let prompt = build_request(
            &request.query,
            &context,
            request.complexity,
            request.allow_external_knowledge,
        );

        // One retry after a short backoff, then degrade. Never a third call.
        let response = match self.generator.generate(&prompt).await {
            Ok(text) => Some(text),
            Err(first) => {
                tracing::warn!(error = %first, "generation failed, retrying once");
                tokio::time::sleep(Duration::from_millis(self.config.engine.retry_backoff_ms))
                    .await;
                self.generator.generate(&prompt).await.ok()
            }
        };

        let explanation = match response {
            Some(text) => {
                let review = review_citations(&text, &context);
                let score = confidence(&review, request.allow_external_knowledge);
                let cited_chunk_ids = cited_chunk_ids(&context, &review.citations);
                let explanation = Explanation {
                    content: review.content,
                    citations: review.citations,
                    confidence: score,
                    complexity: request.complexity,
                    degraded: false,
                };
                record_turn(memory, request, &explanation, cited_chunk_ids);
                explanation
            }
            None => {
                let unit = context
                    .units
                    .first()
                    .ok_or_else(|| {
                        ExplanationError::GenerationUnavailable(
                            "no context available for fallback".to_string(),
                        )
                    })?;
                tracing::warn!(
                    book_id = %request.book_id,
                    "generation failed twice, returning raw passage"
                );
                let explanation = Explanation {
                    content: unit.text.clone(),
                    citations: vec![unit.locator.clone()],
                    confidence: 0.25,
                    complexity: request.complexity,
                    degraded: true,
                };
                record_turn(memory, request, &explanation, unit.chunk_ids.clone());
                explanation
            }
        };

        Ok(explanation)
    }
}

/// Chunk ids of the context units whose locators were actually cited.
fn cited_chunk_ids(
    context: &bookmind_core::AssembledContext,
    citations: &[String],
) -> Vec<String> {
    context
        .units
        .iter()
        .filter(|u| citations.contains(&u.locator))
        .flat_map(|u| u.chunk_ids.iter().cloned())
        .collect()
}

fn record_turn(
    memory: &mut bookmind_core::ConversationMemory,
    request: &ExplainRequest,
    explanation: &Explanation,
    referenced_chunk_ids: Vec<String>,
) {
    memory.push(bookmind_core::ConversationTurn {
        query_text: request.query.clone(),
        response_summary: summarize_response(&explanation.content, SUMMARY_WORDS),
        referenced_chunk_ids,
        timestamp: chrono::Utc::now(),
    });
}
