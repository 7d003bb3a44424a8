//! Error taxonomy for the explanation engine.
//!
//! Ingestion errors are always surfaced with no partial state left behind.
//! Retrieval and explanation prefer graceful degradation over raising,
//! with one deliberate exception: when the best candidate's similarity is
//! below the floor, the caller must be told no grounded answer exists
//! rather than receiving fabricated grounding.

use thiserror::Error;

/// Failures while turning normalized book text into an indexed chunk set.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Chapter/page markers are inconsistent or the text is unusable.
    /// Rejected before anything reaches the index.
    #[error("malformed book structure: {reason}")]
    MalformedStructure { reason: String },

    /// The embedding collaborator failed; any vectors already computed
    /// for this book are discarded.
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Failures inside the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A vector's dimensionality disagrees with the rest of the book.
    /// The book is rejected at insert time so queries can never observe
    /// a corrupt entry.
    #[error("embedding dimension mismatch for book {book_id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        book_id: String,
        expected: usize,
        actual: usize,
    },

    /// Sequence indices are not `0, 1, 2, …` after sorting; a gapped or
    /// duplicated chunk set would break position-distance arithmetic.
    #[error("non-contiguous sequence for book {book_id}: expected {expected}, got {actual}")]
    NonContiguousSequence {
        book_id: String,
        expected: u32,
        actual: u32,
    },

    #[error("empty chunk set for book {0}")]
    EmptyBook(String),
}

/// Failures while ranking candidates for a query.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// No chunk cleared the minimum similarity floor. The caller should
    /// fall back to a "cannot answer from book content" response instead
    /// of generating over ungrounded context.
    #[error("no sufficiently similar book content (best similarity {best_similarity:.3})")]
    NoRelevantContent { best_similarity: f32 },

    #[error("book {0} is not in the index")]
    UnknownBook(String),

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("retrieval timed out")]
    Timeout,
}

/// Failures while producing an explanation.
#[derive(Debug, Error)]
pub enum ExplanationError {
    /// Retrieval found nothing grounded to explain from.
    #[error("cannot answer from book content")]
    NotInBook,

    /// The generation collaborator failed twice; no degraded fallback
    /// was possible either.
    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("explanation timed out")]
    Timeout,
}
