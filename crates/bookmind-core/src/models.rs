//! Core data models used throughout Bookmind.
//!
//! These types represent the chunks, positions, candidates, and results
//! that flow through the ingestion and explanation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An indexed, bounded unit of book text with position metadata.
///
/// Chunks are immutable once created: `chunk_id` is a content-derived
/// hash (see [`crate::chunk`]), so re-ingesting identical text yields an
/// identical chunk set. The embedding vector lives in the index, next to
/// the chunk, and is computed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub book_id: String,
    /// Monotonic, contiguous position within the book, starting at 0.
    pub sequence_index: u32,
    pub text: String,
    /// Approximate token count (whitespace-separated words).
    pub token_count: usize,
    pub chapter: u32,
    pub page: u32,
    pub section_title: Option<String>,
}

impl Chunk {
    /// The citation locator for this chunk, `chapter:page`.
    pub fn locator(&self) -> String {
        format!("{}:{}", self.chapter, self.page)
    }
}

/// The reader's current location in a book.
///
/// Supplied by the external session collaborator; read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPosition {
    pub book_id: String,
    pub chapter: u32,
    pub page: u32,
    pub paragraph: u32,
}

/// A ranked retrieval result for one chunk.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalCandidate {
    pub chunk_id: String,
    pub sequence_index: u32,
    /// Raw cosine similarity against the query embedding.
    pub similarity_score: f32,
    /// Multiplier from reader-position proximity (1.0 outside the window).
    pub position_boost: f32,
    /// `similarity_score × position_boost`.
    pub final_score: f32,
}

/// One prior query/response exchange in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query_text: String,
    pub response_summary: String,
    /// Chunk ids the response was grounded in; used for coreference
    /// lookups by the context assembler.
    pub referenced_chunk_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Requested depth and register of an explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Simple,
    Detailed,
    Technical,
}

impl ComplexityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Simple => "simple",
            ComplexityLevel::Detailed => "detailed",
            ComplexityLevel::Technical => "technical",
        }
    }
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A citation unit inside an [`AssembledContext`]: one chunk, or a run of
/// adjacent chunks merged to avoid repeating overlap text.
#[derive(Debug, Clone, Serialize)]
pub struct ContextUnit {
    /// Chunk ids in sequence order.
    pub chunk_ids: Vec<String>,
    pub first_sequence_index: u32,
    pub text: String,
    pub token_count: usize,
    /// `chapter:page` of the unit's first chunk.
    pub locator: String,
}

/// The token-budgeted input handed to the generation collaborator.
///
/// Invariant: `token_count ≤ token_budget`, always.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub book_id: String,
    pub units: Vec<ContextUnit>,
    pub history: Vec<ConversationTurn>,
    pub token_budget: usize,
    pub token_count: usize,
}

/// A grounded, cited explanation returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub content: String,
    /// Locators of context units the response actually cited.
    pub citations: Vec<String>,
    /// Fraction of response sentences with at least one valid grounding
    /// citation, in `[0, 1]`. Heuristic, not a calibrated probability.
    pub confidence: f32,
    pub complexity: ComplexityLevel,
    /// True when generation failed twice and the engine fell back to the
    /// top-ranked chunk's raw text.
    pub degraded: bool,
}
