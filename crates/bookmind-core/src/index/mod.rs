//! Vector index abstraction for Bookmind.
//!
//! The [`VectorIndex`] trait defines the per-book storage operations the
//! retrieval pipeline needs, enabling pluggable backends. The in-memory
//! implementation in [`memory`] is the one the engine ships with.
//!
//! A book becomes queryable only once all of its chunks are inserted in a
//! single call; readers observe either the pre- or post-ingestion state,
//! never a partial one. Retrieval never crosses book boundaries: every
//! operation is scoped to a `book_id`.

pub mod memory;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{Chunk, ReadingPosition};

/// A chunk paired with its embedding, ready for insertion.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A similarity-scored chunk returned from [`VectorIndex::query`].
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub sequence_index: u32,
    pub similarity: f32,
    /// Chunk text, carried so ranking can break ties on lexical overlap
    /// without a second lookup.
    pub text: String,
}

/// Abstract per-book vector storage.
///
/// Implementations must be `Send + Sync`; concurrent queries from many
/// sessions run in parallel, while inserts and removals for a book are
/// serialized against each other and against that book's queries.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Atomically replace a book's chunk set and vectors.
    ///
    /// Validates that every vector has the same nonzero dimensionality
    /// and that sequence indices are contiguous from 0; a rejected book
    /// leaves the previous entry (if any) untouched.
    async fn insert_book(&self, book_id: &str, chunks: Vec<IndexedChunk>) -> Result<(), IndexError>;

    /// Top-`k` chunks of `book_id` by cosine similarity to `vector`,
    /// ties broken by ascending `sequence_index`. Unknown books yield an
    /// empty result; a query vector whose dimensionality disagrees with
    /// the book's stored vectors is rejected.
    async fn query(&self, book_id: &str, vector: &[f32], k: usize)
        -> Result<Vec<ScoredChunk>, IndexError>;

    /// Drop a book and all of its vectors.
    async fn remove_book(&self, book_id: &str) -> Result<(), IndexError>;

    /// Fetch one chunk by id.
    async fn get_chunk(&self, book_id: &str, chunk_id: &str) -> Result<Option<Chunk>, IndexError>;

    /// Number of chunks stored for a book (0 if unknown).
    async fn chunk_count(&self, book_id: &str) -> Result<usize, IndexError>;

    /// Map a reader position to the sequence index of the first chunk at
    /// or after its chapter/page; the last chunk when the position is
    /// past the end; `None` for unknown books.
    async fn resolve_position(
        &self,
        book_id: &str,
        position: &ReadingPosition,
    ) -> Result<Option<u32>, IndexError>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
