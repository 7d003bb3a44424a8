//! In-memory [`VectorIndex`] implementation.
//!
//! A `HashMap` keyed by book id behind `std::sync::RwLock`: queries from
//! many sessions share the read lock, while `insert_book`/`remove_book`
//! take the write lock, so readers see either the pre- or post-ingestion
//! state of a book, never a partial one. Vector search is brute-force
//! cosine similarity over the book's chunks.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{Chunk, ReadingPosition};

use super::{cosine_similarity, IndexedChunk, ScoredChunk, VectorIndex};

struct BookEntry {
    dims: usize,
    /// Sorted by `sequence_index`.
    chunks: Vec<IndexedChunk>,
}

/// In-memory, single-process vector index.
pub struct InMemoryIndex {
    books: RwLock<HashMap<String, BookEntry>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn insert_book(
        &self,
        book_id: &str,
        mut chunks: Vec<IndexedChunk>,
    ) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::EmptyBook(book_id.to_string()));
        }

        chunks.sort_by_key(|c| c.chunk.sequence_index);

        for (i, c) in chunks.iter().enumerate() {
            if c.chunk.sequence_index != i as u32 {
                return Err(IndexError::NonContiguousSequence {
                    book_id: book_id.to_string(),
                    expected: i as u32,
                    actual: c.chunk.sequence_index,
                });
            }
        }

        let dims = chunks[0].vector.len();
        for c in &chunks {
            if c.vector.len() != dims || dims == 0 {
                return Err(IndexError::DimensionMismatch {
                    book_id: book_id.to_string(),
                    expected: dims,
                    actual: c.vector.len(),
                });
            }
        }

        // Single write: the book flips from old state to new in one step.
        let mut books = self.books.write().unwrap();
        books.insert(book_id.to_string(), BookEntry { dims, chunks });
        Ok(())
    }

    async fn query(
        &self,
        book_id: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let books = self.books.read().unwrap();
        let entry = match books.get(book_id) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        if vector.len() != entry.dims {
            return Err(IndexError::DimensionMismatch {
                book_id: book_id.to_string(),
                expected: entry.dims,
                actual: vector.len(),
            });
        }

        let mut scored: Vec<ScoredChunk> = entry
            .chunks
            .iter()
            .map(|c| ScoredChunk {
                chunk_id: c.chunk.chunk_id.clone(),
                sequence_index: c.chunk.sequence_index,
                similarity: cosine_similarity(vector, &c.vector),
                text: c.chunk.text.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.sequence_index.cmp(&b.sequence_index))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn remove_book(&self, book_id: &str) -> Result<(), IndexError> {
        let mut books = self.books.write().unwrap();
        books.remove(book_id);
        Ok(())
    }

    async fn get_chunk(&self, book_id: &str, chunk_id: &str) -> Result<Option<Chunk>, IndexError> {
        let books = self.books.read().unwrap();
        Ok(books.get(book_id).and_then(|entry| {
            entry
                .chunks
                .iter()
                .find(|c| c.chunk.chunk_id == chunk_id)
                .map(|c| c.chunk.clone())
        }))
    }

    async fn chunk_count(&self, book_id: &str) -> Result<usize, IndexError> {
        let books = self.books.read().unwrap();
        Ok(books.get(book_id).map(|e| e.chunks.len()).unwrap_or(0))
    }

    async fn resolve_position(
        &self,
        book_id: &str,
        position: &ReadingPosition,
    ) -> Result<Option<u32>, IndexError> {
        let books = self.books.read().unwrap();
        let entry = match books.get(book_id) {
            Some(e) => e,
            None => return Ok(None),
        };

        let at = (position.chapter, position.page);
        let found = entry
            .chunks
            .iter()
            .find(|c| (c.chunk.chapter, c.chunk.page) >= at)
            .or_else(|| entry.chunks.last())
            .map(|c| c.chunk.sequence_index);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn make_chunk(book_id: &str, seq: u32, chapter: u32, page: u32, text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("{}-{}", book_id, seq),
            book_id: book_id.to_string(),
            sequence_index: seq,
            text: text.to_string(),
            token_count: text.split_whitespace().count(),
            chapter,
            page,
            section_title: None,
        }
    }

    fn indexed(book_id: &str, seq: u32, vector: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: make_chunk(book_id, seq, 1, seq + 1, "some chunk text"),
            vector,
        }
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index
            .insert_book(
                "b1",
                vec![
                    indexed("b1", 0, vec![1.0, 0.0]),
                    indexed("b1", 1, vec![0.0, 1.0]),
                    indexed("b1", 2, vec![0.7, 0.7]),
                ],
            )
            .await
            .unwrap();

        let results = index.query("b1", &[1.0, 0.0], 3).await.unwrap();
        assert_eq!(results[0].chunk_id, "b1-0");
        assert_eq!(results[1].chunk_id, "b1-2");
        assert_eq!(results[2].chunk_id, "b1-1");
    }

    #[tokio::test]
    async fn test_ties_break_by_sequence() {
        let index = InMemoryIndex::new();
        index
            .insert_book(
                "b1",
                vec![
                    indexed("b1", 2, vec![1.0, 0.0]),
                    indexed("b1", 0, vec![1.0, 0.0]),
                    indexed("b1", 1, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let results = index.query("b1", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].sequence_index, 0);
        assert_eq!(results[1].sequence_index, 2);
    }

    #[tokio::test]
    async fn test_books_are_isolated() {
        let index = InMemoryIndex::new();
        index
            .insert_book("b1", vec![indexed("b1", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .insert_book("b2", vec![indexed("b2", 0, vec![1.0, 0.0])])
            .await
            .unwrap();

        let results = index.query("b1", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "b1-0");
    }

    #[tokio::test]
    async fn test_unknown_book_empty() {
        let index = InMemoryIndex::new();
        assert!(index.query("nope", &[1.0], 5).await.unwrap().is_empty());
        assert_eq!(index.chunk_count("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = InMemoryIndex::new();
        let err = index
            .insert_book(
                "b1",
                vec![
                    indexed("b1", 0, vec![1.0, 0.0]),
                    indexed("b1", 1, vec![1.0, 0.0, 0.5]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        // Rejection leaves no trace.
        assert_eq!(index.chunk_count("b1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gapped_sequence_rejected() {
        let index = InMemoryIndex::new();
        let err = index
            .insert_book(
                "b1",
                vec![
                    indexed("b1", 0, vec![1.0, 0.0]),
                    indexed("b1", 2, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::NonContiguousSequence {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert_eq!(index.chunk_count("b1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_rejected() {
        let index = InMemoryIndex::new();
        let err = index
            .insert_book(
                "b1",
                vec![
                    indexed("b1", 0, vec![1.0, 0.0]),
                    indexed("b1", 0, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::NonContiguousSequence { .. }));
    }

    #[tokio::test]
    async fn test_query_vector_dims_checked() {
        let index = InMemoryIndex::new();
        index
            .insert_book("b1", vec![indexed("b1", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        let err = index.query("b1", &[1.0, 0.0, 0.5], 5).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reinsert_replaces() {
        let index = InMemoryIndex::new();
        index
            .insert_book(
                "b1",
                vec![
                    indexed("b1", 0, vec![1.0, 0.0]),
                    indexed("b1", 1, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        index
            .insert_book("b1", vec![indexed("b1", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(index.chunk_count("b1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_book() {
        let index = InMemoryIndex::new();
        index
            .insert_book("b1", vec![indexed("b1", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        index.remove_book("b1").await.unwrap();
        assert_eq!(index.chunk_count("b1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resolve_position() {
        let index = InMemoryIndex::new();
        let chunks = vec![
            IndexedChunk {
                chunk: make_chunk("b1", 0, 1, 1, "a"),
                vector: vec![1.0],
            },
            IndexedChunk {
                chunk: make_chunk("b1", 1, 1, 5, "b"),
                vector: vec![1.0],
            },
            IndexedChunk {
                chunk: make_chunk("b1", 2, 2, 9, "c"),
                vector: vec![1.0],
            },
        ];
        index.insert_book("b1", chunks).await.unwrap();

        let pos = |chapter, page| ReadingPosition {
            book_id: "b1".to_string(),
            chapter,
            page,
            paragraph: 1,
        };

        assert_eq!(index.resolve_position("b1", &pos(1, 3)).await.unwrap(), Some(1));
        assert_eq!(index.resolve_position("b1", &pos(2, 9)).await.unwrap(), Some(2));
        // Past the end clamps to the last chunk.
        assert_eq!(index.resolve_position("b1", &pos(7, 99)).await.unwrap(), Some(2));
        assert_eq!(index.resolve_position("zzz", &pos(1, 1)).await.unwrap(), None);
    }
}
