//! # Bookmind Core
//!
//! Pure, runtime-free logic for Bookmind: data models, the book chunker,
//! vector index abstraction, position-aware ranking, token-budgeted
//! context assembly, citation scoring, and conversation memory.
//!
//! This crate contains no tokio, HTTP, filesystem I/O, or other
//! native-only dependencies. The application crate (`bookmind`) wires
//! these pieces to external embedding and generation collaborators.
//!
//! ## Pipeline
//!
//! ```text
//! ingestion:  text ──chunk──▶ Chunks ──embed──▶ VectorIndex
//!
//! query:      query ──embed──▶ index.query ──rank──▶ candidates
//!                 ──assemble (+ ConversationMemory)──▶ AssembledContext
//!                 ──generate──▶ review_citations ──▶ Explanation
//! ```

pub mod chunk;
pub mod citation;
pub mod context;
pub mod error;
pub mod index;
pub mod memory;
pub mod models;
pub mod retrieval;

pub use error::{ExplanationError, IndexError, IngestError, RetrievalError};
pub use index::memory::InMemoryIndex;
pub use index::{IndexedChunk, ScoredChunk, VectorIndex};
pub use memory::ConversationMemory;
pub use models::{
    AssembledContext, Chunk, ComplexityLevel, ContextUnit, ConversationTurn, Explanation,
    ReadingPosition, RetrievalCandidate,
};
