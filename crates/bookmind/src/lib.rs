//! # Bookmind
//!
//! A retrieval-augmented explanation engine for reader questions about
//! books. The pure pipeline (chunking, indexing, ranking, context
//! assembly, citation review) lives in `bookmind-core`; this crate wires
//! it to HTTP embedding/generation providers, TOML configuration, and
//! per-session conversation state, exposing the whole thing as
//! [`engine::Engine`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────── bookmind ──────────────────────────┐
//! │  config      TOML + validation                               │
//! │  embedding   EmbeddingService (OpenAI-compatible, batched)   │
//! │  generation  GenerationService (chat completions)            │
//! │  session     reading positions + per-session memory locks    │
//! │  prompt      [S<n>]-tagged prompt construction               │
//! │  engine      ingest / retrieve / explain orchestration       │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//!                        bookmind-core
//!          chunk · index · retrieval · context · citation · memory
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use bookmind::config::Config;
//! # use bookmind::engine::Engine;
//! # use bookmind::session::InMemorySessionStore;
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let sessions = Arc::new(InMemorySessionStore::new());
//! let engine = Engine::from_config(config, sessions)?;
//! let report = engine.ingest("moby-dick", "[[chapter:1]]\nCall me Ishmael.").await?;
//! println!("indexed {} chunks", report.chunk_count);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod prompt;
pub mod session;

pub use config::{load_config, Config};
pub use engine::{Engine, ExplainRequest, IngestReport};
pub use session::{InMemorySessionStore, ReadingSessionStore, SessionRegistry};

// Re-export the core surface so embedding hosts need only one crate.
pub use bookmind_core::{
    ComplexityLevel, ConversationMemory, Explanation, ExplanationError, IngestError,
    ReadingPosition, RetrievalCandidate, RetrievalError,
};
