//! Reading sessions: position tracking and per-session memory handles.
//!
//! The engine never writes reading positions; hosts report them through
//! a [`ReadingSessionStore`]. Conversation memory, by contrast, is owned
//! here: [`SessionRegistry`] hands out one `Arc<tokio::sync::Mutex<_>>`
//! per session id, so racing requests for the same session serialize on
//! that lock and turn order stays deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use bookmind_core::{ConversationMemory, ReadingPosition};

/// Read-only source of reader positions, keyed by session id.
///
/// Implementations must be cheap to call; the engine consults the store
/// once per request.
pub trait ReadingSessionStore: Send + Sync {
    fn position(&self, session_id: &str) -> Option<ReadingPosition>;
}

/// In-memory position store for embedding hosts and tests.
#[derive(Default)]
pub struct InMemorySessionStore {
    positions: RwLock<HashMap<String, ReadingPosition>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the reader's position for a session, replacing any prior one.
    pub fn set_position(&self, session_id: &str, position: ReadingPosition) {
        let mut positions = self
            .positions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        positions.insert(session_id.to_string(), position);
    }
}

impl ReadingSessionStore for InMemorySessionStore {
    fn position(&self, session_id: &str) -> Option<ReadingPosition> {
        let positions = self
            .positions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        positions.get(session_id).cloned()
    }
}

/// Handle to one session's conversation memory.
pub type MemoryHandle = Arc<tokio::sync::Mutex<ConversationMemory>>;

/// Maps session ids to their conversation memory.
///
/// The outer lock only guards the map; each memory has its own async
/// mutex, held across the whole explanation flow for that session.
pub struct SessionRegistry {
    capacity: usize,
    memories: Mutex<HashMap<String, MemoryHandle>>,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            memories: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the memory handle for a session, creating it on first use.
    pub fn memory(&self, session_id: &str) -> MemoryHandle {
        let mut memories = self
            .memories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        memories
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(ConversationMemory::new(self.capacity))))
            .clone()
    }

    /// Drop a session's memory entirely.
    pub fn remove(&self, session_id: &str) {
        let mut memories = self
            .memories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        memories.remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        let memories = self
            .memories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        memories.len()
    }
}
