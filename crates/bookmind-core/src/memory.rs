//! Bounded per-session conversation history.
//!
//! A fixed-capacity FIFO queue of [`ConversationTurn`]s. The assembler
//! uses [`ConversationMemory::relevant`] to pull turns that referenced
//! the chunks now under discussion, which is what lets "explain this
//! again, simpler" resolve to the right passage.

use std::collections::VecDeque;

use crate::models::ConversationTurn;

/// Fixed-capacity conversation history for one reading session.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    capacity: usize,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationMemory {
    /// Create a memory holding at most `capacity` turns (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            turns: VecDeque::new(),
        }
    }

    /// Record a turn, evicting exactly the oldest when at capacity.
    pub fn push(&mut self, turn: ConversationTurn) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Turns whose `referenced_chunk_ids` intersect `chunk_ids`, oldest
    /// first.
    pub fn relevant(&self, chunk_ids: &[String]) -> Vec<&ConversationTurn> {
        self.turns
            .iter()
            .filter(|t| t.referenced_chunk_ids.iter().any(|id| chunk_ids.contains(id)))
            .collect()
    }

    /// The most recent `m` turns, oldest first.
    pub fn recent(&self, m: usize) -> Vec<&ConversationTurn> {
        let skip = self.turns.len().saturating_sub(m);
        self.turns.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(query: &str, chunk_ids: &[&str]) -> ConversationTurn {
        ConversationTurn {
            query_text: query.to_string(),
            response_summary: format!("summary of {}", query),
            referenced_chunk_ids: chunk_ids.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut mem = ConversationMemory::new(20);
        for i in 0..30 {
            mem.push(turn(&format!("q{}", i), &["c1"]));
        }
        assert_eq!(mem.len(), 20);
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut mem = ConversationMemory::new(20);
        mem.push(turn("first", &["only-in-first"]));
        for i in 1..20 {
            mem.push(turn(&format!("q{}", i), &["shared"]));
        }
        assert_eq!(mem.len(), 20);

        // The 21st turn evicts exactly turn #1.
        mem.push(turn("q21", &["shared"]));
        assert_eq!(mem.len(), 20);
        let hits = mem.relevant(&["only-in-first".to_string()]);
        assert!(hits.is_empty());
        assert_eq!(mem.relevant(&["shared".to_string()]).len(), 20);
    }

    #[test]
    fn test_relevant_intersects() {
        let mut mem = ConversationMemory::new(5);
        mem.push(turn("a", &["c1", "c2"]));
        mem.push(turn("b", &["c3"]));
        mem.push(turn("c", &[]));

        let hits = mem.relevant(&["c2".to_string(), "c9".to_string()]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].query_text, "a");
    }

    #[test]
    fn test_recent_ordering() {
        let mut mem = ConversationMemory::new(5);
        for q in ["a", "b", "c", "d"] {
            mem.push(turn(q, &[]));
        }
        let recent: Vec<_> = mem.recent(2).iter().map(|t| t.query_text.clone()).collect();
        assert_eq!(recent, vec!["c", "d"]);
        assert_eq!(mem.recent(10).len(), 4);
    }
}
