//! Token-budgeted context assembly.
//!
//! Turns ranked chunks and relevant conversation history into the
//! [`AssembledContext`] handed to generation. History goes in first under
//! its own reserved sub-budget (it is short and required for coreference
//! resolution: "explain *this*"), then chunks are added greedily in rank
//! order. Adjacent chunks merge into one citation unit with their overlap
//! text deduplicated, so the model never sees the same sentences twice
//! under two different tags.
//!
//! Deterministic for identical inputs, and the total token count never
//! exceeds `token_budget`.

use crate::chunk::count_tokens;
use crate::memory::ConversationMemory;
use crate::models::{AssembledContext, Chunk, ContextUnit, ConversationTurn};

/// Assembly tuning parameters.
#[derive(Debug, Clone)]
pub struct AssemblyParams {
    /// Combined budget for history and chunks, in tokens.
    pub token_budget: usize,
    /// Sub-budget reserved for history turns, filled before chunks.
    pub history_budget: usize,
    /// Most recent turns always considered, beyond chunk-relevant ones.
    pub recent_turns: usize,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            token_budget: 2000,
            history_budget: 300,
            recent_turns: 2,
        }
    }
}

/// Assemble a context from chunks in rank order plus session history.
pub fn assemble(
    book_id: &str,
    ranked_chunks: &[Chunk],
    memory: &ConversationMemory,
    params: &AssemblyParams,
) -> AssembledContext {
    let candidate_ids: Vec<String> = ranked_chunks.iter().map(|c| c.chunk_id.clone()).collect();

    // History first: turns that referenced these chunks, plus the most
    // recent ones, deduplicated, oldest first, within the sub-budget.
    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut history_tokens = 0usize;
    let mut selected: Vec<&ConversationTurn> = memory.relevant(&candidate_ids);
    for turn in memory.recent(params.recent_turns) {
        if !selected
            .iter()
            .any(|t| t.timestamp == turn.timestamp && t.query_text == turn.query_text)
        {
            selected.push(turn);
        }
    }
    selected.sort_by_key(|t| t.timestamp);
    for turn in selected {
        let cost = turn_tokens(turn);
        if history_tokens + cost > params.history_budget.min(params.token_budget) {
            break;
        }
        history_tokens += cost;
        history.push(turn.clone());
    }

    // Chunks greedily in rank order; stop at the first one that does not
    // fit the remaining budget.
    let mut units: Vec<ContextUnit> = Vec::new();
    let mut chunk_tokens = 0usize;
    let budget_left = params.token_budget - history_tokens;
    for chunk in ranked_chunks {
        if units
            .iter()
            .any(|u| u.chunk_ids.contains(&chunk.chunk_id))
        {
            continue;
        }
        if chunk_tokens + chunk.token_count > budget_left {
            break;
        }
        chunk_tokens += chunk.token_count;
        merge_into_units(&mut units, chunk);
    }

    // Merging deduplicates overlap text, so recount what actually made it.
    let unit_tokens: usize = units.iter().map(|u| u.token_count).sum();

    AssembledContext {
        book_id: book_id.to_string(),
        units,
        history,
        token_budget: params.token_budget,
        token_count: history_tokens + unit_tokens,
    }
}

/// Add a chunk as a new unit, or merge it into an adjacent existing one.
///
/// A chunk that bridges two existing units (fills the gap between them)
/// leaves the pair adjacent after the merge, so the grown unit is then
/// coalesced with its new neighbor.
fn merge_into_units(units: &mut Vec<ContextUnit>, chunk: &Chunk) {
    let mut merged = None;
    for (i, unit) in units.iter_mut().enumerate() {
        let first = unit.first_sequence_index;
        let last = first + unit.chunk_ids.len() as u32 - 1;
        if chunk.sequence_index + 1 == first {
            // Prepend.
            unit.text = join_deduped(&chunk.text, &unit.text);
            unit.chunk_ids.insert(0, chunk.chunk_id.clone());
            unit.first_sequence_index = chunk.sequence_index;
            unit.locator = chunk.locator();
            unit.token_count = count_tokens(&unit.text);
            merged = Some(i);
            break;
        }
        if chunk.sequence_index == last + 1 {
            // Append.
            unit.text = join_deduped(&unit.text, &chunk.text);
            unit.chunk_ids.push(chunk.chunk_id.clone());
            unit.token_count = count_tokens(&unit.text);
            merged = Some(i);
            break;
        }
    }

    match merged {
        Some(i) => coalesce_neighbor(units, i),
        None => units.push(ContextUnit {
            chunk_ids: vec![chunk.chunk_id.clone()],
            first_sequence_index: chunk.sequence_index,
            text: chunk.text.clone(),
            token_count: chunk.token_count,
            locator: chunk.locator(),
        }),
    }
}

/// Fold a unit that has become adjacent to another into one unit.
fn coalesce_neighbor(units: &mut Vec<ContextUnit>, i: usize) {
    let first = units[i].first_sequence_index;
    let next = first + units[i].chunk_ids.len() as u32;

    if let Some(j) = units.iter().position(|u| u.first_sequence_index == next) {
        let tail = units.remove(j);
        let i = if j < i { i - 1 } else { i };
        units[i].text = join_deduped(&units[i].text, &tail.text);
        units[i].chunk_ids.extend(tail.chunk_ids);
        units[i].token_count = count_tokens(&units[i].text);
        return;
    }

    let leader = units
        .iter()
        .enumerate()
        .position(|(j, u)| j != i && u.first_sequence_index + u.chunk_ids.len() as u32 == first);
    if let Some(j) = leader {
        let tail = units.remove(i);
        let j = if i < j { j - 1 } else { j };
        units[j].text = join_deduped(&units[j].text, &tail.text);
        units[j].chunk_ids.extend(tail.chunk_ids);
        units[j].token_count = count_tokens(&units[j].text);
    }
}

/// Join two adjacent chunk texts, dropping the chunker's overlap region
/// (the longest suffix of `a` that is a prefix of `b`).
fn join_deduped(a: &str, b: &str) -> String {
    let max = a.len().min(b.len());
    let mut overlap = 0;
    for len in (1..=max).rev() {
        if !a.is_char_boundary(a.len() - len) || !b.is_char_boundary(len) {
            continue;
        }
        if a.ends_with(&b[..len]) {
            // Only accept whole-token overlaps.
            if len == b.len() || b[len..].starts_with(|c: char| c.is_whitespace()) {
                overlap = len;
                break;
            }
        }
    }
    let rest = b[overlap..].trim_start();
    if rest.is_empty() {
        a.to_string()
    } else {
        format!("{} {}", a, rest)
    }
}

fn turn_tokens(turn: &ConversationTurn) -> usize {
    count_tokens(&turn.query_text) + count_tokens(&turn.response_summary)
}
