//! Position-aware candidate ranking.
//!
//! Pure scoring over candidates already fetched from the index; the
//! calling application is responsible for embedding the query and
//! resolving the reader position to a sequence index.
//!
//! # Scoring
//!
//! 1. Reject the query when the best raw similarity is below
//!    `min_similarity` — the caller must fall back to a "cannot answer
//!    from book content" response instead of generating over noise.
//! 2. Candidates within `proximity_window` chunks of the reader get a
//!    multiplicative boost that decays linearly from `max_boost` at
//!    distance 0 to 1.0 just outside the window. This is what makes
//!    "explain this" favor the page under the reader's thumb over a
//!    globally more similar passage three chapters away.
//! 3. `final_score = similarity × boost`, sorted descending; ties break
//!    on lexical token overlap with the query, then ascending
//!    `sequence_index`.

use std::collections::HashSet;

use crate::error::RetrievalError;
use crate::index::ScoredChunk;
use crate::models::RetrievalCandidate;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RankingParams {
    /// Chunks within ±window of the reader position get boosted.
    pub proximity_window: u32,
    /// Boost at distance 0; decays to 1.0 outside the window.
    pub max_boost: f32,
    /// Floor on the best candidate's raw similarity.
    pub min_similarity: f32,
    /// Fetch `candidate_multiplier × k` candidates before re-ranking.
    pub candidate_multiplier: usize,
    /// Optional multiplier (< 1.0) applied to candidates more than
    /// `proximity_window` chunks *ahead* of the reader. Off by default;
    /// deployments opt in explicitly.
    pub spoiler_penalty: Option<f32>,
}

impl Default for RankingParams {
    fn default() -> Self {
        Self {
            proximity_window: 3,
            max_boost: 1.5,
            min_similarity: 0.2,
            candidate_multiplier: 4,
            spoiler_penalty: None,
        }
    }
}

/// Boost for a candidate `distance` chunks from the reader position.
///
/// Monotonically decreasing: `max_boost` at distance 0, linear decay to
/// 1.0 at the window edge, exactly 1.0 beyond it.
pub fn position_boost(distance: u32, window: u32, max_boost: f32) -> f32 {
    if distance > window {
        return 1.0;
    }
    1.0 + (max_boost - 1.0) * (1.0 - distance as f32 / (window + 1) as f32)
}

/// Re-rank index candidates around the reader position and take `k`.
///
/// `position_seq` is the sequence index the reader position resolved to.
///
/// # Errors
///
/// [`RetrievalError::NoRelevantContent`] when no candidate reaches
/// `min_similarity` (including the empty-candidate case).
pub fn rank_candidates(
    candidates: &[ScoredChunk],
    position_seq: u32,
    query: &str,
    k: usize,
    params: &RankingParams,
) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
    let best = candidates
        .iter()
        .map(|c| c.similarity)
        .fold(f32::NEG_INFINITY, f32::max);
    if candidates.is_empty() || best < params.min_similarity {
        return Err(RetrievalError::NoRelevantContent {
            best_similarity: if candidates.is_empty() { 0.0 } else { best },
        });
    }

    let query_tokens: HashSet<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();

    let mut ranked: Vec<(RetrievalCandidate, usize)> = candidates
        .iter()
        .map(|c| {
            let distance = c.sequence_index.abs_diff(position_seq);
            let mut boost = position_boost(distance, params.proximity_window, params.max_boost);
            if let Some(penalty) = params.spoiler_penalty {
                let ahead = c.sequence_index.saturating_sub(position_seq);
                if ahead > params.proximity_window {
                    boost *= penalty;
                }
            }
            let overlap = token_overlap(&query_tokens, &c.text);
            let candidate = RetrievalCandidate {
                chunk_id: c.chunk_id.clone(),
                sequence_index: c.sequence_index,
                similarity_score: c.similarity,
                position_boost: boost,
                final_score: c.similarity * boost,
            };
            (candidate, overlap)
        })
        .collect();

    ranked.sort_by(|(a, a_overlap), (b, b_overlap)| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b_overlap.cmp(a_overlap))
            .then(a.sequence_index.cmp(&b.sequence_index))
    });

    Ok(ranked.into_iter().take(k).map(|(c, _)| c).collect())
}

/// Number of distinct query tokens appearing in the chunk text.
fn token_overlap(query_tokens: &HashSet<String>, text: &str) -> usize {
    let text_tokens: HashSet<String> = text
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    query_tokens.intersection(&text_tokens).count()
}
