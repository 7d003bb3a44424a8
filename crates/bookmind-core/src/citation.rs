//! Citation validation and confidence scoring.
//!
//! The generation prompt tags each context unit `[S1]`, `[S2]`, … and
//! instructs the model to cite sources by tag. The response is scanned
//! afterwards: tags that do not exist in the supplied context are
//! stripped from the text and their sentences counted as ungrounded — a
//! citation mismatch is recovered locally, never surfaced as an error.
//!
//! Confidence is the fraction of response sentences carrying at least
//! one valid citation and no invented one, multiplied by a mismatch
//! penalty when any tag had to be stripped and by an external-knowledge
//! penalty when the caller allowed it. A response containing an invented
//! citation therefore always scores strictly below 0.5. A heuristic, not
//! a calibrated probability.

use regex_lite::Regex;

use crate::chunk::split_sentences;
use crate::models::AssembledContext;

/// Multiplier applied to confidence when external knowledge was allowed.
pub const EXTERNAL_KNOWLEDGE_PENALTY: f32 = 0.5;

/// Multiplier applied to confidence when any citation had to be stripped.
pub const CITATION_MISMATCH_PENALTY: f32 = 0.5;

/// Outcome of scanning a generated response against its context.
#[derive(Debug, Clone)]
pub struct CitationReview {
    /// Response text with invalid tags stripped.
    pub content: String,
    /// Locators of the context units actually cited, in unit order.
    pub citations: Vec<String>,
    pub grounded_sentences: usize,
    pub total_sentences: usize,
    /// Count of tags that referenced nothing in the context.
    pub stripped_tags: usize,
}

/// Scan a response for `[S<n>]` tags and validate them against `context`.
///
/// Every citation in the returned review references a unit present in
/// the context that produced it; dangling tags never survive. A sentence
/// counts as grounded only when it carries at least one valid tag and no
/// invented one — an invented tag poisons its whole sentence.
pub fn review_citations(response: &str, context: &AssembledContext) -> CitationReview {
    let tag_re = Regex::new(r"\[S(\d+)\]").expect("valid citation pattern");
    let unit_count = context.units.len();
    let is_valid = |caps: &regex_lite::Captures<'_>| {
        let n: usize = caps[1].parse().unwrap_or(0);
        (1..=unit_count).contains(&n)
    };

    let mut cited = vec![false; unit_count];
    let mut stripped_tags = 0usize;

    let content = tag_re
        .replace_all(response, |caps: &regex_lite::Captures<'_>| {
            if is_valid(caps) {
                let n: usize = caps[1].parse().unwrap_or(0);
                cited[n - 1] = true;
                caps[0].to_string()
            } else {
                stripped_tags += 1;
                String::new()
            }
        })
        .into_owned();

    // Grounding is judged on the original sentences, where invented tags
    // are still visible.
    let sentences = split_sentences(response);
    let total_sentences = sentences.len();
    let grounded_sentences = sentences
        .iter()
        .filter(|s| {
            let mut valid = false;
            let mut invented = false;
            for caps in tag_re.captures_iter(s) {
                if is_valid(&caps) {
                    valid = true;
                } else {
                    invented = true;
                }
            }
            valid && !invented
        })
        .count();

    let citations = cited
        .iter()
        .enumerate()
        .filter(|(_, c)| **c)
        .map(|(i, _)| context.units[i].locator.clone())
        .collect();

    CitationReview {
        content: tidy_whitespace(&content),
        citations,
        grounded_sentences,
        total_sentences,
        stripped_tags,
    }
}

/// Grounding fraction, penalized for citation mismatches and when
/// external knowledge was permitted.
///
/// Any stripped tag halves the score; since the tag's own sentence is
/// already ungrounded, the result is strictly below 0.5 whenever the
/// response cited something absent from the context.
pub fn confidence(review: &CitationReview, allow_external_knowledge: bool) -> f32 {
    if review.total_sentences == 0 {
        return 0.0;
    }
    let mut score = review.grounded_sentences as f32 / review.total_sentences as f32;
    if review.stripped_tags > 0 {
        score *= CITATION_MISMATCH_PENALTY;
    }
    if allow_external_knowledge {
        score *= EXTERNAL_KNOWLEDGE_PENALTY;
    }
    score
}

/// Collapse the double spaces left behind by stripped tags.
fn tidy_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c == ' ' {
            if !last_space {
                out.push(c);
            }
            last_space = true;
        } else {
            last_space = false;
            out.push(c);
        }
    }
    out.replace(" .", ".").replace(" ,", ",")
}
