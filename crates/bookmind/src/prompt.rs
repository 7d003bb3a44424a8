//! Prompt construction for the generation collaborator.
//!
//! The system prompt carries the assembled context with each unit
//! tagged `[S1]`, `[S2]`, … so that citation review can validate the
//! tags the model emits. Conversation history rides along in its own
//! block. The user prompt is the reader's question plus a
//! complexity-matched instruction.

use bookmind_core::{AssembledContext, ComplexityLevel};

use crate::generation::GenerationRequest;

/// How the explanation should be pitched, per complexity level.
fn complexity_instruction(level: ComplexityLevel) -> &'static str {
    match level {
        ComplexityLevel::Simple => {
            "Explain in simple terms that are easy to understand. Use clear, \
             concise language that someone with basic knowledge can follow."
        }
        ComplexityLevel::Detailed => {
            "Provide a detailed explanation covering the relevant background, \
             connections between events, and their significance in the book."
        }
        ComplexityLevel::Technical => {
            "Provide a technical explanation using precise terminology and \
             detailed analysis appropriate for an expert reader."
        }
    }
}

/// Build the prompt pair for one explanation request.
pub fn build_request(
    query: &str,
    context: &AssembledContext,
    complexity: ComplexityLevel,
    allow_external_knowledge: bool,
) -> GenerationRequest {
    let capacity: usize = context.units.iter().map(|u| u.text.len() + 16).sum();
    let mut system = String::with_capacity(capacity + 512);

    system.push_str(
        "You are a reading companion answering a question about a book. \
         Base your answer on the numbered source passages below. After \
         every claim drawn from a passage, cite it with its tag, e.g. [S1]. \
         Use only tags that appear below.\n",
    );
    if allow_external_knowledge {
        system.push_str(
            "If the passages do not fully answer the question you may draw \
             on general knowledge, but never cite a tag for it.\n",
        );
    } else {
        system.push_str(
            "If the passages do not answer the question, say so rather than \
             guessing.\n",
        );
    }

    system.push_str("\nSources:\n");
    for (i, unit) in context.units.iter().enumerate() {
        system.push_str(&format!("[S{}] ({})\n{}\n\n", i + 1, unit.locator, unit.text));
    }

    if !context.history.is_empty() {
        system.push_str("Earlier in this conversation:\n");
        for turn in &context.history {
            system.push_str(&format!(
                "Q: {}\nA: {}\n",
                turn.query_text, turn.response_summary
            ));
        }
        system.push('\n');
    }

    let user = format!("{}\n\n{}", query, complexity_instruction(complexity));

    GenerationRequest {
        system_prompt: system,
        user_prompt: user,
    }
}

/// Condense a response for storage in conversation memory.
///
/// Keeps the first `max_words` whitespace tokens with citation tags
/// removed; history blocks quote summaries, not full answers.
pub fn summarize_response(content: &str, max_words: usize) -> String {
    let words: Vec<&str> = content
        .split_whitespace()
        .filter(|w| !(w.starts_with("[S") && w.ends_with(']')))
        .take(max_words)
        .collect();
    let mut summary = words.join(" ");
    if content.split_whitespace().count() > max_words {
        summary.push('…');
    }
    summary
}
