//! Sentence-boundary book chunker.
//!
//! Splits normalized, marker-annotated book text into [`Chunk`]s that
//! respect a configurable `max_tokens` limit, with `overlap_tokens` of
//! trailing context carried into each following chunk so that sentences
//! near a boundary stay answerable.
//!
//! Structural markers are single lines emitted by the ingestion pipeline:
//!
//! ```text
//! [[chapter:3]]
//! [[page:41]]
//! [[section:The Mirror Stage]]
//! ```
//!
//! A marker sets the current chapter / page / section for all following
//! text. Chapter and page numbers must never decrease; violations are
//! rejected with [`IngestError::MalformedStructure`] before anything is
//! indexed.
//!
//! # Algorithm
//!
//! 1. Walk the text line by line, tracking the current chapter, page, and
//!    section title.
//! 2. Split running text into sentences (`.`, `!`, `?` followed by
//!    whitespace).
//! 3. Accumulate sentences into a window until adding the next one would
//!    exceed `max_tokens`, then flush the window as a chunk.
//! 4. Seed each new window with the previous window's trailing sentences,
//!    up to `overlap_tokens`. Overlap never crosses a chapter boundary.
//! 5. A single sentence longer than `max_tokens` is hard-split on word
//!    boundaries.
//!
//! Chunk ids are a SHA-256 of `book_id`, `sequence_index`, and the chunk
//! text, so re-chunking identical input is idempotent: same ids, same
//! order, safe re-ingestion without duplicates.

use sha2::{Digest, Sha256};

use crate::error::IngestError;
use crate::models::Chunk;

/// Count approximate tokens as whitespace-separated words.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split running text into sentences, keeping terminators.
///
/// A sentence ends at `.`, `!`, or `?` when followed by whitespace or end
/// of input. Trailing text without a terminator forms a final sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_break = match chars.peek() {
                Some(next) => next.is_whitespace(),
                None => true,
            };
            if at_break {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

/// A sentence annotated with the structure in effect where it starts.
#[derive(Debug, Clone)]
struct Sentence {
    text: String,
    tokens: usize,
    chapter: u32,
    page: u32,
    section: Option<String>,
}

/// Split marker-annotated book text into ordered chunks.
///
/// # Guarantees
///
/// - `sequence_index` values are contiguous: `0, 1, 2, …, N-1`.
/// - No chunk exceeds `max_tokens` unless a single word does.
/// - Chunks never span a chapter boundary.
/// - Identical input yields an identical chunk set (ids included).
///
/// # Errors
///
/// [`IngestError::MalformedStructure`] on decreasing chapter or page
/// numbers, unparsable markers, or text with no indexable content.
pub fn chunk_book(
    book_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Chunk>, IngestError> {
    let sentences = annotate_sentences(text)?;
    if sentences.is_empty() {
        return Err(IngestError::MalformedStructure {
            reason: "no indexable text".to_string(),
        });
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut window: Vec<Sentence> = Vec::new();
    let mut window_tokens = 0usize;

    let flush =
        |window: &mut Vec<Sentence>, window_tokens: &mut usize, chunks: &mut Vec<Chunk>| {
            if window.is_empty() {
                return;
            }
            let seq = chunks.len() as u32;
            chunks.push(make_chunk(book_id, seq, window));
            // Carry trailing sentences into the next window as overlap.
            let mut carried: Vec<Sentence> = Vec::new();
            let mut carried_tokens = 0usize;
            for s in window.iter().rev() {
                if carried_tokens + s.tokens > overlap_tokens {
                    break;
                }
                carried_tokens += s.tokens;
                carried.push(s.clone());
            }
            carried.reverse();
            *window = carried;
            *window_tokens = carried_tokens;
        };

    for sentence in sentences {
        if let Some(first) = window.first() {
            if first.chapter != sentence.chapter {
                // Never span or overlap across a chapter boundary.
                flush(&mut window, &mut window_tokens, &mut chunks);
                window.clear();
                window_tokens = 0;
            }
        }

        if sentence.tokens > max_tokens {
            flush(&mut window, &mut window_tokens, &mut chunks);
            window.clear();
            window_tokens = 0;
            for piece in hard_split(&sentence, max_tokens) {
                let seq = chunks.len() as u32;
                chunks.push(make_chunk(book_id, seq, &[piece]));
            }
            continue;
        }

        if window_tokens + sentence.tokens > max_tokens && !window.is_empty() {
            flush(&mut window, &mut window_tokens, &mut chunks);
            // Overlap plus the new sentence may still not fit; drop the
            // carried context rather than exceed the limit.
            if window_tokens + sentence.tokens > max_tokens {
                window.clear();
                window_tokens = 0;
            }
        }

        window_tokens += sentence.tokens;
        window.push(sentence);
    }

    flush(&mut window, &mut window_tokens, &mut chunks);

    Ok(chunks)
}

/// Walk lines, applying markers and sentence-splitting the text between.
fn annotate_sentences(text: &str) -> Result<Vec<Sentence>, IngestError> {
    let mut chapter = 1u32;
    let mut page = 1u32;
    let mut section: Option<String> = None;
    let mut sentences: Vec<Sentence> = Vec::new();
    let mut buffer = String::new();

    let drain =
        |buffer: &mut String, sentences: &mut Vec<Sentence>, chapter, page, section: &Option<String>| {
            for text in split_sentences(buffer) {
                let tokens = count_tokens(&text);
                sentences.push(Sentence {
                    text,
                    tokens,
                    chapter,
                    page,
                    section: section.clone(),
                });
            }
            buffer.clear();
        };

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(marker) = parse_marker(trimmed)? {
            drain(&mut buffer, &mut sentences, chapter, page, &section);
            match marker {
                Marker::Chapter(n) => {
                    if n < chapter {
                        return Err(IngestError::MalformedStructure {
                            reason: format!("chapter number decreased: {} after {}", n, chapter),
                        });
                    }
                    chapter = n;
                    section = None;
                }
                Marker::Page(n) => {
                    if n < page {
                        return Err(IngestError::MalformedStructure {
                            reason: format!("page number decreased: {} after {}", n, page),
                        });
                    }
                    page = n;
                }
                Marker::Section(title) => section = Some(title),
            }
        } else {
            buffer.push_str(line);
            buffer.push('\n');
        }
    }
    drain(&mut buffer, &mut sentences, chapter, page, &section);

    Ok(sentences)
}

enum Marker {
    Chapter(u32),
    Page(u32),
    Section(String),
}

/// Parse a `[[key:value]]` marker line; `Ok(None)` for plain text lines.
fn parse_marker(line: &str) -> Result<Option<Marker>, IngestError> {
    let inner = match line.strip_prefix("[[").and_then(|s| s.strip_suffix("]]")) {
        Some(inner) => inner,
        None => return Ok(None),
    };
    let (key, value) = inner.split_once(':').ok_or_else(|| IngestError::MalformedStructure {
        reason: format!("unparsable marker: {}", line),
    })?;
    match key {
        "chapter" => {
            let n = value.trim().parse::<u32>().map_err(|_| IngestError::MalformedStructure {
                reason: format!("invalid chapter number: {}", value),
            })?;
            Ok(Some(Marker::Chapter(n)))
        }
        "page" => {
            let n = value.trim().parse::<u32>().map_err(|_| IngestError::MalformedStructure {
                reason: format!("invalid page number: {}", value),
            })?;
            Ok(Some(Marker::Page(n)))
        }
        "section" => Ok(Some(Marker::Section(value.trim().to_string()))),
        other => Err(IngestError::MalformedStructure {
            reason: format!("unknown marker key: {}", other),
        }),
    }
}

/// Hard-split an oversized sentence on word boundaries.
fn hard_split(sentence: &Sentence, max_tokens: usize) -> Vec<Sentence> {
    let words: Vec<&str> = sentence.text.split_whitespace().collect();
    words
        .chunks(max_tokens.max(1))
        .map(|piece| Sentence {
            text: piece.join(" "),
            tokens: piece.len(),
            chapter: sentence.chapter,
            page: sentence.page,
            section: sentence.section.clone(),
        })
        .collect()
}

/// Build a [`Chunk`] from a window of sentences.
///
/// Metadata (chapter, page, section) comes from the window's first
/// sentence; the id is a SHA-256 over book id, sequence index, and text.
fn make_chunk(book_id: &str, sequence_index: u32, window: &[Sentence]) -> Chunk {
    let text = window
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let first = &window[0];

    let mut hasher = Sha256::new();
    hasher.update(book_id.as_bytes());
    hasher.update(sequence_index.to_le_bytes());
    hasher.update(text.as_bytes());
    let chunk_id = format!("{:x}", hasher.finalize());

    let token_count = count_tokens(&text);
    Chunk {
        chunk_id,
        book_id: book_id.to_string(),
        sequence_index,
        text,
        token_count,
        chapter: first.chapter,
        page: first.page,
        section_title: first.section.clone(),
    }
}
