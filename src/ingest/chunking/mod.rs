
use anyhow::{Context, Result};
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

/// One chunk of textbook text, tagged with the page it came from
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub page: i64,
}

/// Word-count bounds for the textbook chunker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Paragraphs below this many words are merged into a shared buffer
    pub min_chunk_words: usize,
    /// Hard ceiling on words per chunk
    pub max_chunk_words: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            min_chunk_words: 120,
            max_chunk_words: 500,
        }
    }
}

static PAGE_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[PAGE\s+(\d+)\]").expect("valid regex"));

static BROKEN_WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-zA-Z])\s+([a-zA-Z])").expect("valid regex"));

static WHITESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static EXPONENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-zA-Z])\s+(\d+)").expect("valid regex"));

// Private Use Area glyphs that pdf extraction leaves behind for ligatures
static PDF_ARTIFACT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[\u{e022}\u{e02a}]").expect("valid regex"));

/// Clean math extraction artifacts while keeping formulas usable
///
/// Joins letters that extraction split apart, rewrites spaced exponents
/// like "x 2" to "x^2" and repairs fraction bars that came out as
/// underscores. The word-joining pass also glues ordinary adjacent words
/// together, so this only runs on math documents where formula noise
/// outweighs that damage.
#[inline]
pub fn clean_math_text(text: &str) -> String {
    let text = BROKEN_WORD_REGEX.replace_all(text, "$1$2");
    let text = WHITESPACE_REGEX.replace_all(&text, " ");
    let text = EXPONENT_REGEX.replace_all(&text, "$1^$2");
    let text = text.replace("___", "/").replace("_ _", "/");
    let text = PDF_ARTIFACT_REGEX.replace_all(&text, "");
    text.trim().to_string()
}

/// Chunk extracted textbook text into embedding-ready pieces
///
/// Text is split on `[PAGE n]` markers first so every chunk carries its
/// page number; text without markers lands on page 0, and anything before
/// the first marker is dropped. Within a page, paragraphs are merged up to
/// the word bounds in `config`, and oversized paragraphs are hard-split
/// into windows of at most `max_chunk_words` words.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig, clean_math: bool) -> Result<Vec<TextChunk>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let cleaned;
    let text = if clean_math {
        cleaned = clean_math_text(text);
        cleaned.as_str()
    } else {
        text
    };

    let spans = page_spans(text)?;

    let mut chunks = Vec::new();
    if spans.is_empty() {
        chunks = chunk_paragraphs(text, 0, config);
    } else {
        for span in &spans {
            chunks.extend(chunk_paragraphs(&text[span.start..span.end], span.page, config));
        }
    }

    // Last resort for text with no usable paragraph structure
    if chunks.is_empty() {
        let words: Vec<&str> = text.split_whitespace().collect();
        for window in words.chunks(config.max_chunk_words) {
            chunks.push(TextChunk {
                text: window.join(" "),
                page: 0,
            });
        }
    }

    debug!(
        "Chunked {} characters into {} chunks across {} pages",
        text.len(),
        chunks.len(),
        spans.len().max(1)
    );

    Ok(chunks)
}

struct PageSpan {
    page: i64,
    start: usize,
    end: usize,
}

/// Locate `[PAGE n]` markers and return the text span following each one
fn page_spans(text: &str) -> Result<Vec<PageSpan>> {
    let mut markers = Vec::new();
    for captures in PAGE_MARKER_REGEX.captures_iter(text) {
        let captures = captures.context("Failed to scan page markers")?;
        let whole = captures
            .get(0)
            .context("Page marker match missing")?;
        let number = captures
            .get(1)
            .context("Page number group missing")?;
        let page = number
            .as_str()
            .parse::<i64>()
            .context("Invalid page number in marker")?;
        markers.push((page, whole.start(), whole.end()));
    }

    let mut spans = Vec::with_capacity(markers.len());
    for (i, &(page, _, marker_end)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map_or(text.len(), |&(_, next_start, _)| next_start);
        spans.push(PageSpan {
            page,
            start: marker_end,
            end,
        });
    }

    Ok(spans)
}

/// Chunk the text of one page by merging and splitting paragraphs
fn chunk_paragraphs(text: &str, page_number: i64, config: &ChunkingConfig) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let mut buffer_words: Vec<&str> = Vec::new();

    for paragraph in split_paragraphs(text.trim()) {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        // Hard-split a very long paragraph into word windows
        if words.len() > config.max_chunk_words {
            if !buffer_words.is_empty() {
                chunks.push(TextChunk {
                    text: buffer_words.join(" "),
                    page: page_number,
                });
                buffer_words.clear();
            }

            for window in words.chunks(config.max_chunk_words) {
                chunks.push(TextChunk {
                    text: window.join(" "),
                    page: page_number,
                });
            }
            continue;
        }

        // Merge small paragraphs until they reach a useful size
        if words.len() < config.min_chunk_words {
            buffer_words.extend(words);

            if buffer_words.len() >= config.max_chunk_words {
                for window in buffer_words.chunks(config.max_chunk_words) {
                    chunks.push(TextChunk {
                        text: window.join(" "),
                        page: page_number,
                    });
                }
                buffer_words.clear();
            }
        } else if buffer_words.is_empty() {
            chunks.push(TextChunk {
                text: words.join(" "),
                page: page_number,
            });
        } else if buffer_words.len() + words.len() <= config.max_chunk_words {
            buffer_words.extend(words);
            chunks.push(TextChunk {
                text: buffer_words.join(" "),
                page: page_number,
            });
            buffer_words.clear();
        } else {
            chunks.push(TextChunk {
                text: buffer_words.join(" "),
                page: page_number,
            });
            chunks.push(TextChunk {
                text: words.join(" "),
                page: page_number,
            });
            buffer_words.clear();
        }
    }

    if !buffer_words.is_empty() {
        chunks.push(TextChunk {
            text: buffer_words.join(" "),
            page: page_number,
        });
    }

    chunks
}

/// Split text into paragraphs on blank-line boundaries
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs
}
