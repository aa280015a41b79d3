//! Heading-aware text chunker.
//!
//! Splits extracted document text into [`Chunk`]s that never exceed
//! `max_chars` bytes (and therefore never exceed `max_chars` characters).
//!
//! The input is first whitespace-normalized: every line is trimmed, runs of
//! whitespace inside a line collapse to a single space, and blank lines are
//! dropped. Chunks are verbatim slices of that normalized text.
//!
//! Splitting rules, in order of preference:
//!
//! 1. A heading line (ALL CAPS, numbered like `2.3 Scope`, or short Title
//!    Case) starts a new chunk, unless everything collected so far is itself
//!    headings.
//! 2. A section longer than `max_chars` is cut at the last sentence end in
//!    the window, then the last line break, then the last space, then at a
//!    hard character boundary.
//!
//! Size-forced cuts repeat the last `overlap_chars` bytes at the start of the
//! next chunk. Each chunk records how many leading bytes it shares with its
//! predecessor, so [`reassemble`] can rebuild the normalized text exactly.

use sha2::{Digest, Sha256};

/// Lines longer than this are never headings.
const MAX_HEADING_CHARS: usize = 80;

/// A bounded segment of a document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub chunk_index: i64,
    pub text: String,
    /// Leading bytes of `text` repeated from the previous chunk.
    pub overlap: usize,
    pub hash: String,
}

/// Split text into ordered chunks. Returns no chunks for blank input.
pub fn chunk_text(document_id: &str, text: &str, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let normalized = normalize_text(text);
    if normalized.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    for (start, end) in sections(&normalized) {
        for (piece_start, piece_end, overlap) in
            split_section(&normalized, start, end, max_chars, overlap_chars)
        {
            let index = chunks.len() as i64;
            chunks.push(make_chunk(
                document_id,
                index,
                &normalized[piece_start..piece_end],
                overlap,
            ));
        }
    }

    chunks
}

/// Trim lines, collapse inner whitespace, drop blank lines.
pub fn normalize_text(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Concatenate chunks minus their overlaps.
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| &c.text[c.overlap..])
        .collect::<String>()
}

/// Structural heading heuristic for a single line.
pub fn is_heading(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() || line.chars().count() > MAX_HEADING_CHARS {
        return false;
    }

    is_all_caps(line) || is_numbered_heading(line) || (is_title_case(line) && !line.ends_with('.'))
}

fn is_all_caps(line: &str) -> bool {
    let mut cased = false;
    for c in line.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}

/// `14 Marketing`, `2.3.1 Scope`: dotted digit groups, a space, then a title.
fn is_numbered_heading(line: &str) -> bool {
    let bytes = line.as_bytes();
    let mut i = 0;
    loop {
        let group_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == group_start {
            return false;
        }
        if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
            i += 1;
            continue;
        }
        break;
    }
    if i >= bytes.len() || bytes[i] != b' ' {
        return false;
    }
    let title = line[i..].trim();
    !title.is_empty() && !title.ends_with('.')
}

/// Every cased run starts with one uppercase letter followed by lowercase.
fn is_title_case(line: &str) -> bool {
    let mut cased = false;
    let mut prev_cased = false;
    for c in line.chars() {
        if c.is_uppercase() {
            if prev_cased {
                return false;
            }
            prev_cased = true;
            cased = true;
        } else if c.is_lowercase() {
            if !prev_cased {
                return false;
            }
            prev_cased = true;
            cased = true;
        } else {
            prev_cased = false;
        }
    }
    cased
}

/// Byte ranges of heading-delimited sections covering the whole text.
fn sections(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut section_start = 0;
    let mut body_seen = false;
    let mut offset = 0;

    for line in text.split('\n') {
        let heading = is_heading(line);
        if heading && body_seen {
            ranges.push((section_start, offset));
            section_start = offset;
            body_seen = false;
        }
        if !heading {
            body_seen = true;
        }
        offset += line.len() + 1;
    }
    ranges.push((section_start, text.len()));
    ranges
}

/// Greedy split of `text[start..end]` into `(start, end, overlap)` pieces.
fn split_section(
    text: &str,
    start: usize,
    end: usize,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<(usize, usize, usize)> {
    let mut pieces = Vec::new();
    let mut pos = start;
    let mut lead = 0;

    while end - pos > max_chars {
        let limit = floor_boundary(text, pos + max_chars);
        let min_cut = ceil_boundary(text, pos + lead + 1);
        let cut = find_cut(text, pos, limit, min_cut);

        pieces.push((pos, cut, lead));

        let want = cut.saturating_sub(overlap_chars).max(pos + 1);
        let next = ceil_boundary(text, want).min(cut);
        lead = cut - next;
        pos = next;
    }

    if end > pos {
        pieces.push((pos, end, lead));
    }
    pieces
}

/// Choose a cut in `(min_cut..=limit)`, preferring sentence ends.
fn find_cut(text: &str, pos: usize, limit: usize, min_cut: usize) -> usize {
    if limit < min_cut {
        return min_cut;
    }
    let window = &text.as_bytes()[pos..limit];

    // Sentence end: punctuation followed by whitespace, cut after the whitespace
    for i in (0..window.len().saturating_sub(1)).rev() {
        let cut = pos + i + 2;
        if cut < min_cut {
            break;
        }
        if matches!(window[i], b'.' | b'!' | b'?') && matches!(window[i + 1], b' ' | b'\n') {
            return cut;
        }
    }

    let window_str = &text[pos..limit];
    if let Some(idx) = window_str.rfind('\n') {
        if pos + idx + 1 >= min_cut {
            return pos + idx + 1;
        }
    }
    if let Some(idx) = window_str.rfind(' ') {
        if pos + idx + 1 >= min_cut {
            return pos + idx + 1;
        }
    }

    limit
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn make_chunk(document_id: &str, index: i64, text: &str, overlap: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let mut id_hasher = Sha256::new();
    id_hasher.update(document_id.as_bytes());
    id_hasher.update(b":");
    id_hasher.update(index.to_le_bytes());
    let id = format!("{:x}", id_hasher.finalize());

    Chunk {
        id: id[..32].to_string(),
        chunk_index: index,
        text: text.to_string(),
        overlap,
        hash,
    }
}
