//! Sentence-boundary text chunker with overlap.
//!
//! Splits normalized document text into [`TextChunk`]s of at most
//! `max_chars` characters (Unicode scalar values, not bytes, so Japanese
//! text is measured the way it reads).
//!
//! # Algorithm
//!
//! 1. Cut the text into units that end after a sentence terminator
//!    (`。 ． . ! ? ！ ？`) or a newline. A unit longer than `max_chars`
//!    is hard-split into `max_chars`-sized pieces.
//! 2. Accumulate units greedily left to right until the next unit would
//!    push the buffer past `max_chars`.
//! 3. Close the chunk and seed the next one with the last `overlap`
//!    characters of the closed chunk (shortened if the seed plus the next
//!    unit would not fit).
//! 4. Whitespace-only chunks are dropped; empty input yields no chunks.
//!
//! The output depends only on `(text, max_chars, overlap)`, and chunk IDs
//! depend only on `(origin, index)`. All IDs of one origin share
//! [`id_prefix`], which ingest uses to drop an origin's old chunks before
//! writing new ones.
//!
//! # Example
//!
//! ```rust
//! use sakiyomi::chunk::split;
//!
//! let chunks = split("https://example.com/a", "一文目。二文目。", 1000, 100);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::models::TextChunk;

const TERMINATORS: [char; 8] = ['。', '．', '.', '!', '?', '！', '？', '\n'];

/// Split `text` from `origin` into chunks of at most `max_chars` characters.
///
/// `overlap` is clamped below `max_chars`. Chunk indices are contiguous
/// from 0.
pub fn split(origin: &str, text: &str, max_chars: usize, overlap: usize) -> Vec<TextChunk> {
    split_text(text, max_chars, overlap)
        .into_iter()
        .enumerate()
        .map(|(index, piece)| make_chunk(origin, index, piece))
        .collect()
}

/// The string-level half of [`split`].
pub fn split_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    if max_chars == 0 || text.trim().is_empty() {
        return Vec::new();
    }
    let overlap = overlap.min(max_chars - 1);

    let mut pieces = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for unit in units(text, max_chars) {
        let unit_len = unit.chars().count();

        if buf_len > 0 && buf_len + unit_len > max_chars {
            let seed = tail_chars(&buf, overlap.min(max_chars - unit_len)).to_string();
            pieces.push(std::mem::replace(&mut buf, seed));
            buf_len = buf.chars().count();
        }

        buf.push_str(unit);
        buf_len += unit_len;
    }

    if buf_len > 0 {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Cut text into sentence-or-line units, none longer than `max_chars`.
fn units(text: &str, max_chars: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        if TERMINATORS.contains(&c) {
            let end = i + c.len_utf8();
            push_bounded(&mut out, &text[start..end], max_chars);
            start = end;
        }
    }
    if start < text.len() {
        push_bounded(&mut out, &text[start..], max_chars);
    }
    out
}

/// Push `unit`, hard-splitting it at character boundaries if it is too long.
fn push_bounded<'a>(out: &mut Vec<&'a str>, unit: &'a str, max_chars: usize) {
    let mut remaining = unit;
    while remaining.chars().count() > max_chars {
        let cut = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        out.push(&remaining[..cut]);
        remaining = &remaining[cut..];
    }
    if !remaining.is_empty() {
        out.push(remaining);
    }
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let start = s
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &s[start..]
}

/// Stable chunk ID: [`id_prefix`] of the origin, then the index.
///
/// The origin is the source's identity. Ingesting another document under
/// the same origin (a re-fetched URL, a PDF with the same filename)
/// replaces the earlier one.
pub fn chunk_id(origin: &str, index: usize) -> String {
    format!("{}{}", id_prefix(origin), index)
}

/// Prefix shared by every chunk ID of `origin`: the first 16 hex digits
/// of SHA-256(origin) and a dash.
pub fn id_prefix(origin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(origin.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-", &digest[..16])
}

fn make_chunk(origin: &str, index: usize, text: String) -> TextChunk {
    TextChunk {
        id: chunk_id(origin, index),
        text,
        origin: origin.to_string(),
        index,
        metadata: BTreeMap::new(),
    }
}
