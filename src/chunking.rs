//! Chunking utilities for splitting extracted text into overlapping windows.
//!
//! Windows are measured in characters (Unicode scalar values), never bytes,
//! so multi-byte text is split on character boundaries and the reported
//! offsets index into `text.chars()`.

use serde::{Deserialize, Serialize};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// A window of a document's extracted text.
///
/// Produced by [`chunk_text`]. `char_start..char_end` is the half-open
/// character range this chunk covers in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Zero-based chunk index within the document.
    pub index: usize,
    /// The chunk text content.
    pub text: String,
    /// Character offset where this chunk starts in the source text.
    pub char_start: usize,
    /// Character offset one past the last character of this chunk.
    pub char_end: usize,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// Split text into fixed-size, overlapping character windows.
///
/// Consecutive windows start `chunk_size - overlap` characters apart; the
/// last window ends exactly at the end of the text. Empty text yields no
/// chunks and text no longer than `chunk_size` yields exactly one.
///
/// An `overlap` of `chunk_size` or more is clamped so that every window
/// still advances by at least one character.
///
/// # Examples
///
/// ```
/// use docrag::chunking::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 1000, 0);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// let text = "x".repeat(1000);
/// let starts: Vec<usize> = chunk_text(&text, 400, 50)
///     .iter()
///     .map(|c| c.char_start)
///     .collect();
/// assert_eq!(starts, vec![0, 350, 700]);
/// ```
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let char_count = text.chars().count();

    if char_count == 0 {
        return Vec::new();
    }

    // Short text doesn't need chunking
    if char_count <= chunk_size {
        return vec![Chunk {
            index: 0,
            text: text.to_string(),
            char_start: 0,
            char_end: char_count,
        }];
    }

    // Build a map of char index -> byte index for O(1) lookups
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start_char = 0;

    loop {
        let end_char = (start_char + chunk_size).min(char_count);
        let start_byte = char_to_byte[start_char];
        let end_byte = char_to_byte[end_char];

        chunks.push(Chunk {
            index: chunks.len(),
            text: text[start_byte..end_byte].to_string(),
            char_start: start_char,
            char_end: end_char,
        });

        if end_char == char_count {
            break;
        }
        start_char += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text(
            "Hello, world!",
            DEFAULT_CHUNK_SIZE,
            DEFAULT_CHUNK_OVERLAP,
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[0].char_end, 13);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 400, 50).is_empty());
    }

    #[test]
    fn thousand_chars_make_three_windows() {
        let text: String = ('a'..='z').cycle().take(1000).collect();
        let chunks = chunk_text(&text, 400, 50);

        let spans: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.char_start, c.char_end)).collect();
        assert_eq!(spans, vec![(0, 400), (350, 750), (700, 1000)]);
        assert_eq!(chunks[2].text, text[700..]);
    }

    #[test]
    fn windows_respect_size_and_overlap() {
        let text = "word ".repeat(500);
        let chunks = chunk_text(&text, 300, 40);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.char_len() <= 300);
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start < pair[0].char_end, "chunks overlap");
        }
    }

    #[test]
    fn chunks_cover_full_text_without_gaps() {
        let text = "lorem ipsum dolor sit amet ".repeat(97);
        let chunks = chunk_text(&text, 256, 32);

        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks.last().unwrap().char_end, text.chars().count());
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start <= pair[0].char_end, "no gaps");
        }
    }

    #[test]
    fn zero_overlap_tiles_the_text() {
        let text = "z".repeat(250);
        let chunks = chunk_text(&text, 100, 0);
        let spans: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.char_start, c.char_end)).collect();
        assert_eq!(spans, vec![(0, 100), (100, 200), (200, 250)]);
    }

    #[test]
    fn oversized_overlap_still_advances() {
        let text = "abcdef";
        let chunks = chunk_text(text, 3, 10);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.last().unwrap().char_end, 6);
    }

    #[test]
    fn handles_mixed_length_unicode() {
        // Mix of ASCII (1 byte), accented chars (2 bytes), and emoji (4 bytes)
        let text = "café ☕ naïve 日本語 🎉 ".repeat(50);
        let chunks = chunk_text(&text, 100, 20);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.text.chars().count(), chunk.char_len());
        }
        let rebuilt: String = text
            .chars()
            .skip(chunks[1].char_start)
            .take(chunks[1].char_len())
            .collect();
        assert_eq!(rebuilt, chunks[1].text);
    }
}
