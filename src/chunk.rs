//! Overlapping window text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters,
//! where each chunk starts `chunk_overlap` characters before the end of the
//! previous one. Lengths are counted in chars, never bytes.
//!
//! # Algorithm
//!
//! 1. Trim the text. If it fits in one window, emit it whole.
//! 2. Otherwise look for the last break inside the window, trying in order:
//!    paragraph (`\n\n`), line (`\n`), sentence (`. `), word (` `).
//!    A break is only accepted if it keeps the chunk at least half full
//!    and longer than the overlap.
//! 3. With no acceptable break, cut hard at `chunk_size`.
//! 4. The next window starts at `end - chunk_overlap`.
//!
//! A 3000-char text without separators and `1000/200` settings therefore
//! yields windows starting at 0, 800, 1600 and 2400.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Break candidates, most preferred first.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Split text into overlapping chunks with contiguous indices from 0.
///
/// Returns an empty vector when the text is blank.
pub fn chunk_text(document_id: &str, text: &str, params: &ChunkingConfig) -> Vec<Chunk> {
    split_windows(text, params.chunk_size, params.chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_chunk(document_id, i as i64, &piece))
        .collect()
}

/// Compute the chunk texts without ids or hashes.
pub fn split_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(size - 1);

    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        if chars.len() - start <= size {
            push_piece(&mut out, &chars[start..]);
            break;
        }

        let ceil = start + size;
        let floor = start + (overlap + 1).max(size / 2);
        let end = SEPARATORS
            .iter()
            .find_map(|sep| rfind_break(&chars, sep, floor, ceil))
            .unwrap_or(ceil);

        push_piece(&mut out, &chars[start..end]);
        start = end - overlap;
    }
    out
}

/// Last position `end` in `[floor, ceil]` such that `chars[..end]` ends with `sep`.
fn rfind_break(chars: &[char], sep: &str, floor: usize, ceil: usize) -> Option<usize> {
    let sep: Vec<char> = sep.chars().collect();
    let lowest = floor.max(sep.len());
    if lowest > ceil {
        return None;
    }
    (lowest..=ceil)
        .rev()
        .find(|&end| chars[end - sep.len()..end] == sep[..])
}

fn push_piece(out: &mut Vec<String>, piece: &[char]) {
    if piece.iter().all(|c| c.is_whitespace()) {
        return;
    }
    out.push(piece.iter().collect());
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
