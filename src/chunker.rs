//! Sentence-boundary-aware overlapping text chunker.
//!
//! Splits cleaned document text into windows of at most `max_chars`
//! characters. When a window boundary falls mid-text, the cut is snapped
//! back to the last `.`, `!`, or `?` found within the final
//! [`BOUNDARY_WINDOW`] characters of the window, preferring a
//! sentence-complete chunk over a hard cut. Consecutive chunks share
//! `overlap` characters of context.
//!
//! The function is pure and deterministic: identical input always yields
//! identical chunks. All arithmetic is in characters, not bytes, so text
//! containing multi-byte word characters cannot cause a slicing panic.

/// How far back from a window boundary to look for sentence punctuation.
const BOUNDARY_WINDOW: usize = 100;

/// Split `text` into overlapping chunks of at most `max_chars` characters.
///
/// Invariant: `overlap < max_chars`, enforced at config load. Chunks are
/// trimmed; chunks that trim to empty are dropped.
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    debug_assert!(
        overlap < max_chars,
        "overlap ({overlap}) must be smaller than max_chars ({max_chars})"
    );
    // Belt-and-braces clamp so a bad caller cannot loop forever.
    let overlap = overlap.min(max_chars.saturating_sub(1));

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    if total <= max_chars {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < total {
        let naive_end = start + max_chars;
        let mut end = naive_end;

        // Snap to the last sentence ending inside the boundary window, but
        // only if the snapped cut still advances past the next overlap
        // region (otherwise the walk would stall).
        if end < total {
            let window_start = end.saturating_sub(BOUNDARY_WINDOW);
            let snapped = (window_start..end)
                .rev()
                .find(|&i| matches!(chars[i], '.' | '!' | '?'))
                .map(|i| i + 1);
            if let Some(snap) = snapped {
                if snap > start + overlap {
                    end = snap;
                }
            }
        }

        let slice_end = end.min(total);
        let chunk: String = chars[start..slice_end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if slice_end >= total {
            break;
        }
        start = end - overlap;
    }

    chunks
}
