//! Outbound message splitting.
//!
//! Telegram caps messages at 4096 bytes. Oversize replies are split on
//! UTF-8 boundaries, preferring to break at a newline when one falls in
//! the latter half of the window so paragraphs stay intact.

/// Maximum bytes per Telegram message.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Split `text` into chunks of at most `max` bytes.
///
/// Properties: concatenating the chunks reproduces `text` exactly, no chunk
/// exceeds `max` bytes, and no chunk ends inside a multi-byte rune. A
/// newline in the latter half of the window wins over a hard cut; the
/// newline itself stays with the earlier chunk.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(pos) = rest[..cut].rfind('\n') {
            if pos + 1 > max / 2 {
                cut = pos + 1;
            }
        }
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_split_invariants(text: &str, max: usize) {
        let chunks = split_message(text, max);
        assert_eq!(chunks.concat(), text, "chunks must rejoin to the input");
        for chunk in &chunks {
            assert!(chunk.len() <= max, "chunk of {} bytes exceeds {max}", chunk.len());
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_message("Hello, world!", MAX_MESSAGE_BYTES);
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn exactly_max_is_single_chunk() {
        let text = "a".repeat(MAX_MESSAGE_BYTES);
        assert_eq!(split_message(&text, MAX_MESSAGE_BYTES).len(), 1);
    }

    #[test]
    fn splits_at_newline_in_latter_half() {
        let text = format!("{}\n{}", "A".repeat(4000), "B".repeat(4000));
        let chunks = split_message(&text, MAX_MESSAGE_BYTES);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with('\n'));
        assert_eq!(chunks[0].len(), 4001);
        assert_eq!(chunks[1], "B".repeat(4000));
        assert_split_invariants(&text, MAX_MESSAGE_BYTES);
    }

    #[test]
    fn ignores_newline_in_first_half() {
        let text = format!("{}\n{}", "A".repeat(100), "B".repeat(8000));
        let chunks = split_message(&text, MAX_MESSAGE_BYTES);
        // The early newline would waste most of the window — hard cut instead.
        assert_eq!(chunks[0].len(), MAX_MESSAGE_BYTES);
        assert_split_invariants(&text, MAX_MESSAGE_BYTES);
    }

    #[test]
    fn never_cuts_inside_a_rune() {
        // 3-byte runes with the limit landing mid-rune.
        let text = "日本語のテキスト".repeat(200);
        for max in [10, 11, 64, 1000] {
            let chunks = split_message(&text, max);
            assert_eq!(chunks.concat(), text);
            for chunk in chunks {
                assert!(chunk.len() <= max);
                assert!(std::str::from_utf8(chunk.as_bytes()).is_ok());
            }
        }
    }

    #[test]
    fn long_single_line_hard_splits() {
        let text = "x".repeat(10_000);
        let chunks = split_message(&text, MAX_MESSAGE_BYTES);
        assert_eq!(chunks.len(), 3);
        assert_split_invariants(&text, MAX_MESSAGE_BYTES);
    }
}
