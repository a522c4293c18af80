//! Context window accounting.
//!
//! Token counts are estimated at four characters per token — coarse, but
//! only used to keep transcripts under the configured budget and to decide
//! when to warn. The model's own tokenizer is authoritative for billing.

use courier_sessions::{Role, TranscriptEntry};
use tracing::info;

const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count for a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Per-thread context budget: a window `W` in estimated tokens and a warn
/// ratio `r`. Usage at or above `r·W` produces a soft notice; a transcript
/// that would reach `W` is trimmed from the oldest turns, keeping the
/// leading system preamble, until strictly below the window.
#[derive(Debug, Clone, Copy)]
pub struct ContextBudget {
    pub window: usize,
    pub warn_ratio: f32,
}

impl ContextBudget {
    pub fn new(window: usize, warn_ratio: f32) -> Self {
        Self { window, warn_ratio }
    }

    /// Estimated tokens used by a transcript plus the pending wake text.
    pub fn estimate(&self, transcript: &[TranscriptEntry], pending: &str) -> usize {
        transcript
            .iter()
            .map(|entry| estimate_tokens(&entry.content))
            .sum::<usize>()
            + estimate_tokens(pending)
    }

    /// True once estimated usage crosses the warn threshold.
    pub fn should_warn(&self, used: usize) -> bool {
        used as f32 >= self.window as f32 * self.warn_ratio
    }

    /// Drop the oldest non-preamble turns until the transcript (plus the
    /// pending wake text) sits strictly below the window. Returns how many
    /// turns were removed.
    pub fn trim(&self, transcript: &mut Vec<TranscriptEntry>, pending: &str) -> usize {
        let preamble_len = transcript
            .iter()
            .take_while(|entry| entry.role == Role::System)
            .count();

        let mut removed = 0;
        while self.estimate(transcript, pending) >= self.window
            && transcript.len() > preamble_len
        {
            transcript.remove(preamble_len);
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "trimmed oldest turns to fit context window");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(n: usize, chars: usize) -> Vec<TranscriptEntry> {
        (0..n).map(|_| TranscriptEntry::user("x".repeat(chars))).collect()
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn warn_threshold_uses_ratio() {
        let budget = ContextBudget::new(100, 0.8);
        assert!(!budget.should_warn(79));
        assert!(budget.should_warn(80));
    }

    #[test]
    fn trim_drops_oldest_until_below_window() {
        let budget = ContextBudget::new(10, 0.8);
        // 5 turns × 8 chars = 10 estimated tokens — at the window.
        let mut transcript = turns(5, 8);
        let removed = budget.trim(&mut transcript, "");
        assert!(removed >= 1);
        assert!(budget.estimate(&transcript, "") < 10);
    }

    #[test]
    fn trim_preserves_system_preamble() {
        let budget = ContextBudget::new(4, 0.8);
        let mut transcript = vec![
            TranscriptEntry::system("preamble text here"),
            TranscriptEntry::user("old"),
            TranscriptEntry::user("new"),
        ];
        budget.trim(&mut transcript, "");
        assert_eq!(transcript[0].role, Role::System);
    }

    #[test]
    fn trim_accounts_for_pending_text() {
        let budget = ContextBudget::new(10, 0.8);
        let mut transcript = turns(2, 8); // 4 tokens
        let removed = budget.trim(&mut transcript, &"y".repeat(28)); // +7 tokens
        assert!(removed >= 1);
    }
}
