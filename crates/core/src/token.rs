//! Token counting.
//!
//! The engine never depends on a specific tokenizer; it only needs a
//! function from text to an integer cost. [`TokenCounter`] is that
//! contract, plus boundary-aware prefix fitting used for truncation.
//!
//! Two counters ship with the crate:
//! - [`HeuristicTokenCounter`]: ~4 bytes per token, rounded up. Accurate
//!   within ~10% for BPE tokenizers on English text.
//! - [`WhitespaceTokenCounter`]: one token per whitespace-separated word.
//!   Exact and easy to reason about, which makes it the counter of choice
//!   in tests.

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Maps text to an integer token cost.
///
/// Implementations must be monotonic over prefixes: a longer prefix of the
/// same text never costs fewer tokens. The default [`fit_prefix`] relies
/// on this to binary-search the cut point.
///
/// [`fit_prefix`]: TokenCounter::fit_prefix
pub trait TokenCounter: Send + Sync {
    fn name(&self) -> &str;

    fn count(&self, text: &str) -> usize;

    /// Longest prefix of `text` costing at most `max_tokens`.
    ///
    /// The cut lands on a UTF-8 character boundary and, when it would split
    /// a word, backs off to the preceding whitespace. Trailing whitespace
    /// is trimmed from a cut prefix.
    fn fit_prefix<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str {
        if self.count(text) <= max_tokens {
            return text;
        }
        if max_tokens == 0 {
            return "";
        }

        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(text.len()))
            .collect();
        let fitting = boundaries.partition_point(|&b| self.count(&text[..b]) <= max_tokens);
        if fitting == 0 {
            return "";
        }
        let cut = boundaries[fitting - 1];
        let head = &text[..cut];

        let splits_word = text[cut..].chars().next().is_some_and(|c| !c.is_whitespace())
            && head.chars().next_back().is_some_and(|c| !c.is_whitespace());
        let head = if splits_word {
            match head.rfind(char::is_whitespace) {
                Some(ws) if ws > 0 => &head[..ws],
                // A single word longer than the limit: hard cut.
                _ => head,
            }
        } else {
            head
        };
        head.trim_end()
    }

    /// Owned version of [`fit_prefix`](TokenCounter::fit_prefix).
    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        self.fit_prefix(text, max_tokens).to_string()
    }
}

/// ~4 bytes per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// One token per whitespace-separated word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}
