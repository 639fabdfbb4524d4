//! Document chunking.
//!
//! Splitting happens in two passes:
//! 1. **Segment and pack**: the document is cut into segments (paragraphs,
//!    then sentences for oversized paragraphs, then a hard cut for oversized
//!    sentences) and segments are packed greedily into spans of at most
//!    `chunk_size` tokens. Packed spans are contiguous and cover the whole
//!    document.
//! 2. **Overlap**: each span after the first is extended backwards with
//!    the tail of the previous span, starting on a word boundary and
//!    costing at most `chunk_overlap` tokens.
//!
//! Because fresh ranges are contiguous, dropping the `overlap_len` prefix of
//! every chunk and concatenating gives back the original document.

use std::sync::Arc;

use ctxpack_config::ContextConfig;
use ctxpack_core::TokenCounter;
use unicode_segmentation::UnicodeSegmentation;

/// Bytes per token assumed when sizing the window a hard cut searches.
/// The window doubles until the cut lands inside it, so this only affects
/// speed, never where the cut falls.
const HARD_CUT_WINDOW_BYTES_PER_TOKEN: usize = 8;

/// Byte range of one chunk in its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Start of the chunk text, including any overlap.
    pub start: usize,
    pub end: usize,
    /// Bytes at the front repeated from the previous chunk.
    pub overlap_len: usize,
}

impl ChunkSpan {
    pub fn text<'a>(&self, document: &'a str) -> &'a str {
        &document[self.start..self.end]
    }

    /// Start of the part that is new in this chunk.
    pub fn fresh_start(&self) -> usize {
        self.start + self.overlap_len
    }
}

/// Splits documents into overlapping, token-bounded chunks.
#[derive(Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("counter", &self.counter.name())
            .finish()
    }
}

impl Chunker {
    /// `chunk_size` is clamped to at least 1 and `chunk_overlap` to below it.
    pub fn new(chunk_size: usize, chunk_overlap: usize, counter: Arc<dyn TokenCounter>) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            counter,
        }
    }

    pub fn from_config(config: &ContextConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap, counter)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// Split `document` into chunk spans. Empty or whitespace-only
    /// documents produce no chunks.
    pub fn split(&self, document: &str) -> Vec<ChunkSpan> {
        if document.trim().is_empty() {
            return Vec::new();
        }

        let segments = self.segments(document);
        let packed = self.pack(document, &segments);
        self.apply_overlap(document, packed)
    }

    // ── Pass 1: segments ───────────────────────────────────────────────

    /// Contiguous `(start, end)` segments, each within `chunk_size`.
    /// Blank runs are folded into a neighbour while the merge still fits.
    fn segments(&self, document: &str) -> Vec<(usize, usize)> {
        let mut raw = Vec::new();
        let mut offset = 0;

        for paragraph in document.split_inclusive("\n\n") {
            let start = offset;
            offset += paragraph.len();

            if self.counter.count(paragraph) <= self.chunk_size {
                raw.push((start, offset));
                continue;
            }

            for (rel, sentence) in paragraph.split_sentence_bound_indices() {
                let s_start = start + rel;
                if self.counter.count(sentence) <= self.chunk_size {
                    raw.push((s_start, s_start + sentence.len()));
                } else {
                    self.hard_cut(sentence, s_start, &mut raw);
                }
            }
        }

        self.fold_whitespace(document, raw)
    }

    fn hard_cut(&self, text: &str, base: usize, out: &mut Vec<(usize, usize)>) {
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            let mut len = self.cut_len(rest);
            if len == 0 {
                // Always make progress: take one character.
                len = rest.chars().next().map_or(rest.len(), char::len_utf8);
            }
            out.push((base + pos, base + pos + len));
            pos += len;
        }
    }

    /// Length of the longest boundary-aware prefix of `rest` within
    /// `chunk_size`, searched in a bounded window so a long unpunctuated
    /// document is cut in linear time.
    fn cut_len(&self, rest: &str) -> usize {
        let mut window = self
            .chunk_size
            .saturating_mul(HARD_CUT_WINDOW_BYTES_PER_TOKEN)
            .max(64);
        loop {
            let end = floor_char_boundary(rest, window);
            let head = self.counter.fit_prefix(&rest[..end], self.chunk_size);
            // A prefix shorter than the window was cut against a real
            // overflow, so the text beyond the window cannot change it.
            if head.len() < end || end == rest.len() {
                return head.len();
            }
            window = window.saturating_mul(2);
        }
    }

    /// Attach blank segments to the preceding segment (or the following one
    /// at the start of the document) when the merged span fits in
    /// `chunk_size`. A blank run that does not fit stays a segment of its own.
    fn fold_whitespace(&self, document: &str, raw: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        let fits =
            |start: usize, end: usize| self.counter.count(&document[start..end]) <= self.chunk_size;
        let mut folded: Vec<(usize, usize)> = Vec::with_capacity(raw.len());
        let mut leading: Option<(usize, usize)> = None;

        for (start, end) in raw {
            let blank = document[start..end].trim().is_empty();
            if blank {
                if let Some(last) = folded.last_mut() {
                    if fits(last.0, end) {
                        last.1 = end;
                    } else {
                        folded.push((start, end));
                    }
                    continue;
                }
                match leading {
                    None => leading = Some((start, end)),
                    Some((lead_start, _)) if fits(lead_start, end) => {
                        leading = Some((lead_start, end));
                    }
                    Some(run) => {
                        folded.push(run);
                        folded.push((start, end));
                        leading = None;
                    }
                }
                continue;
            }

            match leading.take() {
                Some((lead_start, _)) if fits(lead_start, end) => folded.push((lead_start, end)),
                Some(run) => {
                    folded.push(run);
                    folded.push((start, end));
                }
                None => folded.push((start, end)),
            }
        }
        if let Some(run) = leading {
            folded.push(run);
        }
        folded
    }

    /// Greedily merge consecutive segments while the merged text fits.
    fn pack(&self, document: &str, segments: &[(usize, usize)]) -> Vec<(usize, usize)> {
        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        for &(start, end) in segments {
            current = match current {
                None => Some((start, end)),
                Some((cur_start, cur_end)) => {
                    if self.counter.count(&document[cur_start..end]) <= self.chunk_size {
                        Some((cur_start, end))
                    } else {
                        spans.push((cur_start, cur_end));
                        Some((start, end))
                    }
                }
            };
        }
        if let Some(span) = current {
            spans.push(span);
        }
        spans
    }

    // ── Pass 2: overlap ────────────────────────────────────────────────

    fn apply_overlap(&self, document: &str, packed: Vec<(usize, usize)>) -> Vec<ChunkSpan> {
        let mut chunks = Vec::with_capacity(packed.len());
        let mut previous: Option<(usize, usize)> = None;

        for (start, end) in packed {
            let overlap_start = match previous {
                Some((prev_start, prev_end)) if self.chunk_overlap > 0 => {
                    self.overlap_start(document, prev_start, prev_end)
                }
                _ => start,
            };
            chunks.push(ChunkSpan {
                start: overlap_start,
                end,
                overlap_len: start - overlap_start,
            });
            previous = Some((start, end));
        }
        chunks
    }

    /// Earliest word start in `[from, to)` whose suffix up to `to` costs at
    /// most `chunk_overlap` tokens. Returns `to` when no word fits.
    fn overlap_start(&self, document: &str, from: usize, to: usize) -> usize {
        let region = &document[from..to];
        let mut best = to;

        for (rel, _) in region.split_word_bound_indices().rev() {
            let at = from + rel;
            let starts_word = document[at..]
                .chars()
                .next()
                .is_some_and(|c| !c.is_whitespace());
            if !starts_word {
                continue;
            }
            if self.counter.count(&document[at..to]) > self.chunk_overlap {
                break;
            }
            best = at;
        }
        best
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxpack_core::{HeuristicTokenCounter, WhitespaceTokenCounter};

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(size, overlap, Arc::new(WhitespaceTokenCounter))
    }

    fn rebuild(document: &str, spans: &[ChunkSpan]) -> String {
        spans
            .iter()
            .map(|s| &document[s.fresh_start()..s.end])
            .collect()
    }

    #[test]
    fn empty_document_has_no_chunks() {
        assert!(chunker(10, 2).split("").is_empty());
        assert!(chunker(10, 2).split("  \n\n\t ").is_empty());
    }

    #[test]
    fn short_document_is_one_chunk() {
        let doc = "A short note about budgets.";
        let spans = chunker(10, 2).split(doc);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text(doc), doc);
        assert_eq!(spans[0].overlap_len, 0);
    }

    #[test]
    fn splits_on_paragraphs_first() {
        let doc = "one two three four\n\nfive six seven eight\n\nnine ten";
        let spans = chunker(5, 0).split(doc);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].text(doc), "one two three four\n\n");
        assert_eq!(spans[2].text(doc), "nine ten");
    }

    #[test]
    fn oversized_paragraph_splits_on_sentences() {
        let doc = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let spans = chunker(4, 0).split(doc);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].text(doc), "Alpha beta gamma. ");
        assert_eq!(spans[1].text(doc), "Delta epsilon zeta. ");
    }

    #[test]
    fn oversized_sentence_is_hard_cut() {
        let doc = "w1 w2 w3 w4 w5 w6 w7";
        let spans = chunker(3, 0).split(doc);
        for span in &spans {
            assert!(WhitespaceTokenCounter.count(span.text(doc)) <= 3);
        }
        assert_eq!(rebuild(doc, &spans), doc);
    }

    #[test]
    fn overlap_repeats_previous_tail_on_word_boundary() {
        let doc = "one two three four\n\nfive six seven eight";
        let spans = chunker(5, 2).split(doc);
        assert_eq!(spans.len(), 2);
        let second = spans[1].text(doc);
        assert!(second.starts_with("three four"), "got {second:?}");
        assert!(WhitespaceTokenCounter.count(&second[..spans[1].overlap_len]) <= 2);
    }

    #[test]
    fn round_trip_rebuilds_document() {
        let doc = "First paragraph has several words in it.\n\n\
                   Second paragraph. It has two sentences!\n\n\n\
                   Third one is longer than the others, with commas, clauses and more words to split.\n";
        for (size, overlap) in [(4, 1), (6, 2), (10, 3), (50, 10)] {
            let spans = chunker(size, overlap).split(doc);
            assert_eq!(rebuild(doc, &spans), doc, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn multibyte_text_never_splits_characters() {
        let doc = "日本語のテキスト。これは二番目の文です。".repeat(3);
        let counter = Arc::new(HeuristicTokenCounter);
        let spans = Chunker::new(4, 1, counter).split(&doc);
        assert!(spans.len() > 1);
        for span in &spans {
            assert!(doc.is_char_boundary(span.start));
            assert!(doc.is_char_boundary(span.end));
        }
        assert_eq!(rebuild(&doc, &spans), doc);
    }

    #[test]
    fn blank_runs_never_inflate_a_chunk() {
        let counter = Arc::new(HeuristicTokenCounter);
        let doc = format!(
            "{}\n\n{}\n\nnext paragraph here",
            "abcd ".repeat(8),
            " ".repeat(400)
        );
        let chunker = Chunker::new(10, 2, counter.clone());
        let spans = chunker.split(&doc);
        for span in &spans {
            let cost = counter.count(span.text(&doc));
            assert!(cost <= 12, "chunk {span:?} costs {cost} tokens");
        }
        assert_eq!(rebuild(&doc, &spans), doc);
    }

    #[test]
    fn leading_blank_run_is_bounded_too() {
        let counter = Arc::new(HeuristicTokenCounter);
        let doc = format!("{}\n\nbody text", " ".repeat(200));
        let spans = Chunker::new(8, 0, counter.clone()).split(&doc);
        for span in &spans {
            assert!(counter.count(span.text(&doc)) <= 8);
        }
        assert_eq!(rebuild(&doc, &spans), doc);
    }

    #[test]
    fn windowed_cut_matches_full_text_cut() {
        let counter = HeuristicTokenCounter;
        let doc = "lorem ipsum dolor sit amet consectetur ".repeat(200);
        let chunker = Chunker::new(16, 0, Arc::new(counter));
        assert_eq!(
            chunker.cut_len(&doc),
            counter.fit_prefix(&doc, 16).len()
        );
        let words = WhitespaceTokenCounter;
        let chunker = Chunker::new(5, 0, Arc::new(words));
        let long_words = "antidisestablishmentarianism ".repeat(40);
        assert_eq!(
            chunker.cut_len(&long_words),
            words.fit_prefix(&long_words, 5).len()
        );
    }

    #[test]
    fn long_unpunctuated_document_is_cut_within_bounds() {
        let counter = Arc::new(HeuristicTokenCounter);
        let doc = "word ".repeat(100_000);
        let spans = Chunker::new(64, 8, counter.clone()).split(&doc);
        assert!(spans.len() > 1000);
        for span in &spans {
            assert!(counter.count(span.text(&doc)) <= 72);
        }
        assert_eq!(rebuild(&doc, &spans), doc);
    }

    #[test]
    fn overlap_clamped_below_chunk_size() {
        let c = chunker(3, 10);
        assert_eq!(c.chunk_overlap(), 2);
    }
}
