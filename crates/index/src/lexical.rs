//! BM25 lexical index over lowercase Unicode word terms.

use std::collections::{BTreeSet, HashMap};

use unicode_segmentation::UnicodeSegmentation;

pub const BM25_K1: f64 = 1.2;
pub const BM25_B: f64 = 0.75;

/// Lowercase Unicode words of `text`, in order, with repeats.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

#[derive(Debug, Clone, PartialEq)]
struct Posting {
    slot: usize,
    tf: u32,
}

/// Inverted index keyed by slot (position of the chunk in the snapshot).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LexicalIndex {
    postings: HashMap<String, Vec<Posting>>,
    doc_lens: Vec<usize>,
    total_len: usize,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index over `texts`; slot `i` is the `i`-th text.
    pub fn from_texts<'a, I>(texts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = Self::new();
        for text in texts {
            index.add(text);
        }
        index
    }

    /// Append a text as the next slot and return that slot.
    pub fn add(&mut self, text: &str) -> usize {
        let slot = self.doc_lens.len();
        let terms = tokenize(text);

        let mut tf: HashMap<String, u32> = HashMap::new();
        for term in &terms {
            *tf.entry(term.clone()).or_default() += 1;
        }
        for (term, count) in tf {
            self.postings
                .entry(term)
                .or_default()
                .push(Posting { slot, tf: count });
        }

        self.doc_lens.push(terms.len());
        self.total_len += terms.len();
        slot
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// Number of slots containing `term` (already lowercased).
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, Vec::len)
    }

    /// BM25 search. Returns `(slot, score)` by descending score, ties by
    /// slot. A query with no terms, or an empty index, gives no results.
    pub fn search(&self, query: &str, top_n: usize) -> Vec<(usize, f64)> {
        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() || self.is_empty() || top_n == 0 {
            return Vec::new();
        }

        let n = self.doc_lens.len() as f64;
        let avgdl = (self.total_len as f64 / n).max(1e-9);
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for posting in postings {
                let tf = posting.tf as f64;
                let dl = self.doc_lens[posting.slot] as f64;
                let norm = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl);
                *scores.entry(posting.slot).or_default() += idf * tf * (BM25_K1 + 1.0) / norm;
            }
        }

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(top_n);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_words() {
        assert_eq!(
            tokenize("Hello, World! borrow-checker"),
            vec!["hello", "world", "borrow", "checker"]
        );
        assert!(tokenize("  ... !!").is_empty());
    }

    #[test]
    fn empty_query_or_index_returns_nothing() {
        let index = LexicalIndex::from_texts(["token budget allocation"]);
        assert!(index.search("", 5).is_empty());
        assert!(index.search("?!", 5).is_empty());
        assert!(LexicalIndex::new().search("budget", 5).is_empty());
    }

    #[test]
    fn ranks_matching_documents() {
        let index = LexicalIndex::from_texts([
            "the cat sat on the mat",
            "budget allocation for context tokens",
            "token budget budget budget",
        ]);
        let ranked = index.search("Budget", 10);
        let slots: Vec<usize> = ranked.iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![2, 1]);
        assert!(ranked[0].1 > ranked[1].1);
    }

    #[test]
    fn rare_terms_weigh_more() {
        let index = LexicalIndex::from_texts([
            "common words here",
            "common words there",
            "common rare words",
        ]);
        assert_eq!(index.document_frequency("common"), 3);
        let ranked = index.search("common rare", 3);
        assert_eq!(ranked[0].0, 2);
    }

    #[test]
    fn equal_scores_break_by_slot() {
        let index = LexicalIndex::from_texts(["alpha beta", "alpha beta", "gamma"]);
        let ranked = index.search("alpha", 10);
        assert_eq!(ranked.iter().map(|(s, _)| *s).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(ranked[0].1, ranked[1].1);
    }

    #[test]
    fn idf_is_positive_even_for_ubiquitous_terms() {
        let index = LexicalIndex::from_texts(["same", "same"]);
        let ranked = index.search("same", 2);
        assert!(ranked.iter().all(|(_, score)| *score > 0.0));
    }
}
