//! BM25 keyword index.

use std::collections::HashMap;

use crate::text::{keywords, unique_keywords};

/// Term-frequency saturation.
const K1: f32 = 1.2;

/// Length normalization.
const B: f32 = 0.75;

/// Inverted index scored with Okapi BM25.
///
/// Documents occupy slots in insertion order; re-adding an id replaces the
/// document in its existing slot. Equal scores are returned in slot order.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    /// Term -> (slot, term frequency).
    postings: HashMap<String, Vec<(usize, u32)>>,

    /// Document id per slot.
    ids: Vec<String>,

    /// Token count per slot.
    lengths: Vec<usize>,

    /// Document id -> slot.
    slots: HashMap<String, usize>,
}

impl KeywordIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Index a document's text.
    pub fn add(&mut self, id: &str, text: &str) {
        let slot = match self.slots.get(id) {
            Some(&slot) => {
                for entries in self.postings.values_mut() {
                    entries.retain(|(s, _)| *s != slot);
                }
                self.postings.retain(|_, entries| !entries.is_empty());
                slot
            }
            None => {
                let slot = self.ids.len();
                self.ids.push(id.to_string());
                self.lengths.push(0);
                self.slots.insert(id.to_string(), slot);
                slot
            }
        };

        let terms = keywords(text);
        self.lengths[slot] = terms.len();

        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *frequencies.entry(term).or_default() += 1;
        }
        for (term, tf) in frequencies {
            self.postings.entry(term).or_default().push((slot, tf));
        }
    }

    /// Score every document against the query and return the best `k`
    /// with a positive score.
    pub fn search(&self, query: &str, k: usize) -> Vec<(String, f32)> {
        if self.ids.is_empty() || k == 0 {
            return Vec::new();
        }

        let n = self.ids.len() as f32;
        let total: usize = self.lengths.iter().sum();
        let avg_len = (total as f32 / n).max(1.0);

        let mut scores = vec![0.0f32; self.ids.len()];
        for term in unique_keywords(query) {
            let Some(entries) = self.postings.get(&term) else {
                continue;
            };

            let df = entries.len() as f32;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for &(slot, tf) in entries {
                let tf = tf as f32;
                let len_norm = 1.0 - B + B * self.lengths[slot] as f32 / avg_len;
                scores[slot] += idf * tf * (K1 + 1.0) / (tf + K1 * len_norm);
            }
        }

        let mut ranked: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect();
        // Stable sort, descending
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        ranked
            .into_iter()
            .take(k)
            .map(|(slot, score)| (self.ids[slot].clone(), score))
            .collect()
    }
}
