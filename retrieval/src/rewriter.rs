//! Deterministic query rewriting.
//!
//! Proposals are tried in a fixed order and the first one that differs from
//! the original and from every query already tried in this request wins:
//!
//! 1. [`RewriteKind::Broaden`]: keep only the query's keywords
//! 2. [`RewriteKind::Synonym`]: substitute words from the synonym table
//! 3. [`RewriteKind::Narrow`]: add frequent terms from the latest candidates
//! 4. [`RewriteKind::Expand`]: append the configured expansion terms
//! 5. [`RewriteKind::Trim`]: drop trailing keywords, one at a time

use std::cmp::Reverse;
use std::collections::HashSet;

use adaptive_index::text::{keywords, tokenize, unique_keywords};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attempt::Attempt;
use crate::config::RewriterConfig;
use crate::error::{Result, RetrievalError};
use crate::query::{Query, normalize};

/// How a rewritten query was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteKind {
    Broaden,
    Synonym,
    Narrow,
    Expand,
    Trim,
}

/// Proposes alternative phrasings of a query.
#[derive(Debug, Clone, Default)]
pub struct QueryRewriter {
    config: RewriterConfig,
}

impl QueryRewriter {
    pub fn new(config: RewriterConfig) -> Self {
        Self { config }
    }

    /// Produce a query distinct from `original` and from every query in
    /// `history`, the attempts already made with the current strategy.
    ///
    /// The result depends only on its inputs. Fails with
    /// [`RetrievalError::NoRewriteAvailable`] when every proposal repeats.
    pub fn rewrite(&self, original: &Query, history: &[&Attempt]) -> Result<Query> {
        let mut seen: HashSet<String> = HashSet::from([original.normalized()]);
        for attempt in history {
            seen.insert(attempt.query.normalized());
            seen.extend(
                attempt
                    .query
                    .ancestors()
                    .iter()
                    .map(String::as_str)
                    .map(normalize),
            );
        }

        let parent = history.last().map(|a| &a.query).unwrap_or(original);

        for (kind, text) in self.proposals(original, history) {
            let normalized = normalize(&text);
            if normalized.is_empty() || seen.contains(&normalized) {
                continue;
            }
            debug!("Rewrote '{}' as '{text}' ({kind:?})", parent.text());
            return Ok(parent.derive(text, kind));
        }

        Err(RetrievalError::NoRewriteAvailable)
    }

    fn proposals(&self, original: &Query, history: &[&Attempt]) -> Vec<(RewriteKind, String)> {
        let terms = unique_keywords(original.text());
        let mut proposals = vec![(RewriteKind::Broaden, terms.join(" "))];

        let tokens = tokenize(original.text());
        let mut substituted = false;
        let synonyms: Vec<&str> = tokens
            .iter()
            .map(|token| match self.config.synonyms.get(token) {
                Some(synonym) => {
                    substituted = true;
                    synonym.as_str()
                }
                None => token.as_str(),
            })
            .collect();
        if substituted {
            proposals.push((RewriteKind::Synonym, synonyms.join(" ")));
        }

        let context = self.context_terms(&terms, history);
        if !context.is_empty() {
            proposals.push((
                RewriteKind::Narrow,
                format!("{} {}", original.text(), context.join(" ")),
            ));
        }

        let expansion = self.config.expansion_terms.trim();
        if !expansion.is_empty() {
            proposals.push((RewriteKind::Expand, format!("{} {expansion}", original.text())));
        }

        for keep in (1..terms.len()).rev() {
            proposals.push((RewriteKind::Trim, terms[..keep].join(" ")));
        }

        proposals
    }

    /// Most frequent keywords across the latest candidates, excluding terms
    /// already in the query. Ties keep first appearance.
    fn context_terms(&self, query_terms: &[String], history: &[&Attempt]) -> Vec<String> {
        let Some(latest) = history.iter().rev().find(|a| !a.candidates.is_empty()) else {
            return Vec::new();
        };

        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for candidate in &latest.candidates {
            let mut in_candidate = HashSet::new();
            for word in keywords(&candidate.content) {
                if query_terms.contains(&word) || !in_candidate.insert(word.clone()) {
                    continue;
                }
                *counts.entry(word).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by_key(|(_, count)| Reverse(*count));
        ranked
            .into_iter()
            .take(self.config.max_context_terms)
            .map(|(word, _)| word)
            .collect()
    }
}
