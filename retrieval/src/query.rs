//! Queries and query fingerprints.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, RetrievalError};
use crate::rewriter::RewriteKind;

/// A request query, either the caller's original or a rewrite of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    text: String,

    /// Texts this query was derived from, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ancestors: Vec<String>,

    /// How this query was produced from its parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rewrite: Option<RewriteKind>,
}

impl Query {
    /// Create an original query. Blank text is rejected.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(RetrievalError::InvalidArgument(
                "query text must not be blank".to_string(),
            ));
        }
        Ok(Self {
            text,
            ancestors: Vec::new(),
            rewrite: None,
        })
    }

    /// Derive a rewritten query whose lineage ends with `self`.
    pub(crate) fn derive(&self, text: String, kind: RewriteKind) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.text.clone());
        Self {
            text,
            ancestors,
            rewrite: Some(kind),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    pub fn rewrite_kind(&self) -> Option<RewriteKind> {
        self.rewrite
    }

    pub fn is_original(&self) -> bool {
        self.ancestors.is_empty()
    }

    /// Lowercased text with whitespace runs collapsed.
    pub fn normalized(&self) -> String {
        normalize(&self.text)
    }

    /// Fingerprint of the normalized text.
    pub fn hash(&self) -> QueryHash {
        QueryHash::of(&self.text)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Normalize query text for equality checks.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 hex digest of normalized query text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHash(String);

impl QueryHash {
    pub fn of(text: &str) -> Self {
        let digest = Sha256::digest(normalize(text).as_bytes());
        Self(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_blank_query_rejected() {
        assert!(matches!(
            Query::new("   "),
            Err(RetrievalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_derive_extends_lineage() {
        let original = Query::new("database slow").unwrap();
        let first = original.derive("database latency".to_string(), RewriteKind::Synonym);
        let second = first.derive("database".to_string(), RewriteKind::Trim);

        assert!(original.is_original());
        assert_eq!(
            second.ancestors(),
            &["database slow".to_string(), "database latency".to_string()]
        );
        assert_eq!(second.rewrite_kind(), Some(RewriteKind::Trim));
    }

    #[test]
    fn test_hash_ignores_case_and_spacing() {
        assert_eq!(
            QueryHash::of("Database   Slow"),
            QueryHash::of(" database slow ")
        );
        assert_ne!(QueryHash::of("database slow"), QueryHash::of("database"));
        assert_eq!(QueryHash::of("x").as_str().len(), 64);
    }
}
