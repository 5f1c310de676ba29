//! Deterministic cache keys

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cache key for a cached payload
///
/// A key is the triple (data kind, subject, extra params). Params are kept
/// sorted by name, so insertion order never changes the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Data kind tag, drives the TTL
    pub data_kind: String,
    /// Entity the data is about, absent for subject-agnostic data
    pub subject: Option<String>,
    /// Additional request parameters
    pub params: BTreeMap<String, String>,
}

impl CacheKey {
    /// Create a subject-agnostic key
    pub fn new(data_kind: impl Into<String>) -> Self {
        Self {
            data_kind: data_kind.into(),
            subject: None,
            params: BTreeMap::new(),
        }
    }

    pub fn for_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Hex SHA-256 over the canonical form of the key.
    ///
    /// Every component is length-prefixed before hashing, so no choice of
    /// kind, subject or param text can make two distinct keys canonicalize to
    /// the same bytes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        absorb(&mut hasher, "kind", &self.data_kind);
        match &self.subject {
            Some(subject) => absorb(&mut hasher, "subject", subject),
            None => absorb(&mut hasher, "no-subject", ""),
        }
        for (name, value) in &self.params {
            absorb(&mut hasher, "param", name);
            absorb(&mut hasher, "value", value);
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data_kind)?;
        if let Some(subject) = &self.subject {
            write!(f, "/{subject}")?;
        }
        for (name, value) in &self.params {
            write!(f, " {name}={value}")?;
        }
        Ok(())
    }
}

fn absorb(hasher: &mut Sha256, tag: &str, value: &str) {
    hasher.update((tag.len() as u64).to_le_bytes());
    hasher.update(tag.as_bytes());
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_creation() {
        let key = CacheKey::new("financial_statements")
            .for_subject("ACME")
            .with_param("period", "annual");
        assert_eq!(key.data_kind, "financial_statements");
        assert_eq!(key.subject.as_deref(), Some("ACME"));
        assert_eq!(key.params.get("period").map(String::as_str), Some("annual"));
        assert_eq!(key.to_string(), "financial_statements/ACME period=annual");
    }

    #[test]
    fn test_digest_is_stable() {
        let key = CacheKey::new("fed_rate").with_param("series", "FEDFUNDS");
        assert_eq!(key.digest(), key.clone().digest());
        assert_eq!(key.digest().len(), 64);

        // Keys must survive restarts, so the canonical form is pinned.
        assert_eq!(
            key.digest(),
            "5cd72bf484f28d5099486183b1b9811b6fe1cea8fbf5816971c12f168c7153ab"
        );
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let a = CacheKey::new("quotes").with_param("a", 1).with_param("b", 2);
        let b = CacheKey::new("quotes").with_param("b", 2).with_param("a", 1);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_distinct_inputs_give_distinct_keys() {
        let base = CacheKey::new("quotes").for_subject("ACME");
        let variants = [
            CacheKey::new("quotes"),
            CacheKey::new("quotes").for_subject(""),
            CacheKey::new("quote").for_subject("ACME"),
            CacheKey::new("quotes").for_subject("acme"),
            base.clone().with_param("range", "1y"),
            base.clone().with_param("range", "5y"),
            base.clone().with_param("rang", "e1y"),
        ];

        let mut digests: Vec<String> = variants.iter().map(CacheKey::digest).collect();
        digests.push(base.digest());
        let unique: std::collections::HashSet<_> = digests.iter().collect();
        assert_eq!(unique.len(), digests.len());
    }

    #[test]
    fn test_separator_injection_does_not_collide() {
        let a = CacheKey::new("kind|ACME");
        let b = CacheKey::new("kind").for_subject("ACME");
        assert_ne!(a.digest(), b.digest());

        let c = CacheKey::new("k").with_param("a", "b:c");
        let d = CacheKey::new("k").with_param("a:b", "c");
        assert_ne!(c.digest(), d.digest());
    }
}
