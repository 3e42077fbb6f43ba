//! Detects repeating `(node, failure_signature)` patterns and forces a
//! deterministic failure once a configured limit is reached, so a transient
//! failure that never actually clears cannot retry forever. Canonicalization
//! is explicit and testable rather than relying on raw-string equality.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const MAX_SIGNATURE_LEN: usize = 256;

/// Canonicalizes a failure reason into a stable signature: strips numeric
/// noise (ports, pids, byte counts, timestamps embedded in messages),
/// collapses whitespace, lowercases, and truncates. A handler-supplied
/// `failure_signature` is used verbatim instead (it has already chosen its
/// own canonical form).
pub fn canonicalize(reason: &str) -> String {
    let no_digits = DIGITS.replace_all(reason, "#");
    let collapsed = WHITESPACE.replace_all(&no_digits, " ");
    let lower = collapsed.trim().to_lowercase();
    lower.chars().take(MAX_SIGNATURE_LEN).collect()
}

/// Tracks `(node_id, canonical_signature) -> occurrence count` for one run.
#[derive(Debug, Default)]
pub struct CycleBreaker {
    counts: HashMap<(String, String), usize>,
    signature_limit: usize,
}

impl CycleBreaker {
    pub fn new(signature_limit: usize) -> Self {
        Self {
            counts: HashMap::new(),
            signature_limit,
        }
    }

    /// Records one more occurrence of `(node, signature)` and returns true
    /// if this occurrence trips the breaker (count has now reached the
    /// configured limit).
    pub fn record(&mut self, node: &str, signature: &str) -> bool {
        let key = (node.to_string(), signature.to_string());
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        *count >= self.signature_limit
    }

    pub fn count(&self, node: &str, signature: &str) -> usize {
        self.counts.get(&(node.to_string(), signature.to_string())).copied().unwrap_or(0)
    }
}

impl Default for CycleBreaker {
    #[allow(clippy::derivable_impls)]
    fn default() -> Self {
        Self::new(3)
    }
}
