//! A single cache rule: URL pattern plus a frozen TTL.

use std::time::Duration;

use regex::Regex;

use crate::config::{CacheConfig, RuleConfig, DEFAULT_TTL_MS};
use crate::CacheError;

/// A (matcher, TTL) pair. The effective TTL is resolved once, at
/// construction: rule-local, else cache-global, else the hard default.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    ttl: Duration,
}

impl Rule {
    pub(crate) fn new(rule: &RuleConfig, cache: &CacheConfig) -> Result<Self, CacheError> {
        let pattern = Regex::new(&rule.regex).map_err(|source| CacheError::InvalidPattern {
            pattern: rule.regex.clone(),
            source,
        })?;

        let ttl_ms = rule
            .ttl
            .milliseconds()
            .or_else(|| cache.ttl.milliseconds())
            .unwrap_or(DEFAULT_TTL_MS);

        Ok(Self {
            pattern,
            ttl: Duration::from_millis(ttl_ms),
        })
    }

    /// Tests the full URL string (path and query, not path-only).
    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
