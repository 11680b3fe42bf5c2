//! # fluxgate-response-cache
//!
//! Rule-driven TTL cache over backend responses. Rules decide, per
//! incoming request, whether and for how long a response may be served
//! from cache. Only `GET` requests are ever eligible: caching is unsafe
//! for side-effecting verbs, so POST/PUT/DELETE never match any rule.

mod config;
mod rule;
mod store;

use std::time::Duration;

use thiserror::Error;

pub use config::{CacheConfig, RuleConfig, TtlOptions, DEFAULT_SIZE, DEFAULT_TTL_MS};
pub use rule::Rule;
pub use store::CachedResponse;

use store::Store;

/// Errors from cache construction.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A rule's pattern is not a valid regular expression.
    #[error("invalid cache rule pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Bounded, TTL-aware cache over backend responses, gated by rules.
pub struct ResponseCache {
    rules: Vec<Rule>,
    store: Store,
}

impl ResponseCache {
    /// Compiles every rule (freezing its TTL) and sizes the store.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| Rule::new(rule, &config))
            .collect::<Result<Vec<_>, _>>()?;
        let capacity = config.size.unwrap_or(DEFAULT_SIZE);

        Ok(Self {
            rules,
            store: Store::new(capacity),
        })
    }

    /// First matching rule in declaration order, or `None`. Requests with
    /// any method but `GET` never match.
    pub fn get_rule(&self, method: &str, url: &str) -> Option<&Rule> {
        if !method.eq_ignore_ascii_case("GET") {
            return None;
        }
        self.rules.iter().find(|rule| rule.matches(url))
    }

    /// A fresh cached response for `key`, if any.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        self.store.get(key).await
    }

    /// Stores a response under `key` for `ttl`.
    pub async fn set(&self, key: &str, value: CachedResponse, ttl: Duration) {
        self.store.set(key, value, ttl).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with_rules(rules: &[(&str, Option<u64>)]) -> ResponseCache {
        let config = CacheConfig {
            rules: rules
                .iter()
                .map(|(regex, ttl_ms)| RuleConfig {
                    regex: regex.to_string(),
                    ttl: TtlOptions {
                        ttl_in_milliseconds: *ttl_ms,
                        ..Default::default()
                    },
                })
                .collect(),
            ..Default::default()
        };
        ResponseCache::new(config).unwrap()
    }

    fn response(marker: &str) -> CachedResponse {
        CachedResponse {
            status_code: 200,
            body: json!({ "marker": marker }),
        }
    }

    #[test]
    fn post_requests_never_match() {
        let cache = cache_with_rules(&[(".", Some(10))]);
        assert!(cache.get_rule("POST", "anything").is_none());
        assert!(cache.get_rule("PUT", "anything").is_none());
        assert!(cache.get_rule("DELETE", "anything").is_none());
        assert!(cache.get_rule("GET", "anything").is_some());
    }

    #[test]
    fn first_matching_rule_wins() {
        let cache = cache_with_rules(&[("never", Some(1)), ("foo", Some(20)), (".", Some(30))]);
        let rule = cache.get_rule("GET", "foo").unwrap();
        assert_eq!(rule.ttl(), Duration::from_millis(20));
    }

    #[test]
    fn url_pattern_mismatch_yields_no_rule() {
        let cache = cache_with_rules(&[("foo", Some(10))]);
        assert!(cache.get_rule("GET", "foo").is_some());
        assert!(cache.get_rule("GET", "bar").is_none());
    }

    #[tokio::test]
    async fn entries_expire_lazily() {
        let cache = cache_with_rules(&[]);
        cache
            .set("GET /a", response("a"), Duration::from_millis(30))
            .await;

        assert_eq!(cache.get("GET /a").await, Some(response("a")));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("GET /a").await, None);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_accessed() {
        let cache = ResponseCache::new(CacheConfig {
            size: Some(2),
            ..Default::default()
        })
        .unwrap();
        let ttl = Duration::from_secs(60);

        cache.set("a", response("a"), ttl).await;
        cache.set("b", response("b"), ttl).await;
        // touch "a" so "b" is the eviction candidate
        assert!(cache.get("a").await.is_some());

        cache.set("c", response("c"), ttl).await;
        assert_eq!(cache.store.len().await, 2);
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());
    }
}
