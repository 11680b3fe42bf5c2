//! Cache configuration and TTL normalization.

use serde::Deserialize;

/// Hard default TTL when neither a rule nor the cache names one.
pub const DEFAULT_TTL_MS: u64 = 60_000;

/// Default entry capacity.
pub const DEFAULT_SIZE: usize = 100;

/// A TTL can be spelled three ways; the first non-zero spelling wins.
///
/// An explicit `0` is treated the same as "unset" and falls through to the
/// next level of the resolution chain (see DESIGN.md).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TtlOptions {
    /// Milliseconds.
    pub ttl: Option<u64>,

    /// Milliseconds, long form.
    #[serde(alias = "ttlInMilliSeconds")]
    pub ttl_in_milliseconds: Option<u64>,

    /// Seconds.
    #[serde(alias = "ttlInSeconds")]
    pub ttl_in_seconds: Option<u64>,
}

impl TtlOptions {
    /// First non-zero spelling, in milliseconds.
    pub fn milliseconds(&self) -> Option<u64> {
        [
            self.ttl,
            self.ttl_in_milliseconds,
            self.ttl_in_seconds.map(|seconds| seconds * 1000),
        ]
        .into_iter()
        .flatten()
        .find(|ms| *ms > 0)
    }
}

/// One cache rule as configured.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Pattern tested against the full request URL (path and query).
    pub regex: String,

    #[serde(flatten)]
    pub ttl: TtlOptions,
}

/// Response cache configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry capacity; least-recently-accessed entries are evicted beyond
    /// this bound.
    pub size: Option<usize>,

    /// Cache-global TTL, used by rules that do not set their own.
    #[serde(flatten)]
    pub ttl: TtlOptions,

    /// Rules in declaration order; the first match wins.
    pub rules: Vec<RuleConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_are_scaled_to_milliseconds() {
        let ttl = TtlOptions {
            ttl_in_seconds: Some(2),
            ..Default::default()
        };
        assert_eq!(ttl.milliseconds(), Some(2000));
    }

    #[test]
    fn zero_falls_through_to_the_next_spelling() {
        let ttl = TtlOptions {
            ttl: Some(0),
            ttl_in_milliseconds: Some(250),
            ttl_in_seconds: None,
        };
        assert_eq!(ttl.milliseconds(), Some(250));
    }

    #[test]
    fn config_accepts_the_legacy_spellings() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "size": 10,
                "ttlInMilliSeconds": 500,
                "rules": [
                    { "regex": "^/engine/select", "ttlInSeconds": 3 },
                    { "regex": "." }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.size, Some(10));
        assert_eq!(config.ttl.milliseconds(), Some(500));
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].ttl.milliseconds(), Some(3000));
        assert_eq!(config.rules[1].ttl.milliseconds(), None);
    }
}
