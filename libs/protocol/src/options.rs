//! Per-call emit options and default-option merging.

use std::time::Duration;

/// Options applied to a single `emit_message` / `emit_notification` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitOptions {
    /// Target dataset; falls back to the connection's default dataset.
    pub dataset: Option<String>,

    /// Reply timeout; falls back to the request body's `timeout` key
    /// (milliseconds), then to the connection's default.
    pub timeout: Option<Duration>,
}

impl EmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overlays `overrides` on top of `self`, producing a new value.
    /// Neither input is mutated; callers keep ownership of their options.
    pub fn merged_with(&self, overrides: &EmitOptions) -> EmitOptions {
        EmitOptions {
            dataset: overrides.dataset.clone().or_else(|| self.dataset.clone()),
            timeout: overrides.timeout.or(self.timeout),
        }
    }
}
