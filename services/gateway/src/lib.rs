//! # fluxgate-gateway
//!
//! HTTP gateway in front of a distributed search-engine backend. Wires
//! the backend connection pool, the rule-driven response cache, and the
//! cluster membership agent together behind a small REST surface.

pub mod api;
pub mod config;

pub use api::{router, AppState, CACHE_HEADER};
pub use config::Config;
