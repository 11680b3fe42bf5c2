//! # fluxgate-cluster
//!
//! Supervision of the external gossip-membership agent used for node
//! discovery. The gossip protocol itself is not re-implemented; this
//! crate owns the contract around invoking it as an independently
//! versioned binary: install when missing, verify it is invocable, spawn
//! it with derived arguments, observe its exit, terminate on shutdown.

mod agent;
mod downloader;
mod error;

pub use agent::{AgentConfig, ClusterAgent, BIND_PORT, DEFAULT_BIND_PORT, RPC_PORT};
pub use downloader::{AgentDownloader, DownloaderConfig, DEFAULT_BASE_URL, DEFAULT_VERSION};
pub use error::ClusterError;
