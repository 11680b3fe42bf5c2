//! Error types for cluster agent supervision.

use thiserror::Error;

/// Errors from the agent supervisor and binary downloader.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The agent binary is missing and could not be installed, or its
    /// version probe failed. Fatal for this start attempt; retryable.
    #[error("cluster agent is not available: {0}")]
    AgentUnavailable(String),

    /// Spawning the agent process failed.
    #[error("failed to spawn cluster agent: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Downloading the agent binary failed.
    #[error("agent download failed: {0}")]
    Download(#[from] reqwest::Error),

    /// The downloaded binary did not match the configured checksum.
    #[error("agent checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// I/O while installing or inspecting the binary.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
