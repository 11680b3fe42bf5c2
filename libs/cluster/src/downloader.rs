//! Fetches the external gossip agent binary when it is not installed.
//!
//! The agent is published as a standalone executable per platform; this
//! module downloads it, optionally verifies a pinned SHA-256, and drops
//! it into the supervisor's binary directory with the executable bit set.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::ClusterError;

/// Default release location for the agent binary.
pub const DEFAULT_BASE_URL: &str = "https://releases.hashicorp.com/serf";

/// Agent version installed when none is configured.
pub const DEFAULT_VERSION: &str = "0.8.2";

/// Where and what to fetch.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Release server base URL.
    pub base_url: String,

    /// Version to install.
    pub version: String,

    /// Expected SHA-256 (hex) of the binary, verified when set.
    pub checksum: Option<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            version: DEFAULT_VERSION.to_string(),
            checksum: None,
        }
    }
}

/// Opaque network-fetch utility used by the supervisor when the agent
/// binary is absent.
pub struct AgentDownloader {
    config: DownloaderConfig,
    client: reqwest::Client,
}

impl AgentDownloader {
    pub fn new(config: DownloaderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn artifact_url(&self) -> String {
        format!(
            "{base}/{version}/serf_{version}_{os}_{arch}",
            base = self.config.base_url.trim_end_matches('/'),
            version = self.config.version,
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
        )
    }

    /// Downloads the agent binary into `dir` and makes it executable.
    /// Returns the installed path.
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf, ClusterError> {
        let url = self.artifact_url();
        info!(url = %url, "installing cluster agent");

        let bytes = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if let Some(expected) = &self.config.checksum {
            let actual = hex::encode(Sha256::digest(&bytes));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(ClusterError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join("serf");
        tokio::fs::write(&path, &bytes).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
        }

        info!(path = %path.display(), size = bytes.len(), "cluster agent installed");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FAKE_BINARY: &[u8] = b"#!/bin/sh\nexit 0\n";

    async fn mock_release_server(status: u16, body: &[u8]) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/0\.8\.2/serf_0\.8\.2_.+$"))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .mount(&server)
            .await;
        server
    }

    fn config_for(server: &MockServer, checksum: Option<String>) -> DownloaderConfig {
        DownloaderConfig {
            base_url: server.uri(),
            version: DEFAULT_VERSION.to_string(),
            checksum,
        }
    }

    #[tokio::test]
    async fn downloads_and_installs_an_executable() {
        let server = mock_release_server(200, FAKE_BINARY).await;
        let dir = tempfile::tempdir().unwrap();

        let downloader = AgentDownloader::new(config_for(&server, None));
        let path = downloader.save_to(dir.path()).await.unwrap();

        assert_eq!(path, dir.path().join("serf"));
        assert_eq!(std::fs::read(&path).unwrap(), FAKE_BINARY);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn verifies_a_pinned_checksum() {
        let server = mock_release_server(200, FAKE_BINARY).await;
        let dir = tempfile::tempdir().unwrap();

        let good = hex::encode(Sha256::digest(FAKE_BINARY));
        let downloader = AgentDownloader::new(config_for(&server, Some(good)));
        downloader.save_to(dir.path()).await.unwrap();

        let downloader = AgentDownloader::new(config_for(&server, Some("00ff".to_string())));
        let err = downloader.save_to(dir.path()).await.unwrap_err();
        assert!(matches!(err, ClusterError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn missing_release_is_a_download_error() {
        let server = mock_release_server(404, b"").await;
        let dir = tempfile::tempdir().unwrap();

        let downloader = AgentDownloader::new(config_for(&server, None));
        let err = downloader.save_to(dir.path()).await.unwrap_err();
        assert!(matches!(err, ClusterError::Download(_)));
    }
}
