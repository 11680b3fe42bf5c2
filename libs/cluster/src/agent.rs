//! Supervises the external gossip agent process.
//!
//! The agent joins this node into the membership cluster and discovers
//! peers. The supervisor installs the binary when missing, verifies it is
//! invocable, spawns it with derived arguments, watches its exit, and can
//! shut it down. It never restarts the agent on its own: a process that
//! dies clears internal state so the caller may `start()` again.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::downloader::{AgentDownloader, DownloaderConfig};
use crate::error::ClusterError;

/// Gossip port appended to peer addresses that lack one.
pub const DEFAULT_BIND_PORT: u16 = 7946;

/// Port the agent binds for gossip traffic.
pub const BIND_PORT: u16 = 8946;

/// Port the agent binds for RPC. Deliberately distinct from the gossip
/// port: data plane and control plane stay separately addressable.
pub const RPC_PORT: u16 = 8373;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name this node advertises to the cluster.
    pub host_name: String,

    /// Agent binary. An absolute path that does not exist is installed on
    /// demand; a bare name is resolved through `PATH`.
    pub binary: PathBuf,

    /// Role tag advertised to peers.
    pub role: String,

    /// Existing members to join on start; addresses without a port get the
    /// default gossip port appended.
    pub peers: Vec<String>,

    /// Where to fetch the binary from when it is missing.
    pub downloader: DownloaderConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host_name: "127.0.0.1".to_string(),
            binary: PathBuf::from("serf"),
            role: "gateway".to_string(),
            peers: Vec::new(),
            downloader: DownloaderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

struct Inner {
    state: AgentState,
    /// Signals the monitor task to kill the child on a deliberate stop.
    stop_tx: Option<oneshot::Sender<()>>,
}

/// Owns the external gossip agent subprocess. Only the supervisor may
/// signal or reap it.
pub struct ClusterAgent {
    config: AgentConfig,
    inner: Arc<Mutex<Inner>>,
    /// Serializes `start()` so concurrent calls spawn exactly one process.
    start_lock: tokio::sync::Mutex<()>,
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ClusterAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: AgentState::NotStarted,
                stop_tx: None,
            })),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Control-plane address other components use to query this node.
    pub fn rpc_address(&self) -> String {
        format!("{}:{}", self.config.host_name, RPC_PORT)
    }

    /// Starts the agent. Idempotent; concurrent calls spawn exactly one
    /// process. Resolves once the process is spawned, not once it has
    /// joined the cluster.
    pub async fn start(&self) -> Result<(), ClusterError> {
        let _guard = self.start_lock.lock().await;

        if lock_inner(&self.inner).state == AgentState::Running {
            return Ok(());
        }
        lock_inner(&self.inner).state = AgentState::Starting;

        match self.try_start().await {
            Ok(()) => Ok(()),
            Err(err) => {
                lock_inner(&self.inner).state = AgentState::NotStarted;
                Err(err)
            }
        }
    }

    /// Best-effort terminate. The monitor's deliberate-stop branch kills
    /// the child without logging a spurious exit error. Safe to call
    /// before any `start()` or repeatedly.
    pub fn shutdown(&self) {
        let stop_tx = {
            let mut inner = lock_inner(&self.inner);
            let stop_tx = inner.stop_tx.take();
            if stop_tx.is_some() {
                inner.state = AgentState::Stopped;
            }
            stop_tx
        };
        if let Some(tx) = stop_tx {
            info!("shutting down cluster agent");
            let _ = tx.send(());
        }
    }

    async fn try_start(&self) -> Result<(), ClusterError> {
        let binary = self.resolve_binary().await?;
        self.probe(&binary).await?;
        self.spawn_agent(&binary)
    }

    /// Installs the binary when a filesystem path points nowhere: one
    /// install attempt per missing-binary event, never unbounded.
    async fn resolve_binary(&self) -> Result<PathBuf, ClusterError> {
        let mut binary = self.config.binary.clone();
        if binary.is_relative() && binary.to_string_lossy().starts_with('.') {
            binary = std::path::absolute(&binary)?;
        }

        if binary.is_absolute() && !binary.exists() {
            info!(binary = %binary.display(), "agent binary not found, installing");
            let dir = binary
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            AgentDownloader::new(self.config.downloader.clone())
                .save_to(&dir)
                .await?;
            if !binary.exists() {
                return Err(ClusterError::AgentUnavailable(format!(
                    "{} still missing after install",
                    binary.display()
                )));
            }
        }
        Ok(binary)
    }

    /// Lightweight invocability check.
    async fn probe(&self, binary: &Path) -> Result<(), ClusterError> {
        let output = Command::new(binary)
            .arg("version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                ClusterError::AgentUnavailable(format!("{}: {err}", binary.display()))
            })?;
        if !output.status.success() {
            return Err(ClusterError::AgentUnavailable(format!(
                "{} version probe exited with {}",
                binary.display(),
                output.status
            )));
        }
        Ok(())
    }

    fn agent_args(&self) -> Vec<String> {
        let host = &self.config.host_name;
        let role = &self.config.role;
        let mut args = vec![
            "agent".to_string(),
            "-node".to_string(),
            format!("{host}/{role}"),
            "-bind".to_string(),
            format!("{host}:{BIND_PORT}"),
            "-rpc-addr".to_string(),
            format!("{host}:{RPC_PORT}"),
            "-tag".to_string(),
            format!("role={role}"),
        ];
        for peer in &self.config.peers {
            let address = if peer.contains(':') {
                peer.clone()
            } else {
                format!("{peer}:{DEFAULT_BIND_PORT}")
            };
            args.push("-retry-join".to_string());
            args.push(address);
        }
        args
    }

    fn spawn_agent(&self, binary: &Path) -> Result<(), ClusterError> {
        let args = self.agent_args();
        info!(binary = %binary.display(), args = ?args, "starting cluster agent");

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ClusterError::SpawnFailed)?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) if status.success() => {
                            info!("cluster agent exited");
                        }
                        Ok(status) => {
                            error!(status = %status, "cluster agent exited with error");
                        }
                        Err(err) => {
                            error!(error = %err, "failed to wait on cluster agent");
                        }
                    }
                    // the process died on its own; a later start() respawns
                    let mut inner = lock_inner(&inner);
                    inner.state = AgentState::NotStarted;
                    inner.stop_tx = None;
                }
                _ = &mut stop_rx => {
                    if let Err(err) = child.start_kill() {
                        warn!(error = %err, "failed to signal cluster agent");
                    }
                    let _ = child.wait().await;
                }
            }
        });

        let mut inner = lock_inner(&self.inner);
        inner.state = AgentState::Running;
        inner.stop_tx = Some(stop_tx);
        Ok(())
    }

    #[cfg(test)]
    fn state(&self) -> AgentState {
        lock_inner(&self.inner).state
    }
}

impl Drop for ClusterAgent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Writes an executable fake agent. It answers the version probe and
    /// logs one line per real spawn next to itself.
    fn write_fake_agent(dir: &Path, agent_behavior: &str) -> PathBuf {
        let script = format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"version\" ]; then echo fake-agent 1.0; exit 0; fi\n\
             echo started >> \"$(dirname \"$0\")/spawn.log\"\n\
             {agent_behavior}\n"
        );
        let path = dir.join("serf");
        std::fs::write(&path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn spawn_count(dir: &Path) -> usize {
        std::fs::read_to_string(dir.join("spawn.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    fn agent_with_binary(binary: PathBuf) -> ClusterAgent {
        ClusterAgent::new(AgentConfig {
            binary,
            ..Default::default()
        })
    }

    #[test]
    fn rpc_address_uses_the_rpc_port() {
        let agent = ClusterAgent::new(AgentConfig {
            host_name: "node0".to_string(),
            ..Default::default()
        });
        assert_eq!(agent.rpc_address(), "node0:8373");
    }

    #[test]
    fn retry_join_appends_the_default_bind_port() {
        let agent = ClusterAgent::new(AgentConfig {
            host_name: "node0".to_string(),
            peers: vec!["node1".to_string(), "node2:8946".to_string()],
            ..Default::default()
        });

        let args = agent.agent_args();
        assert_eq!(
            args,
            [
                "agent",
                "-node",
                "node0/gateway",
                "-bind",
                "node0:8946",
                "-rpc-addr",
                "node0:8373",
                "-tag",
                "role=gateway",
                "-retry-join",
                "node1:7946",
                "-retry-join",
                "node2:8946",
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_before_start_is_a_safe_noop() {
        let agent = agent_with_binary(PathBuf::from("/nonexistent/serf"));
        agent.shutdown();
        agent.shutdown();
        assert_eq!(agent.state(), AgentState::NotStarted);
    }

    #[tokio::test]
    async fn start_spawns_and_shutdown_stops() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_fake_agent(dir.path(), "sleep 30");
        let agent = agent_with_binary(binary);

        agent.start().await.unwrap();
        assert_eq!(agent.state(), AgentState::Running);
        assert_eq!(spawn_count(dir.path()), 1);

        agent.shutdown();
        assert_eq!(agent.state(), AgentState::Stopped);
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_exactly_one_process() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_fake_agent(dir.path(), "sleep 30");
        let agent = agent_with_binary(binary);

        let (first, second) = tokio::join!(agent.start(), agent.start());
        first.unwrap();
        second.unwrap();

        assert_eq!(spawn_count(dir.path()), 1);
        agent.shutdown();
    }

    #[tokio::test]
    async fn failed_probe_is_unavailable_and_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serf");
        std::fs::write(&path, "#!/bin/sh\nexit 2\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let agent = agent_with_binary(path);
        let err = agent.start().await.unwrap_err();
        assert!(matches!(err, ClusterError::AgentUnavailable(_)));
        assert_eq!(agent.state(), AgentState::NotStarted);
    }

    #[tokio::test]
    async fn unexpected_exit_clears_state_for_a_respawn() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_fake_agent(dir.path(), "exit 1");
        let agent = agent_with_binary(binary);

        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(agent.state(), AgentState::NotStarted);

        // the supervisor does not auto-restart, but a new start() may
        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(spawn_count(dir.path()), 2);
    }

    #[tokio::test]
    async fn missing_binary_is_installed_then_started() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let script = "#!/bin/sh\n\
                      if [ \"$1\" = \"version\" ]; then echo fake-agent 1.0; exit 0; fi\n\
                      sleep 30\n";
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/.+/serf_.+$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(script.as_bytes()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let agent = ClusterAgent::new(AgentConfig {
            binary: dir.path().join("serf"),
            downloader: DownloaderConfig {
                base_url: server.uri(),
                ..Default::default()
            },
            ..Default::default()
        });

        agent.start().await.unwrap();
        assert_eq!(agent.state(), AgentState::Running);
        assert!(dir.path().join("serf").exists());
        agent.shutdown();
    }
}
