//! Gateway configuration (env-driven).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use fluxgate_protocol::PoolConfig;
use fluxgate_response_cache::CacheConfig;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP surface listens on.
    pub listen_addr: SocketAddr,

    /// Backend pool configuration.
    pub pool: PoolConfig,

    /// Response cache configuration.
    pub cache: CacheConfig,

    /// Cluster agent settings; `None` disables membership.
    pub agent: Option<AgentSettings>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Cluster agent settings, enabled with `FLUXGATE_AGENT=1`.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Name this node advertises to the cluster.
    pub host_name: String,

    /// Agent binary path or command name.
    pub binary: PathBuf,

    /// Role tag advertised to peers.
    pub role: String,

    /// Existing members to join on start.
    pub peers: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("FLUXGATE_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:10041".to_string())
            .parse()
            .context("FLUXGATE_LISTEN_ADDR must be a socket address")?;

        let host_names = env_list("FLUXGATE_BACKEND_HOSTS", &["127.0.0.1"]);
        let receive_host_name = std::env::var("FLUXGATE_RECEIVE_HOST")
            .unwrap_or_else(|_| "127.0.0.1".to_string());

        let pool = PoolConfig {
            tag: std::env::var("FLUXGATE_TAG").unwrap_or_else(|_| "fluxgate".to_string()),
            default_dataset: std::env::var("FLUXGATE_DATASET")
                .unwrap_or_else(|_| "Default".to_string()),
            host_names,
            port: env_parse("FLUXGATE_BACKEND_PORT", 24224)?,
            receive_host_name,
            receive_port: env_parse("FLUXGATE_RECEIVE_PORT", 10030)?,
            default_timeout: Duration::from_millis(env_parse("FLUXGATE_TIMEOUT_MS", 60_000)?),
        };

        let cache = match std::env::var("FLUXGATE_CACHE_RULES") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read cache rules from {path}"))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid cache rules in {path}"))?
            }
            Err(_) => CacheConfig::default(),
        };

        let agent_enabled = std::env::var("FLUXGATE_AGENT")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let agent = agent_enabled.then(|| AgentSettings {
            host_name: std::env::var("FLUXGATE_AGENT_HOST")
                .unwrap_or_else(|_| pool.receive_host_name.clone()),
            binary: std::env::var("FLUXGATE_AGENT_BINARY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("serf")),
            role: std::env::var("FLUXGATE_AGENT_ROLE").unwrap_or_else(|_| "gateway".to_string()),
            peers: env_list("FLUXGATE_AGENT_PEERS", &[]),
        });

        let log_level = std::env::var("FLUXGATE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            pool,
            cache,
            agent,
            log_level,
        })
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(name)
        .ok()
        .map(|value| value.parse())
        .transpose()
        .with_context(|| format!("{name} could not be parsed"))
        .map(|value| value.unwrap_or(default))
}

/// Comma-separated list variable; a single value is a one-element list.
fn env_list(name: &str, default: &[&str]) -> Vec<String> {
    std::env::var(name)
        .map(|value| {
            value
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_else(|_| default.iter().map(|item| item.to_string()).collect())
}
