//! Round-robin pool of backend connections.
//!
//! One connection per distinct configured host; `get()` cycles through
//! them in insertion order. Round-robin (not health- or latency-aware) is
//! the deliberate choice here: unhealthy nodes are removed from
//! configuration externally, through cluster membership.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Connection, ConnectionConfig, DEFAULT_MESSAGE_TIMEOUT};
use crate::error::ProtocolError;

/// Configuration shared by every connection in a pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Tag identifying this gateway on the backend channel.
    pub tag: String,

    /// Dataset used when a call does not name one.
    pub default_dataset: String,

    /// Backend hosts; duplicates are dropped, first-seen order preserved.
    pub host_names: Vec<String>,

    /// Backend port, shared by all hosts.
    pub port: u16,

    /// Host peers use to route replies back to this node.
    pub receive_host_name: String,

    /// Port peers use to route replies back to this node.
    pub receive_port: u16,

    /// Reply timeout when neither options nor body carry one.
    pub default_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tag: "fluxgate".to_string(),
            default_dataset: "Default".to_string(),
            host_names: vec!["127.0.0.1".to_string()],
            port: 24224,
            receive_host_name: "127.0.0.1".to_string(),
            receive_port: 10030,
            default_timeout: DEFAULT_MESSAGE_TIMEOUT,
        }
    }
}

struct PoolEntry {
    host_name: String,
    connection: Arc<Connection>,
}

/// Owns one connection per distinct backend host.
pub struct ConnectionPool {
    entries: Vec<PoolEntry>,
    /// Round-robin cursor; monotonic, shared by all callers.
    cursor: AtomicUsize,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("hosts", &self.host_names().collect::<Vec<_>>())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl ConnectionPool {
    /// Builds the pool. Fails with a configuration error when no distinct
    /// host names remain after deduplication.
    pub fn new(config: PoolConfig) -> Result<Self, ProtocolError> {
        let mut host_names: Vec<String> = Vec::new();
        for host in &config.host_names {
            if !host_names.iter().any(|seen| seen == host) {
                host_names.push(host.clone());
            }
        }

        if host_names.is_empty() {
            return Err(ProtocolError::Configuration(
                "a connection pool needs one or more backend host names".to_string(),
            ));
        }

        let entries = host_names
            .into_iter()
            .map(|host_name| {
                let connection = Arc::new(Connection::new(ConnectionConfig {
                    tag: config.tag.clone(),
                    default_dataset: config.default_dataset.clone(),
                    host_name: host_name.clone(),
                    port: config.port,
                    receive_host_name: config.receive_host_name.clone(),
                    receive_port: config.receive_port,
                    default_timeout: config.default_timeout,
                }));
                PoolEntry {
                    host_name,
                    connection,
                }
            })
            .collect();

        Ok(Self {
            entries,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Next connection in strict round-robin order. Concurrent callers each
    /// advance the shared cursor exactly once.
    pub fn get(&self) -> Arc<Connection> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.entries.len();
        Arc::clone(&self.entries[index].connection)
    }

    /// Number of distinct backend hosts.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Deduplicated host names, in pool order.
    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.host_name.as_str())
    }

    /// Closes every owned connection; closing twice is a no-op.
    pub async fn close_all(&self) {
        for entry in &self.entries {
            entry.connection.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_hosts(hosts: &[&str]) -> Result<ConnectionPool, ProtocolError> {
        ConnectionPool::new(PoolConfig {
            host_names: hosts.iter().map(|host| host.to_string()).collect(),
            ..Default::default()
        })
    }

    #[test]
    fn duplicate_hosts_are_collapsed_and_rotation_cycles() {
        let pool = pool_with_hosts(&["node0", "node0", "node1"]).unwrap();
        assert_eq!(pool.count(), 2);

        let picks: Vec<String> = (0..4)
            .map(|_| pool.get().host_name().to_string())
            .collect();
        assert_eq!(picks, ["node0", "node1", "node0", "node1"]);
    }

    #[test]
    fn empty_host_list_is_a_configuration_error() {
        let err = pool_with_hosts(&[]).unwrap_err();
        assert!(matches!(err, ProtocolError::Configuration(_)));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let pool = pool_with_hosts(&["node2", "node0", "node2", "node1"]).unwrap();
        let hosts: Vec<&str> = pool.host_names().collect();
        assert_eq!(hosts, ["node2", "node0", "node1"]);
    }

    #[tokio::test]
    async fn close_all_twice_is_a_noop() {
        let pool = pool_with_hosts(&["node0", "node1"]).unwrap();
        pool.close_all().await;
        pool.close_all().await;
        assert!(pool.get().is_closed());
    }
}
