//! fluxgate gateway
//!
//! Protocol gateway in front of a distributed search-engine backend.
//!
//! This service:
//! - Accepts client requests over HTTP
//! - Forwards them as correlated envelopes to a round-robin backend pool
//! - Serves recent results from a rule-driven response cache
//! - Supervises the external gossip agent that makes the node discoverable

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fluxgate_cluster::{AgentConfig, ClusterAgent};
use fluxgate_gateway::{api, Config};
use fluxgate_protocol::{ConnectionPool, EmitOptions};
use fluxgate_response_cache::ResponseCache;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to FLUXGATE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting fluxgate gateway");
    info!(
        listen_addr = %config.listen_addr,
        backend_count = config.pool.host_names.len(),
        cache_rules = config.cache.rules.len(),
        agent_enabled = config.agent.is_some(),
        "Configuration loaded"
    );

    let pool = Arc::new(ConnectionPool::new(config.pool.clone())?);
    let cache = Arc::new(ResponseCache::new(config.cache.clone())?);

    let agent = config.agent.as_ref().map(|settings| {
        ClusterAgent::new(AgentConfig {
            host_name: settings.host_name.clone(),
            binary: settings.binary.clone(),
            role: settings.role.clone(),
            peers: settings.peers.clone(),
            ..Default::default()
        })
    });

    if let Some(agent) = &agent {
        // Membership is best-effort at boot: the gateway still serves its
        // configured backends when the agent cannot start.
        match agent.start().await {
            Ok(()) => info!(rpc_address = %agent.rpc_address(), "cluster agent running"),
            Err(err) => error!(error = %err, "cluster agent failed to start"),
        }
    }

    let defaults = EmitOptions::new()
        .with_dataset(config.pool.default_dataset.clone())
        .with_timeout(config.pool.default_timeout);
    let app = api::router(api::AppState {
        pool: Arc::clone(&pool),
        cache,
        defaults,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(listen_addr = %config.listen_addr, "HTTP surface bound");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    if let Some(agent) = &agent {
        agent.shutdown();
    }
    pool.close_all().await;

    Ok(())
}
