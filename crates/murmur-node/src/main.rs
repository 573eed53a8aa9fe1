//! # murmur-node
//!
//! A murmur peer as a long-running process:
//! - **Protocol engine** (murmur-core) with its relay, scan and download loops
//! - **HTTP ingress** (axum) that accepts sealed envelopes, serves the
//!   discovery profile and shared file content
//! - **Per-IP rate limiting** on envelope delivery

mod api;
mod config;
mod error;
mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use murmur_core::{HttpTransport, Node};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::NodeConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_core=debug,murmur_node=debug")),
        )
        .init();

    info!("Starting murmur node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");

    let transport = Arc::new(HttpTransport::new(&config.engine)?);
    let node = Arc::new(Node::open(config.engine.clone(), transport)?);
    info!(
        account = %node.account(),
        key_id = %node.key_id(),
        store = %node.store_dir().display(),
        "Node opened"
    );

    let workers = node.start();

    let rate_limiter = RateLimiter::new(config.ingress_rate, config.ingress_burst);
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = rl.purge_idle(Duration::from_secs(600)).await;
            if purged > 0 {
                tracing::debug!(purged, "Evicted idle rate limit buckets");
            }
        }
    });

    let state = AppState {
        node,
        rate_limiter,
    };

    let outcome = tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "HTTP ingress failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    for worker in workers {
        worker.abort();
    }

    outcome
}
