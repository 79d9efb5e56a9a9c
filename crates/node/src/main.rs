//! abd-node: entry point for a replica or a coordinator.
//!
//! Loads the YAML config named by the first CLI argument, then either
//! serves the replica gRPC service over a local storage engine or serves
//! the client HTTP surface backed by a quorum coordinator.

use abd_config::{CoordinatorConfig, NodeConfig, ReplicaConfig, Role};
use abd_kv::coordinator::{Coordinator, QuorumConfig};
use abd_kv::replica::Replica;
use abd_net::GrpcReplicaClient;
use abd_storage::FsyncPolicy;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // First CLI arg is the YAML config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = abd_config::load_from_file(std::path::Path::new(&config_path))
        .map_err(|e| format!("failed to load config from {}: {}", config_path, e))?;

    abd_metrics::init_tracing(config.verbose);

    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
        tokio::spawn(async move {
            if let Err(e) = abd_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    match config.role {
        Role::Replica => run_replica(&config, &config.replica).await,
        Role::Coordinator => run_coordinator(&config, &config.coordinator).await,
    }
}

async fn run_replica(
    config: &NodeConfig,
    replica_config: &ReplicaConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let fsync = FsyncPolicy::from_str_config(&replica_config.fsync);
    let replica = Arc::new(Replica::open(&replica_config.data_dir, fsync)?);
    tracing::info!(
        "replica opened {:?} (fsync {:?}), {} keys",
        replica_config.data_dir,
        fsync,
        replica.key_count().await
    );

    if fsync == FsyncPolicy::Batch {
        let replica = replica.clone();
        let interval = Duration::from_millis(replica_config.fsync_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = replica.sync().await {
                    tracing::warn!("WAL sync failed: {}", e);
                }
            }
        });
    }

    let router = abd_net::build_replica_server(replica.clone());

    // Serve with graceful shutdown on Ctrl+C
    tracing::info!("serving replica gRPC on {}", config.listen);
    tokio::select! {
        result = router.serve(config.listen) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }

    replica.sync().await?;
    Ok(())
}

async fn run_coordinator(
    config: &NodeConfig,
    coordinator_config: &CoordinatorConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let identity = coordinator_config
        .identity
        .clone()
        .unwrap_or_else(|| format!("coord-{:016x}", rand::random::<u64>()));

    let quorum_config = QuorumConfig {
        rpc_timeout: Duration::from_millis(coordinator_config.rpc_timeout_ms),
        quorum_timeout: Duration::from_millis(coordinator_config.quorum_timeout_ms),
    };

    let coordinator = Arc::new(Coordinator::new(
        identity,
        coordinator_config.replicas.clone(),
        Arc::new(GrpcReplicaClient::new()),
        quorum_config,
    ));
    tracing::info!(
        "coordinator {} over {} replicas (majority {})",
        coordinator.identity(),
        coordinator.replicas().len(),
        coordinator.majority()
    );

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tokio::select! {
        result = abd_net::serve_http(listener, coordinator) => {
            result.map_err(|e| e.to_string())?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
