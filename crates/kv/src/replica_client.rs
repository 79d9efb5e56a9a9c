//! Abstraction over coordinator-to-replica RPCs.
//!
//! The gRPC implementation lives in `abd-net::replica_client`.
//! [`InProcessReplicaClient`] dispatches straight to [`Replica`] instances
//! in the same process and backs the tests.

use crate::replica::Replica;
use abd_common::{StampedValue, WriteTimestamp};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplicaError {
    #[error("RPC failed: {0}")]
    RpcFailed(String),
    #[error("timeout")]
    Timeout,
}

/// Transport for the three replica procedures.
///
/// `target` is the replica's address exactly as configured on the
/// coordinator.
#[async_trait::async_trait]
pub trait ReplicaClient: Send + Sync + 'static {
    /// Greatest timestamp the replica has ever accepted, for any key.
    async fn get_most_recent_timestamp(
        &self,
        target: &str,
    ) -> Result<WriteTimestamp, ReplicaError>;

    /// Offer a stamped value. `Ok` means acknowledged, whether or not the
    /// replica kept it.
    async fn local_write(
        &self,
        target: &str,
        key: &[u8],
        value: &StampedValue,
    ) -> Result<(), ReplicaError>;

    /// The replica's current value, or the empty sentinel.
    async fn local_read(&self, target: &str, key: &[u8]) -> Result<StampedValue, ReplicaError>;
}

/// In-process transport: addresses map to [`Replica`] handles in a shared
/// registry. An address with no registered replica behaves like an
/// unreachable node.
#[derive(Debug, Clone, Default)]
pub struct InProcessReplicaClient {
    registry: Arc<RwLock<HashMap<String, Arc<Replica>>>>,
}

impl InProcessReplicaClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, addr: impl Into<String>, replica: Arc<Replica>) {
        self.registry.write().await.insert(addr.into(), replica);
    }

    /// Drop a replica from the registry; later calls to it fail.
    pub async fn unregister(&self, addr: &str) -> Option<Arc<Replica>> {
        self.registry.write().await.remove(addr)
    }

    async fn lookup(&self, target: &str) -> Result<Arc<Replica>, ReplicaError> {
        self.registry
            .read()
            .await
            .get(target)
            .cloned()
            .ok_or_else(|| ReplicaError::RpcFailed(format!("no replica at {}", target)))
    }
}

#[async_trait::async_trait]
impl ReplicaClient for InProcessReplicaClient {
    async fn get_most_recent_timestamp(
        &self,
        target: &str,
    ) -> Result<WriteTimestamp, ReplicaError> {
        Ok(self.lookup(target).await?.most_recent_timestamp().await)
    }

    async fn local_write(
        &self,
        target: &str,
        key: &[u8],
        value: &StampedValue,
    ) -> Result<(), ReplicaError> {
        self.lookup(target)
            .await?
            .local_write(key, value)
            .await
            .map(|_accepted| ())
            .map_err(|e| ReplicaError::RpcFailed(format!("storage: {}", e)))
    }

    async fn local_read(&self, target: &str, key: &[u8]) -> Result<StampedValue, ReplicaError> {
        Ok(self.lookup(target).await?.local_read(key).await)
    }
}
