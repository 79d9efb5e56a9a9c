//! gRPC client implementing `ReplicaClient`.
//!
//! `GrpcReplicaClient` talks to `abd.kv.ReplicaService` over tonic and
//! translates between proto messages and `StampedValue` / `ReplicaError`.

use crate::convert;
use abd_common::{StampedValue, WriteTimestamp};
use abd_kv::replica_client::{ReplicaClient, ReplicaError};
use abd_proto::kv as pb;
use abd_proto::kv::replica_service_client::ReplicaServiceClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tonic::transport::Channel;

/// A gRPC replica transport.
///
/// Keeps one tonic channel per replica address. A channel is only cached
/// after its first successful connect, so an unreachable replica is retried
/// on the next call.
#[derive(Debug, Clone, Default)]
pub struct GrpcReplicaClient {
    channels: Arc<RwLock<HashMap<String, Channel>>>,
}

impl GrpcReplicaClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, target: &str) -> Result<ReplicaServiceClient<Channel>, ReplicaError> {
        {
            let cache = self.channels.read().await;
            if let Some(channel) = cache.get(target) {
                return Ok(ReplicaServiceClient::new(channel.clone()));
            }
        }

        let endpoint = format!("http://{}", target);
        let channel = Channel::from_shared(endpoint)
            .map_err(|e| ReplicaError::RpcFailed(format!("invalid endpoint: {}", e)))?
            .connect()
            .await
            .map_err(|e| ReplicaError::RpcFailed(format!("connect to {} failed: {}", target, e)))?;

        self.channels
            .write()
            .await
            .insert(target.to_string(), channel.clone());
        tracing::debug!("connected to replica {}", target);

        Ok(ReplicaServiceClient::new(channel))
    }
}

fn rpc_failed(rpc: &str, status: tonic::Status) -> ReplicaError {
    ReplicaError::RpcFailed(format!("{} RPC failed: {}", rpc, status))
}

#[async_trait::async_trait]
impl ReplicaClient for GrpcReplicaClient {
    async fn get_most_recent_timestamp(
        &self,
        target: &str,
    ) -> Result<WriteTimestamp, ReplicaError> {
        let resp = self
            .client(target)
            .await?
            .get_most_recent_timestamp(pb::GetMostRecentTimestampRequest {})
            .await
            .map_err(|e| rpc_failed("get_most_recent_timestamp", e))?;
        Ok(resp.into_inner().timestamp)
    }

    async fn local_write(
        &self,
        target: &str,
        key: &[u8],
        value: &StampedValue,
    ) -> Result<(), ReplicaError> {
        let resp = self
            .client(target)
            .await?
            .local_write(pb::LocalWriteRequest {
                key: key.to_vec(),
                value: Some(convert::stamped_value_to_proto(value)),
            })
            .await
            .map_err(|e| rpc_failed("local_write", e))?;

        if !resp.into_inner().accepted {
            tracing::debug!("replica {} already held a newer value", target);
        }
        Ok(())
    }

    async fn local_read(&self, target: &str, key: &[u8]) -> Result<StampedValue, ReplicaError> {
        let resp = self
            .client(target)
            .await?
            .local_read(pb::LocalReadRequest { key: key.to_vec() })
            .await
            .map_err(|e| rpc_failed("local_read", e))?;

        Ok(resp
            .into_inner()
            .value
            .map(convert::stamped_value_from_proto)
            .unwrap_or_else(StampedValue::empty))
    }
}
