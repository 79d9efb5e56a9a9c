//! gRPC replica service.
//!
//! Bridges the tonic-generated `ReplicaService` trait to a [`Replica`].

use crate::convert;
use abd_kv::replica::Replica;
use abd_proto::kv as pb;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ReplicaServiceImpl {
    pub replica: Arc<Replica>,
}

impl ReplicaServiceImpl {
    pub fn new(replica: Arc<Replica>) -> Self {
        Self { replica }
    }
}

fn count_inbound(rpc_type: &str) {
    let m = abd_metrics::metrics();
    m.rpcs_received.inc();
    m.rpcs_received_by_type.with_label_values(&[rpc_type]).inc();
}

#[tonic::async_trait]
impl pb::replica_service_server::ReplicaService for ReplicaServiceImpl {
    async fn get_most_recent_timestamp(
        &self,
        _request: tonic::Request<pb::GetMostRecentTimestampRequest>,
    ) -> Result<tonic::Response<pb::GetMostRecentTimestampResponse>, tonic::Status> {
        count_inbound("get_most_recent_timestamp");
        let _timer = abd_metrics::start_rpc_timer("get_most_recent_timestamp", "inbound");

        let timestamp = self.replica.most_recent_timestamp().await;
        Ok(tonic::Response::new(pb::GetMostRecentTimestampResponse {
            timestamp,
        }))
    }

    async fn local_write(
        &self,
        request: tonic::Request<pb::LocalWriteRequest>,
    ) -> Result<tonic::Response<pb::LocalWriteResponse>, tonic::Status> {
        count_inbound("local_write");
        let _timer = abd_metrics::start_rpc_timer("local_write", "inbound");
        let req = request.into_inner();

        let value = req
            .value
            .map(convert::stamped_value_from_proto)
            .ok_or_else(|| tonic::Status::invalid_argument("missing value"))?;
        if value.writer_id.is_empty() {
            return Err(tonic::Status::invalid_argument("missing writer_id"));
        }

        let accepted = self
            .replica
            .local_write(&req.key, &value)
            .await
            .map_err(|e| tonic::Status::internal(format!("storage error: {}", e)))?;

        Ok(tonic::Response::new(pb::LocalWriteResponse { accepted }))
    }

    async fn local_read(
        &self,
        request: tonic::Request<pb::LocalReadRequest>,
    ) -> Result<tonic::Response<pb::LocalReadResponse>, tonic::Status> {
        count_inbound("local_read");
        let _timer = abd_metrics::start_rpc_timer("local_read", "inbound");
        let req = request.into_inner();

        let value = self.replica.local_read(&req.key).await;
        Ok(tonic::Response::new(pb::LocalReadResponse {
            value: Some(convert::stamped_value_to_proto(&value)),
        }))
    }
}
