//! Networking for abd nodes.
//!
//! Provides:
//! - `ReplicaServiceImpl`: serves the replica procedures over gRPC
//! - `GrpcReplicaClient`: implements `ReplicaClient` over tonic
//! - `http`: the coordinator's client-facing HTTP/1.1 surface
//! - `build_replica_server`: wraps a replica in a tonic `Router`

#![allow(clippy::result_large_err)]

pub mod convert;
pub mod http;
pub mod replica_client;
pub mod server;

pub use http::serve_http;
pub use replica_client::GrpcReplicaClient;
pub use server::ReplicaServiceImpl;

use abd_kv::replica::Replica;
use std::sync::Arc;

/// Build a tonic `Router` serving `abd.kv.ReplicaService` for `replica`.
pub fn build_replica_server(replica: Arc<Replica>) -> tonic::transport::server::Router {
    tonic::transport::Server::builder().add_service(
        abd_proto::kv::replica_service_server::ReplicaServiceServer::new(ReplicaServiceImpl::new(
            replica,
        )),
    )
}
