//! Wire types and generated gRPC code for the coordinator ↔ replica protocol.
//!
//! Every procedure has its own request type, including the argument-less
//! `GetMostRecentTimestamp`.

/// Replica service (`abd.kv.ReplicaService`) and its messages.
pub mod kv {
    /// A value tagged with the timestamp and writer that produced it.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct StampedValue {
        #[prost(bytes = "vec", tag = "1")]
        pub value: Vec<u8>,
        #[prost(uint64, tag = "2")]
        pub timestamp: u64,
        #[prost(string, tag = "3")]
        pub writer_id: String,
    }

    #[derive(Clone, Copy, PartialEq, prost::Message)]
    pub struct GetMostRecentTimestampRequest {}

    #[derive(Clone, Copy, PartialEq, prost::Message)]
    pub struct GetMostRecentTimestampResponse {
        #[prost(uint64, tag = "1")]
        pub timestamp: u64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct LocalWriteRequest {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
        #[prost(message, optional, tag = "2")]
        pub value: Option<StampedValue>,
    }

    /// Acknowledgement. `accepted` is false when the replica already held a
    /// value at least as new; the write still counts towards the quorum.
    #[derive(Clone, Copy, PartialEq, prost::Message)]
    pub struct LocalWriteResponse {
        #[prost(bool, tag = "1")]
        pub accepted: bool,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct LocalReadRequest {
        #[prost(bytes = "vec", tag = "1")]
        pub key: Vec<u8>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct LocalReadResponse {
        #[prost(message, optional, tag = "1")]
        pub value: Option<StampedValue>,
    }

    include!(concat!(env!("OUT_DIR"), "/abd.kv.ReplicaService.rs"));
}
