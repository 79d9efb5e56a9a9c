//! ABD-style atomic register on top of a set of replicas.
//!
//! Provides: per-replica last-writer-wins state, a "first K of M" quorum
//! primitive, and a coordinator that runs timestamp election, value
//! propagation and majority reads against every replica.

pub mod chaos;
pub mod coordinator;
pub mod quorum;
pub mod replica;
pub mod replica_client;
