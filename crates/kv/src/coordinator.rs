//! Register coordinator: turns client SET/GET into quorum rounds.
//!
//! A SET runs two rounds:
//! 1. Election: ask every replica for its most recent timestamp, wait for a
//!    majority, pick `max + 1`.
//! 2. Propagation: send the stamped value to every replica, wait for a
//!    majority of acks.
//!
//! A GET runs one: read from every replica, wait for a majority, return the
//! greatest reply under the `(timestamp, writer_id)` order.
//!
//! Every RPC is bounded by `rpc_timeout` and every round by
//! `quorum_timeout`. Calls still in flight when a round finishes are
//! cancelled.

use crate::quorum::{await_quorum, QuorumError};
use crate::replica_client::{ReplicaClient, ReplicaError};
use abd_common::{majority, writer_id, DisplayKey, StampedValue, WriteTimestamp};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Per-RPC and per-round deadlines.
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    pub rpc_timeout: Duration,
    pub quorum_timeout: Duration,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(2),
            quorum_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    #[error("{phase}: quorum not reached: need {needed}, got {got}")]
    QuorumNotReached {
        phase: &'static str,
        needed: usize,
        got: usize,
    },
    #[error("{phase}: timed out waiting for quorum: need {needed}, got {got}")]
    Timeout {
        phase: &'static str,
        needed: usize,
        got: usize,
    },
    #[error("election: a replica reports timestamp {0}, no larger one exists")]
    TimestampExhausted(WriteTimestamp),
}

impl KvError {
    fn from_quorum(phase: &'static str, err: QuorumError) -> Self {
        let kind = match err {
            QuorumError::NotReached { .. } => "not_reached",
            QuorumError::Timeout { .. } => "timeout",
        };
        abd_metrics::metrics()
            .quorum_failures
            .with_label_values(&[phase, kind])
            .inc();

        match err {
            QuorumError::NotReached { needed, got } => KvError::QuorumNotReached {
                phase,
                needed,
                got,
            },
            QuorumError::Timeout { needed, got } => KvError::Timeout { phase, needed, got },
        }
    }
}

/// Coordinator over a fixed replica set.
///
/// Generic over `R: ReplicaClient`: deployments use the gRPC client, tests
/// use the in-process one.
pub struct Coordinator<R: ReplicaClient> {
    identity: String,
    replicas: Vec<String>,
    replica_client: Arc<R>,
    config: QuorumConfig,
    write_counter: AtomicU64,
}

impl<R: ReplicaClient> std::fmt::Debug for Coordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("identity", &self.identity)
            .field("replicas", &self.replicas)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R: ReplicaClient> Coordinator<R> {
    /// `identity` must be unique among coordinators sharing these replicas.
    ///
    /// Repeated addresses are dropped: each replica counts once towards a
    /// majority.
    pub fn new(
        identity: impl Into<String>,
        mut replicas: Vec<String>,
        replica_client: Arc<R>,
        config: QuorumConfig,
    ) -> Self {
        let listed = replicas.len();
        let mut seen = HashSet::new();
        replicas.retain(|addr| seen.insert(addr.clone()));
        if replicas.len() != listed {
            tracing::warn!(
                "ignoring {} duplicate replica address(es)",
                listed - replicas.len()
            );
        }

        Self {
            identity: identity.into(),
            replicas,
            replica_client,
            config,
            write_counter: AtomicU64::new(0),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn replicas(&self) -> &[String] {
        &self.replicas
    }

    /// Majority of the configured replica set.
    pub fn majority(&self) -> usize {
        majority(self.replicas.len())
    }

    // -----------------------------------------------------------------------
    // SET
    // -----------------------------------------------------------------------

    /// Write `value` under `key`. Returns the stamped value that was
    /// propagated to a majority.
    pub async fn set(&self, key: &[u8], value: Vec<u8>) -> Result<StampedValue, KvError> {
        let _timer = abd_metrics::start_kv_timer("set");
        abd_metrics::metrics().kv_sets.inc();

        let timestamp = self.choose_write_timestamp().await?;
        let stamped = StampedValue::new(value, timestamp, self.next_writer_id());
        self.set_with_timestamp(key, &stamped).await?;

        tracing::info!("set {} = {}", DisplayKey(key), stamped);
        Ok(stamped)
    }

    /// Election round: `1 + max` of the timestamps a majority reports.
    pub async fn choose_write_timestamp(&self) -> Result<WriteTimestamp, KvError> {
        let calls = self.fan_out("get_most_recent_timestamp", |client, target| async move {
            client.get_most_recent_timestamp(&target).await
        });

        let timestamps = await_quorum(calls, self.majority(), self.deadline())
            .await
            .map_err(|e| KvError::from_quorum("election", e))?;

        let highest = timestamps.into_iter().max().unwrap_or(0);
        let elected = highest
            .checked_add(1)
            .ok_or(KvError::TimestampExhausted(highest))?;
        abd_metrics::metrics()
            .last_elected_timestamp
            .set(i64::try_from(elected).unwrap_or(i64::MAX));
        tracing::debug!("elected write timestamp {}", elected);
        Ok(elected)
    }

    /// Propagation round: send `stamped` to every replica and wait for a
    /// majority of acks.
    pub async fn set_with_timestamp(
        &self,
        key: &[u8],
        stamped: &StampedValue,
    ) -> Result<(), KvError> {
        let key = Arc::<[u8]>::from(key);
        let stamped = Arc::new(stamped.clone());
        let calls = self.fan_out("local_write", |client, target| {
            let key = key.clone();
            let stamped = stamped.clone();
            async move { client.local_write(&target, &key, &stamped).await }
        });

        await_quorum(calls, self.majority(), self.deadline())
            .await
            .map_err(|e| KvError::from_quorum("propagation", e))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // GET
    // -----------------------------------------------------------------------

    /// Greatest stamped value a majority holds for `key` (the sentinel if
    /// none of them has it).
    pub async fn read(&self, key: &[u8]) -> Result<StampedValue, KvError> {
        let key = Arc::<[u8]>::from(key);
        let calls = self.fan_out("local_read", |client, target| {
            let key = key.clone();
            async move { client.local_read(&target, &key).await }
        });

        let replies = await_quorum(calls, self.majority(), self.deadline())
            .await
            .map_err(|e| KvError::from_quorum("read", e))?;
        Ok(StampedValue::latest(replies))
    }

    /// Read `key`. `None` means no replica in the answering majority has
    /// ever stored it.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let _timer = abd_metrics::start_kv_timer("get");
        abd_metrics::metrics().kv_gets.inc();

        let latest = self.read(key).await?;
        if latest.is_empty() {
            tracing::debug!("get {}: not found", DisplayKey(key));
            return Ok(None);
        }
        tracing::debug!("get {} = {}", DisplayKey(key), latest);
        Ok(Some(latest.value))
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn next_writer_id(&self) -> String {
        let counter = self.write_counter.fetch_add(1, Ordering::Relaxed);
        writer_id(&self.identity, counter)
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.quorum_timeout
    }

    /// One call per replica, each bounded by the RPC timeout and counted in
    /// the RPC metrics. Failures are logged here; the quorum only sees
    /// whether the call succeeded.
    fn fan_out<T, F, Fut>(
        &self,
        rpc_type: &'static str,
        make_call: F,
    ) -> Vec<impl Future<Output = Result<T, ReplicaError>> + Send + 'static>
    where
        F: Fn(Arc<R>, String) -> Fut,
        Fut: Future<Output = Result<T, ReplicaError>> + Send + 'static,
        T: Send + 'static,
    {
        let rpc_timeout = self.config.rpc_timeout;
        self.replicas
            .iter()
            .map(|target| {
                let call = make_call(self.replica_client.clone(), target.clone());
                let target = target.clone();
                async move {
                    let m = abd_metrics::metrics();
                    m.rpcs_sent.inc();
                    m.rpcs_sent_by_type.with_label_values(&[rpc_type]).inc();
                    let _timer = abd_metrics::start_rpc_timer(rpc_type, "outbound");

                    let result = match tokio::time::timeout(rpc_timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(ReplicaError::Timeout),
                    };
                    if let Err(e) = &result {
                        m.rpc_failures_by_type.with_label_values(&[rpc_type]).inc();
                        tracing::warn!("{} to replica {} failed: {}", rpc_type, target, e);
                    }
                    result
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::{ChaosReplicaClient, ChaosReplicaConfig};
    use crate::replica::Replica;
    use crate::replica_client::InProcessReplicaClient;
    use abd_storage::FsyncPolicy;
    use tempfile::TempDir;

    struct Cluster {
        client: Arc<InProcessReplicaClient>,
        replicas: Vec<Arc<Replica>>,
        addrs: Vec<String>,
        _dirs: Vec<TempDir>,
    }

    impl Cluster {
        async fn new(n: usize) -> Self {
            let client = Arc::new(InProcessReplicaClient::new());
            let mut replicas = Vec::new();
            let mut addrs = Vec::new();
            let mut dirs = Vec::new();
            for i in 0..n {
                let dir = TempDir::new().unwrap();
                let replica = Arc::new(Replica::open(dir.path(), FsyncPolicy::None).unwrap());
                let addr = format!("replica-{}", i);
                client.register(addr.clone(), replica.clone()).await;
                replicas.push(replica);
                addrs.push(addr);
                dirs.push(dir);
            }
            Self {
                client,
                replicas,
                addrs,
                _dirs: dirs,
            }
        }

        fn coordinator(&self, identity: &str) -> Coordinator<InProcessReplicaClient> {
            Coordinator::new(
                identity,
                self.addrs.clone(),
                self.client.clone(),
                QuorumConfig::default(),
            )
        }
    }

    fn sv(value: &str, ts: u64, writer: &str) -> StampedValue {
        StampedValue::new(value.as_bytes().to_vec(), ts, writer)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cluster = Cluster::new(3).await;
        let coord = cluster.coordinator("c");

        assert_eq!(coord.get(b"a").await.unwrap(), None);

        let first = coord.set(b"a", b"1".to_vec()).await.unwrap();
        assert_eq!(first.timestamp, 1);
        let second = coord.set(b"a", b"2".to_vec()).await.unwrap();
        assert_eq!(second.timestamp, 2);

        assert_eq!(coord.get(b"a").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_written_value_lands_on_a_majority() {
        let cluster = Cluster::new(3).await;
        let coord = cluster.coordinator("c");
        let written = coord.set(b"k", b"v".to_vec()).await.unwrap();

        let mut holders = 0;
        for replica in &cluster.replicas {
            if replica.local_read(b"k").await == written {
                holders += 1;
            }
        }
        assert!(holders >= 2, "only {} replicas hold the write", holders);
    }

    #[tokio::test]
    async fn test_election_exceeds_every_replica() {
        let cluster = Cluster::new(3).await;
        cluster.replicas[0]
            .local_write(b"x", &sv("a", 41, "other"))
            .await
            .unwrap();
        cluster.replicas[1]
            .local_write(b"y", &sv("b", 40, "other"))
            .await
            .unwrap();
        cluster.replicas[2]
            .local_write(b"z", &sv("c", 40, "other"))
            .await
            .unwrap();

        let coord = cluster.coordinator("c");
        let ts = coord.choose_write_timestamp().await.unwrap();
        // Any majority includes a replica at 40 or 41.
        assert!(ts == 41 || ts == 42, "elected {}", ts);
    }

    #[tokio::test]
    async fn test_read_picks_greatest_stamp_not_greatest_value() {
        let cluster = Cluster::new(3).await;
        cluster.replicas[0]
            .local_write(b"k", &sv("zzz", 1, "w"))
            .await
            .unwrap();
        for r in &cluster.replicas[1..] {
            r.local_write(b"k", &sv("aaa", 2, "w")).await.unwrap();
        }

        let coord = cluster.coordinator("c");
        for _ in 0..10 {
            assert_eq!(coord.get(b"k").await.unwrap(), Some(b"aaa".to_vec()));
        }
    }

    #[tokio::test]
    async fn test_writer_ids_are_unique_and_ordered() {
        let cluster = Cluster::new(3).await;
        let coord = cluster.coordinator("coord-a");

        let a = coord.set(b"k", b"1".to_vec()).await.unwrap();
        let b = coord.set(b"other", b"2".to_vec()).await.unwrap();

        assert_ne!(a.writer_id, b.writer_id);
        assert!(a.writer_id.starts_with("coord-a:"));
        assert!(a.writer_id < b.writer_id);
        assert!(b.is_newer_than(&a));
    }

    #[tokio::test]
    async fn test_survives_one_unreachable_replica() {
        let cluster = Cluster::new(3).await;
        cluster.client.unregister("replica-2").await;
        let coord = cluster.coordinator("c");

        coord.set(b"a", b"1".to_vec()).await.unwrap();
        coord.set(b"a", b"2".to_vec()).await.unwrap();
        assert_eq!(coord.get(b"a").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_fails_without_majority() {
        let cluster = Cluster::new(3).await;
        cluster.client.unregister("replica-1").await;
        cluster.client.unregister("replica-2").await;
        let coord = cluster.coordinator("c");

        let err = coord.set(b"a", b"1".to_vec()).await.unwrap_err();
        assert!(
            matches!(
                err,
                KvError::QuorumNotReached {
                    phase: "election",
                    needed: 2,
                    ..
                }
            ),
            "got {:?}",
            err
        );
        assert!(matches!(
            coord.get(b"a").await,
            Err(KvError::QuorumNotReached { phase: "read", .. })
        ));
    }

    #[tokio::test]
    async fn test_hung_replicas_time_out() {
        let cluster = Cluster::new(3).await;
        let chaos = Arc::new(ChaosReplicaClient::new(
            InProcessReplicaClient::clone(&cluster.client),
            ChaosReplicaConfig::default(),
        ));
        chaos.hang_node("replica-0").await;
        chaos.hang_node("replica-1").await;

        let coord = Coordinator::new(
            "c",
            cluster.addrs.clone(),
            chaos,
            QuorumConfig {
                rpc_timeout: Duration::from_secs(10),
                quorum_timeout: Duration::from_millis(100),
            },
        );

        let err = coord.set(b"a", b"1".to_vec()).await.unwrap_err();
        assert!(
            matches!(err, KvError::Timeout { phase: "election", .. }),
            "got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_rpc_timeout_counts_as_failure() {
        let cluster = Cluster::new(3).await;
        let chaos = Arc::new(ChaosReplicaClient::new(
            InProcessReplicaClient::clone(&cluster.client),
            ChaosReplicaConfig::default(),
        ));
        chaos.hang_node("replica-0").await;
        chaos.hang_node("replica-1").await;

        let coord = Coordinator::new(
            "c",
            cluster.addrs.clone(),
            chaos,
            QuorumConfig {
                rpc_timeout: Duration::from_millis(50),
                quorum_timeout: Duration::from_secs(10),
            },
        );

        let start = std::time::Instant::now();
        let err = coord.get(b"a").await.unwrap_err();
        assert!(matches!(err, KvError::QuorumNotReached { phase: "read", .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_election_refuses_to_wrap() {
        let cluster = Cluster::new(3).await;
        for r in &cluster.replicas {
            r.local_write(b"k", &sv("max", u64::MAX, "w")).await.unwrap();
        }

        let coord = cluster.coordinator("c");
        let err = coord.set(b"k", b"v".to_vec()).await.unwrap_err();
        assert_eq!(err, KvError::TimestampExhausted(u64::MAX));
        assert_eq!(coord.get(b"k").await.unwrap(), Some(b"max".to_vec()));
    }

    #[tokio::test]
    async fn test_duplicate_addresses_count_once() {
        let cluster = Cluster::new(1).await;
        let coord = Coordinator::new(
            "c",
            vec![
                "replica-0".to_string(),
                "replica-0".to_string(),
                "replica-missing".to_string(),
            ],
            cluster.client.clone(),
            QuorumConfig::default(),
        );

        assert_eq!(coord.replicas(), ["replica-0", "replica-missing"]);
        assert_eq!(coord.majority(), 2);
        let err = coord.set(b"a", b"1".to_vec()).await.unwrap_err();
        assert!(
            matches!(err, KvError::QuorumNotReached { needed: 2, .. }),
            "got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_concurrent_sets_converge() {
        let cluster = Cluster::new(3).await;
        let coord = Arc::new(cluster.coordinator("c"));

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let coord = coord.clone();
            handles.push(tokio::spawn(
                async move { coord.set(b"k", vec![i]).await.unwrap() },
            ));
        }
        let mut written = Vec::new();
        for h in handles {
            written.push(h.await.unwrap());
        }

        let winner = StampedValue::latest(written);
        assert_eq!(coord.get(b"k").await.unwrap(), Some(winner.value));
    }

    #[tokio::test]
    async fn test_single_replica() {
        let cluster = Cluster::new(1).await;
        let coord = cluster.coordinator("c");
        assert_eq!(coord.majority(), 1);

        coord.set(b"solo", b"v".to_vec()).await.unwrap();
        assert_eq!(coord.get(b"solo").await.unwrap(), Some(b"v".to_vec()));
    }
}
