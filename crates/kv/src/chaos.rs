//! Fault injection around a [`ReplicaClient`].
//!
//! [`ChaosReplicaClient`] forwards to an inner client but can make chosen
//! replicas fail fast, hang forever, or answer late, and can fail any call
//! at random. Used to exercise quorum behaviour without a real network.

use crate::replica_client::{ReplicaClient, ReplicaError};
use abd_common::{StampedValue, WriteTimestamp};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

#[derive(Debug, Clone)]
pub struct ChaosReplicaConfig {
    /// Probability of returning an error \[0.0, 1.0\].
    pub failure_rate: f64,
    /// Fixed latency added to every call.
    pub latency: Duration,
    /// Random extra latency in \[0, jitter\].
    pub jitter: Duration,
}

impl Default for ChaosReplicaConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    failed: HashSet<String>,
    hung: HashSet<String>,
    slow: HashMap<String, Duration>,
}

pub struct ChaosReplicaClient<R: ReplicaClient> {
    inner: Arc<R>,
    config: Arc<RwLock<ChaosReplicaConfig>>,
    faults: Arc<RwLock<Faults>>,
}

impl<R: ReplicaClient> std::fmt::Debug for ChaosReplicaClient<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosReplicaClient").finish_non_exhaustive()
    }
}

impl<R: ReplicaClient> ChaosReplicaClient<R> {
    pub fn new(inner: R, config: ChaosReplicaConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            config: Arc::new(RwLock::new(config)),
            faults: Arc::new(RwLock::new(Faults::default())),
        }
    }

    /// Calls to `addr` fail immediately until [`Self::recover_node`].
    pub async fn fail_node(&self, addr: &str) {
        self.faults.write().await.failed.insert(addr.to_string());
    }

    /// Calls to `addr` never complete until [`Self::recover_node`].
    pub async fn hang_node(&self, addr: &str) {
        self.faults.write().await.hung.insert(addr.to_string());
    }

    /// Calls to `addr` take at least `delay` longer.
    pub async fn slow_node(&self, addr: &str, delay: Duration) {
        self.faults.write().await.slow.insert(addr.to_string(), delay);
    }

    /// Clear every fault set on `addr`.
    pub async fn recover_node(&self, addr: &str) {
        let mut faults = self.faults.write().await;
        faults.failed.remove(addr);
        faults.hung.remove(addr);
        faults.slow.remove(addr);
    }

    pub async fn set_failure_rate(&self, rate: f64) {
        self.config.write().await.failure_rate = rate;
    }

    /// Apply the configured faults for one call to `target`.
    async fn disturb(&self, target: &str) -> Result<(), ReplicaError> {
        let (hung, node_delay) = {
            let faults = self.faults.read().await;
            if faults.failed.contains(target) {
                return Err(ReplicaError::RpcFailed(format!(
                    "chaos: {} marked as failed",
                    target
                )));
            }
            (
                faults.hung.contains(target),
                faults.slow.get(target).copied().unwrap_or(Duration::ZERO),
            )
        };
        if hung {
            std::future::pending::<()>().await;
        }

        let (delay, failure_rate) = {
            let config = self.config.read().await;
            let jitter_ms = if config.jitter.is_zero() {
                0
            } else {
                rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
            };
            (
                config.latency + node_delay + Duration::from_millis(jitter_ms),
                config.failure_rate,
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate.min(1.0)) {
            return Err(ReplicaError::RpcFailed("chaos: random failure".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<R: ReplicaClient> ReplicaClient for ChaosReplicaClient<R> {
    async fn get_most_recent_timestamp(
        &self,
        target: &str,
    ) -> Result<WriteTimestamp, ReplicaError> {
        self.disturb(target).await?;
        self.inner.get_most_recent_timestamp(target).await
    }

    async fn local_write(
        &self,
        target: &str,
        key: &[u8],
        value: &StampedValue,
    ) -> Result<(), ReplicaError> {
        self.disturb(target).await?;
        self.inner.local_write(target, key, value).await
    }

    async fn local_read(&self, target: &str, key: &[u8]) -> Result<StampedValue, ReplicaError> {
        self.disturb(target).await?;
        self.inner.local_read(target, key).await
    }
}
