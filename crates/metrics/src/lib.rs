//! Metrics and tracing setup for abd nodes.
//!
//! Provides a global [`NodeMetrics`] singleton backed by the `prometheus`
//! crate, plus an optional lightweight HTTP server for Prometheus scraping.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence. Without it the node logs at `info` when
/// `verbose` is set and only warnings otherwise.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

static METRICS: OnceLock<NodeMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static NodeMetrics {
    METRICS.get_or_init(NodeMetrics::new)
}

/// All Prometheus metrics for an abd node (replica or coordinator).
pub struct NodeMetrics {
    pub registry: Registry,

    // ── RPC counters ──
    pub rpcs_sent: IntCounter,
    pub rpcs_received: IntCounter,
    pub rpcs_sent_by_type: IntCounterVec,
    pub rpcs_received_by_type: IntCounterVec,
    pub rpc_failures_by_type: IntCounterVec,

    // ── RPC latency ──
    pub rpc_latency_secs: HistogramVec,

    // ── Coordinator operations ──
    pub kv_sets: IntCounter,
    pub kv_gets: IntCounter,
    pub kv_latency_secs: HistogramVec,
    pub quorum_failures: IntCounterVec,
    pub last_elected_timestamp: IntGauge,

    // ── Replica state ──
    pub replica_writes_accepted: IntCounter,
    pub replica_writes_rejected: IntCounter,
    pub corrupt_records: IntCounter,
}

impl std::fmt::Debug for NodeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for RPC/KV latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts")
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).expect("valid counter vec opts")
}

fn latency_histogram(name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    HistogramVec::new(
        HistogramOpts::new(name, help).buckets(LATENCY_BUCKETS.to_vec()),
        labels,
    )
    .expect("valid histogram opts")
}

impl NodeMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let m = Self {
            rpcs_sent: counter("abd_rpcs_sent_total", "Total outbound replica RPCs sent"),
            rpcs_received: counter(
                "abd_rpcs_received_total",
                "Total inbound replica RPCs received",
            ),
            rpcs_sent_by_type: counter_vec(
                "abd_rpcs_sent_by_type_total",
                "Outbound replica RPCs sent, by type",
                &["rpc_type"],
            ),
            rpcs_received_by_type: counter_vec(
                "abd_rpcs_received_by_type_total",
                "Inbound replica RPCs received, by type",
                &["rpc_type"],
            ),
            rpc_failures_by_type: counter_vec(
                "abd_rpc_failures_by_type_total",
                "Outbound replica RPCs that failed or timed out, by type",
                &["rpc_type"],
            ),
            rpc_latency_secs: latency_histogram(
                "abd_rpc_latency_seconds",
                "Replica RPC latency in seconds",
                &["rpc_type", "direction"],
            ),
            kv_sets: counter("abd_kv_sets_total", "Coordinator SET operations"),
            kv_gets: counter("abd_kv_gets_total", "Coordinator GET operations"),
            kv_latency_secs: latency_histogram(
                "abd_kv_latency_seconds",
                "Coordinator operation latency in seconds",
                &["op_type"],
            ),
            quorum_failures: counter_vec(
                "abd_quorum_failures_total",
                "Quorum waits that did not reach a majority",
                &["phase", "kind"],
            ),
            last_elected_timestamp: IntGauge::new(
                "abd_last_elected_timestamp",
                "Most recent write timestamp elected by this coordinator",
            )
            .expect("valid gauge opts"),
            replica_writes_accepted: counter(
                "abd_replica_writes_accepted_total",
                "LocalWrite calls that replaced the stored value",
            ),
            replica_writes_rejected: counter(
                "abd_replica_writes_rejected_total",
                "LocalWrite calls ignored because the stored value was at least as new",
            ),
            corrupt_records: counter(
                "abd_corrupt_records_total",
                "Stored values that failed to deserialize and were treated as absent",
            ),
            registry,
        };

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(m.rpcs_sent.clone()),
            Box::new(m.rpcs_received.clone()),
            Box::new(m.rpcs_sent_by_type.clone()),
            Box::new(m.rpcs_received_by_type.clone()),
            Box::new(m.rpc_failures_by_type.clone()),
            Box::new(m.rpc_latency_secs.clone()),
            Box::new(m.kv_sets.clone()),
            Box::new(m.kv_gets.clone()),
            Box::new(m.kv_latency_secs.clone()),
            Box::new(m.quorum_failures.clone()),
            Box::new(m.last_elected_timestamp.clone()),
            Box::new(m.replica_writes_accepted.clone()),
            Box::new(m.replica_writes_rejected.clone()),
            Box::new(m.corrupt_records.clone()),
        ];
        for c in collectors {
            m.registry.register(c).expect("metric registered once");
        }

        m
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&metrics().registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Start an RPC latency timer. Records elapsed time on drop.
pub fn start_rpc_timer(rpc_type: &str, direction: &str) -> prometheus::HistogramTimer {
    metrics()
        .rpc_latency_secs
        .with_label_values(&[rpc_type, direction])
        .start_timer()
}

/// Start a coordinator operation latency timer.
pub fn start_kv_timer(op_type: &str) -> prometheus::HistogramTimer {
    metrics()
        .kv_latency_secs
        .with_label_values(&[op_type])
        .start_timer()
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response"))
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// Runs until the listener fails. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Histogram;

    #[test]
    fn test_metrics_init_and_increment() {
        let m = metrics();

        let before_sent = m.rpcs_sent.get();
        m.rpcs_sent.inc();
        m.rpcs_sent.inc();
        assert_eq!(m.rpcs_sent.get(), before_sent + 2);

        m.rpcs_sent_by_type.with_label_values(&["local_read"]).inc();
        m.quorum_failures
            .with_label_values(&["election", "timeout"])
            .inc();
        assert!(
            m.quorum_failures
                .with_label_values(&["election", "timeout"])
                .get()
                >= 1
        );

        m.last_elected_timestamp.set(17);
        assert_eq!(m.last_elected_timestamp.get(), 17);
    }

    #[test]
    fn test_encode_metrics_format() {
        metrics().replica_writes_accepted.inc();

        let output = encode_metrics();
        assert!(output.contains("abd_rpcs_sent_total"));
        assert!(output.contains("abd_replica_writes_accepted_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_histogram_records() {
        let m = metrics();

        m.rpc_latency_secs
            .with_label_values(&["test_rpc", "outbound"])
            .observe(0.005);
        m.rpc_latency_secs
            .with_label_values(&["test_rpc", "outbound"])
            .observe(0.010);

        let h: Histogram = m
            .rpc_latency_secs
            .with_label_values(&["test_rpc", "outbound"]);
        assert_eq!(h.get_sample_count(), 2);
        assert!((h.get_sample_sum() - 0.015).abs() < 1e-9);
    }
}
