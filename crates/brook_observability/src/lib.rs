//! Observability setup: structured logging, metrics (Prometheus), and the
//! puller's advisory gauges and counters.
//!
//! All values recorded here are advisory; pipeline correctness never depends
//! on them.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,brook=debug"));

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize the Prometheus metrics exporter on `listen_addr`.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Buffer sizes sampled by the puller's observability tick. Each gauge is
/// named for exactly what it samples.
pub fn record_buffer_sizes(chan_buffer_len: usize, event_channel_len: usize, mem_buffer_bytes: u64) {
    metrics::gauge!("brook_puller_chan_buffer_len").set(chan_buffer_len as f64);
    metrics::gauge!("brook_puller_event_channel_len").set(event_channel_len as f64);
    metrics::gauge!("brook_puller_mem_buffer_bytes").set(mem_buffer_bytes as f64);
}

/// Ingress event counter, labelled by kind (`"kv"` | `"resolved"`).
pub fn record_kv_event(kind: &'static str) {
    metrics::counter!("brook_puller_kv_event_total", "kind" => kind).increment(1);
}

/// Sorted-output collection counter, labelled by kind (`"kv"` | `"resolved"`).
pub fn record_txn_collect(kind: &'static str) {
    metrics::counter!("brook_puller_txn_collect_total", "kind" => kind).increment(1);
}

/// Physical part (milliseconds) of the last published global resolved ts.
pub fn record_resolved_ts(physical_ms: u64) {
    metrics::gauge!("brook_puller_resolved_ts").set(physical_ms as f64);
}
