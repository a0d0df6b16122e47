//! Prometheus metrics for observability and monitoring.
//!
//! Ports and stores record through the `metrics` facade. Without an
//! installed recorder every call is a no-op; [`MetricsServer`] installs the
//! Prometheus exporter.
//!
//! # Example
//!
//! ```rust,no_run
//! use porter_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address reported in logs for the scrape endpoint
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// Only one recorder can be installed per process. A second call (common
    /// in tests) logs a warning and leaves [`MetricsServer::handle`] empty.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Port metrics
    describe_counter!(
        "port_requests_dispatched_total",
        "Requests put on the outbound channel by a fresh chain"
    );
    describe_counter!(
        "port_responses_resolved_total",
        "Responses that completed a chain"
    );
    describe_counter!(
        "port_chains_advanced_total",
        "Responses that moved a chain on to its next request"
    );
    describe_counter!(
        "port_messages_discarded_total",
        "Inbound messages ignored, by reason"
    );
    describe_counter!(
        "port_short_circuits_total",
        "Chains that resolved without any request"
    );
    describe_gauge!("port_requests_pending", "Chains awaiting a response");

    // Store metrics
    describe_counter!("store_actions_total", "Actions processed by the store");
    describe_counter!(
        "store_rejected_actions_total",
        "Actions rejected because the store was shutting down"
    );
    describe_counter!("store_effects_executed_total", "Effects executed, by type");
    describe_histogram!(
        "store_reducer_duration_seconds",
        "Time taken to run the reducer for one action"
    );
}

/// Port metrics recorder.
pub struct PortMetrics;

impl PortMetrics {
    /// Record a request emitted for a new chain.
    pub fn record_dispatched(port: &str) {
        counter!("port_requests_dispatched_total", "port" => port.to_string()).increment(1);
    }

    /// Record a chain resolved by a response.
    pub fn record_resolved(port: &str) {
        counter!("port_responses_resolved_total", "port" => port.to_string()).increment(1);
    }

    /// Record a chain that advanced to another request.
    pub fn record_advanced(port: &str) {
        counter!("port_chains_advanced_total", "port" => port.to_string()).increment(1);
    }

    /// Record an ignored inbound message.
    pub fn record_discarded(port: &str, reason: &'static str) {
        counter!(
            "port_messages_discarded_total",
            "port" => port.to_string(),
            "reason" => reason
        )
        .increment(1);
    }

    /// Record a chain that resolved without touching the wire.
    pub fn record_short_circuit(port: &str) {
        counter!("port_short_circuits_total", "port" => port.to_string()).increment(1);
    }

    /// Record the current size of the pending table.
    pub fn record_pending(port: &str, pending: usize) {
        // Note: Precision loss acceptable for metrics (table sizes < 2^52)
        #[allow(clippy::cast_precision_loss)]
        gauge!("port_requests_pending", "port" => port.to_string()).set(pending as f64);
    }
}

/// Store metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record an action processed by the reducer.
    pub fn record_action(duration: Duration) {
        counter!("store_actions_total").increment(1);
        histogram!("store_reducer_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an action rejected during shutdown.
    pub fn record_rejected() {
        counter!("store_rejected_actions_total").increment(1);
    }

    /// Record an executed effect.
    pub fn record_effect(kind: &'static str) {
        counter!("store_effects_executed_total", "type" => kind).increment(1);
    }
}
