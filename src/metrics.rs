//! Prometheus-based metrics module
//!
//! Session, failure and traffic counters for the connection manager and the
//! duplex channel. Rendered on demand with [`gather_text`].

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // === Session Metrics ===

    /// Sessions established, by role
    pub static ref SESSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("bluelink_sessions_total", "Total number of established sessions"),
        &["role"]
    ).unwrap();

    /// Currently established sessions (0 or 1)
    pub static ref SESSIONS_ACTIVE: IntGauge = IntGauge::new(
        "bluelink_sessions_active",
        "Number of currently established sessions"
    ).unwrap();

    /// Connection failures, by failure code
    pub static ref FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("bluelink_failures_total", "Total number of connection failures"),
        &["code"]
    ).unwrap();

    /// Session duration histogram
    pub static ref SESSION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "bluelink_session_duration_seconds",
            "Session duration in seconds"
        ).buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]),
        &["role"]
    ).unwrap();

    // === Traffic Metrics ===

    /// Total bytes written to the link
    pub static ref BYTES_SENT: IntCounter = IntCounter::new(
        "bluelink_bytes_sent_total",
        "Total bytes sent"
    ).unwrap();

    /// Total bytes read from the link
    pub static ref BYTES_RECEIVED: IntCounter = IntCounter::new(
        "bluelink_bytes_received_total",
        "Total bytes received"
    ).unwrap();
}

/// Initialize and register all metrics with the global registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(SESSIONS_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(SESSIONS_ACTIVE.clone())).ok();
    REGISTRY.register(Box::new(FAILURES_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(SESSION_DURATION_SECONDS.clone())).ok();

    REGISTRY.register(Box::new(BYTES_SENT.clone())).ok();
    REGISTRY.register(Box::new(BYTES_RECEIVED.clone())).ok();
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Format bytes to human readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
