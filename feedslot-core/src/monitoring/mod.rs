//! Monitoring and observability
//!
//! Prometheus metrics for every component plus a small HTTP server exposing
//! them, the State Bus snapshot and the session reset hook.

pub mod metrics;
pub mod server;

pub use metrics::{
    MetricsRegistry, OrderMetrics, RiskMetrics, ScannerMetrics, SlotMetrics, SystemMetrics,
};
pub use server::{encode_metrics, MonitoringServer, ServerState};
