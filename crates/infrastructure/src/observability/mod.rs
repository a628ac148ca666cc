//! Observability module
//!
//! Structured logging setup, the Prometheus recorder, pool utilization
//! sampling and the sources the autoscaler reads utilization from.

pub mod exporter;
pub mod http_source;
pub mod logging;
pub mod metrics_collector;
pub mod utilization;

pub use exporter::MetricsExporter;
pub use http_source::HttpMetricsSource;
pub use logging::{init_structured_logging, LogFormat, LoggingConfig};
pub use metrics_collector::{install_prometheus_recorder, MetricsCollector};
pub use utilization::{ProcessSampler, UtilizationSource};
