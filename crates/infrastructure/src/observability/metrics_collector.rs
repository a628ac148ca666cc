use metrics::{gauge, Gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use taskplane_core::{TaskplaneError, TaskplaneResult, UtilizationSample};
use tracing::info;

/// Install the global Prometheus recorder and return the handle used to render `/metrics`
pub fn install_prometheus_recorder() -> TaskplaneResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TaskplaneError::Internal(format!("failed to install metrics recorder: {e}")))?;
    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Pool utilization gauges, labelled by namespace and pool
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    worker_count: Gauge,
    active_tasks: Gauge,
    total_slots: Gauge,
    queue_depth: Gauge,
    avg_cpu_percent: Gauge,
    avg_memory_percent: Gauge,
}

impl MetricsCollector {
    pub fn new(namespace: &str, pool: &str) -> Self {
        let labels = [
            ("namespace", namespace.to_string()),
            ("pool", pool.to_string()),
        ];
        Self {
            worker_count: gauge!("worker_count", &labels),
            active_tasks: gauge!("active_tasks", &labels),
            total_slots: gauge!("total_slots", &labels),
            queue_depth: gauge!("queue_depth", &labels),
            avg_cpu_percent: gauge!("avg_cpu_percent", &labels),
            avg_memory_percent: gauge!("avg_memory_percent", &labels),
        }
    }

    pub fn record_sample(&self, sample: &UtilizationSample) {
        self.worker_count.set(f64::from(sample.worker_count));
        self.active_tasks.set(f64::from(sample.active_tasks));
        self.total_slots.set(f64::from(sample.total_slots));
        self.queue_depth.set(sample.queue_depth as f64);
        self.avg_cpu_percent.set(sample.avg_cpu_percent);
        self.avg_memory_percent.set(sample.avg_memory_percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_sample_is_rendered_with_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let collector = MetricsCollector::new("tenant-a", "default");
            collector.record_sample(&UtilizationSample {
                timestamp: Utc::now(),
                namespace: "tenant-a".to_string(),
                pool: "default".to_string(),
                worker_count: 3,
                active_tasks: 7,
                total_slots: 12,
                avg_cpu_percent: 58.3,
                avg_memory_percent: 0.0,
                queue_depth: 40,
            });
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"worker_count{namespace="tenant-a",pool="default"}"#));
        assert!(rendered.contains(r#"queue_depth{namespace="tenant-a",pool="default"}"#));
        assert!(rendered.contains("avg_cpu_percent"));
    }
}
