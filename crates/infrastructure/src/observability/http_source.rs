use std::time::Duration;

use async_trait::async_trait;
use taskplane_core::{MetricsSource, TaskplaneError, TaskplaneResult, UtilizationSample};
use tracing::debug;

/// Polls a remote exporter's `/metrics/utilization` endpoint
#[derive(Debug, Clone)]
pub struct HttpMetricsSource {
    client: reqwest::Client,
    url: String,
}

impl HttpMetricsSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> TaskplaneResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TaskplaneError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch_sample(&self) -> TaskplaneResult<UtilizationSample> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TaskplaneError::MetricsUnavailable(format!("{}: {e}", self.url)))?;

        let sample = response
            .json::<UtilizationSample>()
            .await
            .map_err(|e| TaskplaneError::MetricsUnavailable(format!("invalid sample: {e}")))?;
        debug!(url = %self.url, cpu = sample.avg_cpu_percent, "Fetched remote utilization sample");
        Ok(sample)
    }
}
