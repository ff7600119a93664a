pub mod health;
pub mod metrics;
pub mod status;

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::status::TopologyStatus;
use crate::controller::TopologyReport;

/// Shared application state
#[derive(Clone, Default)]
pub struct AppState {
    /// Installed Prometheus recorder, absent when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
    pub status: Arc<RwLock<Option<TopologyStatus>>>,
}

impl AppState {
    pub fn new(metrics: Option<PrometheusHandle>) -> Self {
        Self {
            metrics,
            status: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn record_report(&self, report: &TopologyReport) {
        let mut guard = self.status.write().await;
        *guard = Some(TopologyStatus::from_report(report));
    }

    pub async fn record_failure(&self, topology: &str, error: &crate::error::Error) {
        let mut guard = self.status.write().await;
        *guard = Some(TopologyStatus::failed(topology, error));
    }
}
