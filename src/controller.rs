//! Topology controller: one full pass for a topology
//!
//! Render workloads, reconcile them, then reconcile connectivity. Per-resource errors
//! end up in the report's conditions; render and snapshot failures fail the pass.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::k8s::ClusterApi;
use crate::models::{Topology, WorkloadType};
use crate::networking::ConnectivityManager;
use crate::workload::{NodeStatus, ReconcileResult, WorkloadReconciler, WorkloadRenderer};

pub const WORKLOADS_READY: &str = "WorkloadsReady";
pub const CONNECTIVITY_READY: &str = "ConnectivityReady";

/// Outcome of one controller pass
#[derive(Debug)]
pub struct TopologyReport {
    pub topology: String,
    pub completed_at: DateTime<Utc>,
    /// Workload type chosen for every node
    pub nodes: BTreeMap<String, WorkloadType>,
    pub workloads: ReconcileResult,
    pub connectivity: ReconcileResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeCounts {
    pub containers: usize,
    pub vms: usize,
    pub ready: usize,
}

impl TopologyReport {
    pub fn is_clean(&self) -> bool {
        self.workloads.is_clean() && self.connectivity.is_clean()
    }

    pub fn node_counts(&self) -> NodeCounts {
        let vms = self
            .nodes
            .values()
            .filter(|t| **t == WorkloadType::Vm)
            .count();
        NodeCounts {
            containers: self.nodes.len() - vms,
            vms,
            ready: self.workloads.nodes.values().filter(|n| n.ready).count(),
        }
    }

    /// Runtime status of every node's workload
    pub fn node_status(&self) -> &BTreeMap<String, NodeStatus> {
        &self.workloads.nodes
    }

    pub fn conditions(&self, observed_generation: Option<i64>) -> Vec<Condition> {
        vec![
            self.workloads
                .ready_condition(WORKLOADS_READY, observed_generation),
            self.connectivity
                .ready_condition(CONNECTIVITY_READY, observed_generation),
        ]
    }
}

pub struct TopologyController {
    renderer: WorkloadRenderer,
    workloads: WorkloadReconciler,
    connectivity: ConnectivityManager,
    namespace: String,
}

impl TopologyController {
    pub fn new(cluster: Arc<dyn ClusterApi>, renderer: WorkloadRenderer, namespace: impl Into<String>) -> Self {
        Self {
            renderer,
            workloads: WorkloadReconciler::new(cluster.clone()),
            connectivity: ConnectivityManager::new(cluster),
            namespace: namespace.into(),
        }
    }

    pub fn renderer(&self) -> &WorkloadRenderer {
        &self.renderer
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip_all, fields(topology = %topology.name))]
    pub async fn reconcile(
        &self,
        topology: &Topology,
        cancel: &CancellationToken,
    ) -> Result<TopologyReport> {
        let started = Instant::now();
        metrics::counter!("networksim_reconcile_total", 1);

        let report = self.run(topology, cancel).await;
        metrics::histogram!(
            "networksim_reconcile_duration_seconds",
            started.elapsed().as_secs_f64()
        );

        match &report {
            Ok(report) => {
                record_metrics(report);
                if report.is_clean() {
                    info!(
                        workloads = %report.workloads,
                        connectivity = %report.connectivity,
                        "Topology reconciled"
                    );
                } else {
                    for err in report.workloads.errors.iter().chain(&report.connectivity.errors) {
                        warn!(error = %err, "Resource not reconciled");
                    }
                }
            }
            Err(e) => {
                metrics::counter!("networksim_reconcile_errors_total", 1, "scope" => "pass");
                error!(error = %e, "Topology reconcile failed");
            }
        }

        report
    }

    async fn run(&self, topology: &Topology, cancel: &CancellationToken) -> Result<TopologyReport> {
        topology.validate()?;

        let rendered =
            self.renderer
                .render_topology_workloads(topology, &topology.spec.nodes, &self.namespace)?;

        let workloads = self
            .workloads
            .reconcile_topology_workloads(topology, &rendered, &self.namespace, cancel)
            .await?;
        let connectivity = self
            .connectivity
            .reconcile_connectivity(topology, &self.namespace, cancel)
            .await?;

        Ok(TopologyReport {
            topology: topology.name.clone(),
            completed_at: Utc::now(),
            nodes: rendered
                .iter()
                .map(|(name, r)| (name.clone(), r.workload_type))
                .collect(),
            workloads,
            connectivity,
        })
    }
}

fn record_metrics(report: &TopologyReport) {
    for result in [&report.workloads, &report.connectivity] {
        for (action, changed) in [
            ("create", result.created.len()),
            ("update", result.updated.len()),
            ("delete", result.deleted.len()),
        ] {
            if changed > 0 {
                metrics::counter!(
                    "networksim_resources_changed_total",
                    changed as u64,
                    "action" => action
                );
            }
        }
        if !result.errors.is_empty() {
            metrics::counter!(
                "networksim_reconcile_errors_total",
                result.errors.len() as u64,
                "scope" => "resource"
            );
        }
    }

    let counts = report.node_counts();
    metrics::gauge!(
        "networksim_nodes",
        counts.containers as f64,
        "workload_type" => WorkloadType::Container.to_string()
    );
    metrics::gauge!(
        "networksim_nodes",
        counts.vms as f64,
        "workload_type" => WorkloadType::Vm.to_string()
    );
    metrics::gauge!("networksim_nodes_ready", counts.ready as f64);
}
