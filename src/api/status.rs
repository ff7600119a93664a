//! Last controller pass, as served on `/api/status`

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::api::AppState;
use crate::controller::{NodeCounts, TopologyReport};
use crate::error::Error;
use crate::models::WorkloadType;
use crate::workload::{NodeStatus, ReconcileResult};

#[derive(Debug, Clone, Serialize)]
pub struct ChangeSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

impl From<&ReconcileResult> for ChangeSummary {
    fn from(result: &ReconcileResult) -> Self {
        Self {
            created: result.created.len(),
            updated: result.updated.len(),
            deleted: result.deleted.len(),
            errors: result.errors.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyStatus {
    pub topology: String,
    pub completed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub nodes: BTreeMap<String, WorkloadType>,
    /// Runtime readiness per node
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_status: BTreeMap<String, NodeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_counts: Option<NodeCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workloads: Option<ChangeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<ChangeSummary>,
    pub conditions: Vec<Condition>,
}

impl TopologyStatus {
    pub fn from_report(report: &TopologyReport) -> Self {
        Self {
            topology: report.topology.clone(),
            completed_at: report.completed_at,
            error: None,
            nodes: report.nodes.clone(),
            node_status: report.node_status().clone(),
            node_counts: Some(report.node_counts()),
            workloads: Some((&report.workloads).into()),
            connectivity: Some((&report.connectivity).into()),
            conditions: report.conditions(None),
        }
    }

    pub fn failed(topology: &str, error: &Error) -> Self {
        Self {
            topology: topology.to_string(),
            completed_at: Utc::now(),
            error: Some(error.to_string()),
            nodes: BTreeMap::new(),
            node_status: BTreeMap::new(),
            node_counts: None,
            workloads: None,
            connectivity: None,
            conditions: Vec::new(),
        }
    }
}

/// Status of the most recent pass; 404 until one has finished
pub async fn topology_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.status.read().await.clone() {
        Some(status) => Ok(Json(status)),
        None => Err((StatusCode::NOT_FOUND, "no reconcile pass has completed yet")),
    }
}
