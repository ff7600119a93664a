//! NetworkSim native execution core
//!
//! Classifies topology nodes as containers or VMs, renders their Kubernetes
//! resources and reconciles them, together with the NetworkPolicies derived from
//! the topology's links.

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod k8s;
pub mod models;
pub mod networking;
pub mod workload;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::api::AppState;

/// Create the application router with the given state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/metrics", get(api::metrics::metrics_handler))
        .route("/api/status", get(api::status::topology_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
