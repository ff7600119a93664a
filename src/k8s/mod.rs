//! Kubernetes integration module for NetworkSim
//!
//! This module owns everything that talks to, or describes objects for, the cluster:
//! - The label contract shared by all topology-owned resources
//! - The closed set of resource kinds the core manages
//! - The `ClusterApi` seam and its kube-rs implementation

mod api;
mod client;
pub mod labels;
mod resource;

pub use api::ClusterApi;
#[cfg(test)]
pub use api::MockClusterApi;
pub use client::K8sClient;
pub use resource::{virtual_machine_resource, ManagedResource, ResourceKey, ResourceKind};
