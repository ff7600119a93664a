//! Typed resources managed on behalf of a topology

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use strum::{AsRefStr, Display};

/// Closed set of Kubernetes kinds the core creates.
///
/// Declaration order is the apply order used when no dependency says otherwise.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    AsRefStr,
)]
pub enum ResourceKind {
    ConfigMap,
    Deployment,
    VirtualMachine,
    Service,
    NetworkPolicy,
}

impl ResourceKind {
    /// Kinds owned by the workload reconciler, in snapshot order
    pub const WORKLOADS: [ResourceKind; 4] = [
        ResourceKind::Deployment,
        ResourceKind::Service,
        ResourceKind::ConfigMap,
        ResourceKind::VirtualMachine,
    ];
}

/// KubeVirt VirtualMachine resource, served by an external operator
pub fn virtual_machine_resource() -> ApiResource {
    ApiResource {
        group: "kubevirt.io".to_string(),
        version: "v1".to_string(),
        api_version: "kubevirt.io/v1".to_string(),
        kind: "VirtualMachine".to_string(),
        plural: "virtualmachines".to_string(),
    }
}

/// Identity of a resource within a namespace, displayed as `Kind/Name`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A resource manifest together with its kind
#[derive(Debug, Clone)]
pub enum ManagedResource {
    Deployment(Deployment),
    Service(Service),
    ConfigMap(ConfigMap),
    VirtualMachine(DynamicObject),
    NetworkPolicy(NetworkPolicy),
}

impl ManagedResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManagedResource::Deployment(_) => ResourceKind::Deployment,
            ManagedResource::Service(_) => ResourceKind::Service,
            ManagedResource::ConfigMap(_) => ResourceKind::ConfigMap,
            ManagedResource::VirtualMachine(_) => ResourceKind::VirtualMachine,
            ManagedResource::NetworkPolicy(_) => ResourceKind::NetworkPolicy,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedResource::Deployment(o) => &o.metadata,
            ManagedResource::Service(o) => &o.metadata,
            ManagedResource::ConfigMap(o) => &o.metadata,
            ManagedResource::VirtualMachine(o) => &o.metadata,
            ManagedResource::NetworkPolicy(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedResource::Deployment(o) => &mut o.metadata,
            ManagedResource::Service(o) => &mut o.metadata,
            ManagedResource::ConfigMap(o) => &mut o.metadata,
            ManagedResource::VirtualMachine(o) => &mut o.metadata,
            ManagedResource::NetworkPolicy(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), self.name())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.meta()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    /// JSON form of the manifest, as the API server would see it
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            ManagedResource::Deployment(o) => serde_json::to_value(o),
            ManagedResource::Service(o) => serde_json::to_value(o),
            ManagedResource::ConfigMap(o) => serde_json::to_value(o),
            ManagedResource::VirtualMachine(o) => serde_json::to_value(o),
            ManagedResource::NetworkPolicy(o) => serde_json::to_value(o),
        }
    }
}
