//! Error types for the NetworkSim native execution core

use thiserror::Error;

use crate::k8s::{ResourceKey, ResourceKind};
use crate::workload::Action;

/// Failure returned by the cluster API surface
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency failure (stale resourceVersion)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("API error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("Kubernetes client error: {0}")]
    Client(#[source] kube::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => ClusterError::NotFound(resp.message),
                409 if resp.reason == "AlreadyExists" => ClusterError::AlreadyExists(resp.message),
                409 => ClusterError::Conflict(resp.message),
                code => ClusterError::Api {
                    code,
                    reason: resp.reason,
                    message: resp.message,
                },
            },
            other => ClusterError::Client(other),
        }
    }
}

/// Failure of a single resource. Accumulated, never aborts the pass.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{key}: update conflict, retrying on next pass: {message}")]
    Conflict { key: ResourceKey, message: String },

    #[error("{key}: {action} failed: {source}")]
    Api {
        key: ResourceKey,
        action: Action,
        #[source]
        source: ClusterError,
    },

    #[error("{key}: name is taken by an object outside this topology (owner {owner:?})")]
    NameTaken {
        key: ResourceKey,
        owner: Option<String>,
    },

    #[error("{key}: dependency {dependency} is not ready")]
    DependencyNotReady {
        key: ResourceKey,
        dependency: ResourceKey,
    },

    #[error("node {node}: resource dependencies form a cycle")]
    DependencyCycle { node: String },

    #[error("node {node}: {kind} is not handled by this reconciler")]
    UnsupportedResourceKind { node: String, kind: ResourceKind },
}

impl ResourceError {
    /// The resource the error is about, when it names one
    pub fn key(&self) -> Option<&ResourceKey> {
        match self {
            ResourceError::Conflict { key, .. }
            | ResourceError::Api { key, .. }
            | ResourceError::NameTaken { key, .. }
            | ResourceError::DependencyNotReady { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Failure that aborts a whole reconcile call
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to list existing {kind} resources: {source}")]
    List {
        kind: ResourceKind,
        #[source]
        source: ClusterError,
    },

    #[error("reconciliation cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("nodes {first} and {second} both map to resource name {name}")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("node {node}: files {first} and {second} both map to config key {key}")]
    ConfigKeyCollision {
        node: String,
        key: String,
        first: String,
        second: String,
    },

    #[error("node {node}: failed to build manifest: {source}")]
    Manifest {
        node: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("node {node}: failed to render cloud-init user data: {source}")]
    CloudInit {
        node: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse topology: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid link endpoint {0:?}, expected node:interface")]
    InvalidEndpoint(String),

    #[error("link references unknown node {0:?}")]
    UnknownNode(String),

    #[error("interface {interface} on node {node} is used by more than one link")]
    DuplicateInterface { node: String, interface: String },
}

/// Top-level error of a controller pass
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
