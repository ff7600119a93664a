use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::resource::{ManagedResource, ResourceKind};
use crate::error::ClusterError;

/// Namespace-scoped CRUD over the resource kinds the core manages.
///
/// Implemented by [`super::K8sClient`] against a live API server; tests supply
/// in-memory or mocked implementations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List objects of one kind matching a label selector
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ManagedResource>, ClusterError>;

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ManagedResource, ClusterError>;

    async fn create(
        &self,
        namespace: &str,
        resource: &ManagedResource,
    ) -> Result<ManagedResource, ClusterError>;

    /// Replace an object. The caller sets `metadata.resourceVersion`.
    async fn replace(
        &self,
        namespace: &str,
        resource: &ManagedResource,
    ) -> Result<ManagedResource, ClusterError>;

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError>;
}
