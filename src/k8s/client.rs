//! Kubernetes client wrapper for NetworkSim

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, DynamicObject, ListParams, PostParams},
    Client, Config,
};
use tracing::{debug, info, instrument};

use super::api::ClusterApi;
use super::labels::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use super::resource::{virtual_machine_resource, ManagedResource, ResourceKind};
use crate::error::ClusterError;

/// Wrapper around kube::Client with helper methods for NetworkSim operations
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    namespace: String,
}

impl K8sClient {
    /// Create a new K8sClient using the default kubeconfig or in-cluster config
    #[instrument(skip_all)]
    pub async fn new(namespace: &str) -> Result<Self> {
        let config = Config::infer().await?;
        let client = Client::try_from(config)?;

        info!("Connected to Kubernetes cluster");

        Ok(Self::from_client(client, namespace))
    }

    pub fn from_client(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    /// Get the namespace this client operates in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Ensure the simulation namespace exists
    #[instrument(skip(self))]
    pub async fn ensure_namespace(&self) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                labels: Some(
                    [
                        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
                        ("networksim.io/type".to_string(), "simulation".to_string()),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(namespace = %self.namespace, "Created namespace");
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                info!(namespace = %self.namespace, "Namespace already exists");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    /// Check if cluster is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let version = self.client.apiserver_version().await?;
        info!(version = %version.git_version, "Kubernetes cluster is healthy");
        Ok(true)
    }

    fn typed<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn virtual_machines(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &virtual_machine_resource())
    }
}

#[async_trait]
impl ClusterApi for K8sClient {
    #[instrument(skip(self))]
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ManagedResource>, ClusterError> {
        let lp = ListParams::default().labels(selector);

        let items: Vec<ManagedResource> = match kind {
            ResourceKind::Deployment => self
                .typed::<Deployment>(namespace)
                .list(&lp)
                .await?
                .items
                .into_iter()
                .map(ManagedResource::Deployment)
                .collect(),
            ResourceKind::Service => self
                .typed::<Service>(namespace)
                .list(&lp)
                .await?
                .items
                .into_iter()
                .map(ManagedResource::Service)
                .collect(),
            ResourceKind::ConfigMap => self
                .typed::<ConfigMap>(namespace)
                .list(&lp)
                .await?
                .items
                .into_iter()
                .map(ManagedResource::ConfigMap)
                .collect(),
            ResourceKind::NetworkPolicy => self
                .typed::<NetworkPolicy>(namespace)
                .list(&lp)
                .await?
                .items
                .into_iter()
                .map(ManagedResource::NetworkPolicy)
                .collect(),
            ResourceKind::VirtualMachine => self
                .virtual_machines(namespace)
                .list(&lp)
                .await?
                .items
                .into_iter()
                .map(ManagedResource::VirtualMachine)
                .collect(),
        };

        debug!(count = items.len(), "Listed resources");
        Ok(items)
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ManagedResource, ClusterError> {
        let resource = match kind {
            ResourceKind::Deployment => {
                ManagedResource::Deployment(self.typed(namespace).get(name).await?)
            }
            ResourceKind::Service => ManagedResource::Service(self.typed(namespace).get(name).await?),
            ResourceKind::ConfigMap => {
                ManagedResource::ConfigMap(self.typed(namespace).get(name).await?)
            }
            ResourceKind::NetworkPolicy => {
                ManagedResource::NetworkPolicy(self.typed(namespace).get(name).await?)
            }
            ResourceKind::VirtualMachine => {
                ManagedResource::VirtualMachine(self.virtual_machines(namespace).get(name).await?)
            }
        };

        Ok(resource)
    }

    #[instrument(skip(self, resource), fields(key = %resource.key()))]
    async fn create(
        &self,
        namespace: &str,
        resource: &ManagedResource,
    ) -> Result<ManagedResource, ClusterError> {
        let pp = PostParams::default();

        let created = match resource {
            ManagedResource::Deployment(o) => {
                ManagedResource::Deployment(self.typed(namespace).create(&pp, o).await?)
            }
            ManagedResource::Service(o) => {
                ManagedResource::Service(self.typed(namespace).create(&pp, o).await?)
            }
            ManagedResource::ConfigMap(o) => {
                ManagedResource::ConfigMap(self.typed(namespace).create(&pp, o).await?)
            }
            ManagedResource::NetworkPolicy(o) => {
                ManagedResource::NetworkPolicy(self.typed(namespace).create(&pp, o).await?)
            }
            ManagedResource::VirtualMachine(o) => ManagedResource::VirtualMachine(
                self.virtual_machines(namespace).create(&pp, o).await?,
            ),
        };

        debug!("Created resource");
        Ok(created)
    }

    #[instrument(skip(self, resource), fields(key = %resource.key()))]
    async fn replace(
        &self,
        namespace: &str,
        resource: &ManagedResource,
    ) -> Result<ManagedResource, ClusterError> {
        let pp = PostParams::default();
        let name = resource.name();

        let replaced = match resource {
            ManagedResource::Deployment(o) => {
                ManagedResource::Deployment(self.typed(namespace).replace(name, &pp, o).await?)
            }
            ManagedResource::Service(o) => {
                ManagedResource::Service(self.typed(namespace).replace(name, &pp, o).await?)
            }
            ManagedResource::ConfigMap(o) => {
                ManagedResource::ConfigMap(self.typed(namespace).replace(name, &pp, o).await?)
            }
            ManagedResource::NetworkPolicy(o) => {
                ManagedResource::NetworkPolicy(self.typed(namespace).replace(name, &pp, o).await?)
            }
            ManagedResource::VirtualMachine(o) => ManagedResource::VirtualMachine(
                self.virtual_machines(namespace)
                    .replace(name, &pp, o)
                    .await?,
            ),
        };

        debug!("Replaced resource");
        Ok(replaced)
    }

    #[instrument(skip(self))]
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let dp = DeleteParams::default();

        match kind {
            ResourceKind::Deployment => {
                self.typed::<Deployment>(namespace).delete(name, &dp).await?;
            }
            ResourceKind::Service => {
                self.typed::<Service>(namespace).delete(name, &dp).await?;
            }
            ResourceKind::ConfigMap => {
                self.typed::<ConfigMap>(namespace).delete(name, &dp).await?;
            }
            ResourceKind::NetworkPolicy => {
                self.typed::<NetworkPolicy>(namespace)
                    .delete(name, &dp)
                    .await?;
            }
            ResourceKind::VirtualMachine => {
                self.virtual_machines(namespace).delete(name, &dp).await?;
            }
        }

        debug!("Deleted resource");
        Ok(())
    }
}
