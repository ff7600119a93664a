use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::policies::{link_policy, linked_peers, management_policy};
use crate::error::ReconcileError;
use crate::k8s::{ClusterApi, ManagedResource, ResourceKind};
use crate::models::Topology;
use crate::workload::reconciler::ReconcilePass;
use crate::workload::{ReconcileResult, RenderedResource};

/// Keeps a topology's NetworkPolicies in line with its links
#[derive(Clone)]
pub struct ConnectivityManager {
    cluster: Arc<dyn ClusterApi>,
}

impl ConnectivityManager {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// One link policy per node, then the management policy
    pub fn render_policies(topology: &Topology, namespace: &str) -> Vec<RenderedResource> {
        let mut policies: Vec<RenderedResource> = topology
            .spec
            .nodes
            .keys()
            .map(|node| {
                let peers = linked_peers(topology, node);
                link_policy(&topology.name, node, &peers, namespace)
            })
            .chain(std::iter::once(management_policy(&topology.name, namespace)))
            .map(|policy| RenderedResource {
                resource: ManagedResource::NetworkPolicy(policy),
                dependencies: Vec::new(),
            })
            .collect();
        policies.sort_by_key(RenderedResource::key);
        policies
    }

    #[instrument(skip_all, fields(topology = %topology.name, namespace = %namespace))]
    pub async fn reconcile_connectivity(
        &self,
        topology: &Topology,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult, ReconcileError> {
        let policies = Self::render_policies(topology, namespace);

        let mut pass = ReconcilePass::snapshot(
            self.cluster.as_ref(),
            namespace,
            &topology.name,
            &[ResourceKind::NetworkPolicy],
            cancel,
        )
        .await?;
        pass.apply_group(&topology.name, None, &policies).await?;
        pass.prune().await?;

        let result = pass.finish();
        info!(policies = policies.len(), %result, "Reconciled connectivity");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterError;
    use crate::k8s::MockClusterApi;
    use crate::models::NodeDefinition;

    fn lab() -> Topology {
        Topology::new("lab")
            .with_node("r1", NodeDefinition::new("linux", "alpine"))
            .with_node("r2", NodeDefinition::new("linux", "alpine"))
            .with_link("r1:eth1", "r2:eth1")
    }

    #[test]
    fn test_render_policies() {
        let names: Vec<String> = ConnectivityManager::render_policies(&lab(), "sim")
            .iter()
            .map(|p| p.key().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "NetworkPolicy/lab-management",
                "NetworkPolicy/lab-r1-links",
                "NetworkPolicy/lab-r2-links",
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_creates_policies() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_list()
            .withf(|kind, _, selector| {
                *kind == ResourceKind::NetworkPolicy && selector == "networksim.io/topology=lab"
            })
            .returning(|_, _, _| Ok(Vec::new()));
        cluster
            .expect_create()
            .times(3)
            .returning(|_, resource| Ok(resource.clone()));

        let manager = ConnectivityManager::new(Arc::new(cluster));
        let result = manager
            .reconcile_connectivity(&lab(), "sim", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.created.len(), 3);
        assert!(result.created.iter().all(|r| r.workload_type.is_none()));
    }

    #[tokio::test]
    async fn test_policy_failure_is_accumulated() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_list().returning(|_, _, _| Ok(Vec::new()));
        cluster.expect_create().returning(|_, resource| {
            if resource.name() == "lab-r1-links" {
                Err(ClusterError::Api {
                    code: 422,
                    reason: "Invalid".to_string(),
                    message: "bad policy".to_string(),
                })
            } else {
                Ok(resource.clone())
            }
        });

        let manager = ConnectivityManager::new(Arc::new(cluster));
        let result = manager
            .reconcile_connectivity(&lab(), "sim", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.created.len(), 2);
        assert_eq!(result.errors.len(), 1);
    }
}
