//! Workload reconciliation
//!
//! Drives the cluster toward the rendered resources of a topology. One pass:
//!
//! 1. List each managed kind once by the topology label. This snapshot is the only
//!    view of live state the pass uses; a failed list aborts the pass.
//! 2. Apply each node's resources in dependency order: create what is missing,
//!    replace what drifted, leave the rest alone.
//! 3. Delete snapshot objects that nothing rendered.
//!
//! Per-resource failures are collected in [`ReconcileResult::errors`] and never stop
//! the pass. Nothing is retried here; the next pass is the retry.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use strum::{AsRefStr, Display};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::diff::{carry_server_fields, needs_update};
use super::renderer::{RenderResult, RenderedResource};
use super::status::NodeStatus;
use crate::error::{ClusterError, ReconcileError, ResourceError};
use crate::k8s::labels::{is_owned_by, topology_selector, TOPOLOGY_LABEL, WORKLOAD_TYPE_LABEL};
use crate::k8s::{ClusterApi, ManagedResource, ResourceKey, ResourceKind};
use crate::models::{Topology, WorkloadType};

/// Mutation performed on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    pub workload_type: Option<WorkloadType>,
}

impl ResourceInfo {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, &self.name)
    }
}

/// Outcome of one reconcile call
#[derive(Debug, Default)]
pub struct ReconcileResult {
    pub created: Vec<ResourceInfo>,
    pub updated: Vec<ResourceInfo>,
    pub deleted: Vec<ResourceInfo>,
    pub errors: Vec<ResourceError>,
    /// Runtime status per node, as seen at the end of the pass
    pub nodes: BTreeMap<String, NodeStatus>,
}

impl ReconcileResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn merge(&mut self, other: ReconcileResult) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
        self.errors.extend(other.errors);
        self.nodes.extend(other.nodes);
    }

    /// Status condition summarizing the pass, for the owning topology's status
    pub fn ready_condition(&self, condition_type: &str, observed_generation: Option<i64>) -> Condition {
        let (status, reason, message) = if self.is_clean() {
            ("True", "Reconciled", self.to_string())
        } else {
            let errors: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
            ("False", "ResourceErrors", format!("{}: {}", self, errors.join("; ")))
        };

        Condition {
            type_: condition_type.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message,
            observed_generation,
            last_transition_time: Time(Utc::now()),
        }
    }
}

impl fmt::Display for ReconcileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} deleted={} errors={}",
            self.created.len(),
            self.updated.len(),
            self.deleted.len(),
            self.errors.len()
        )
    }
}

/// Race a cluster call against cancellation
async fn guarded<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = T>,
) -> Result<T, ReconcileError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        out = call => Ok(out),
    }
}

/// Stable topological order of a node's resources.
///
/// Dependencies on resources outside the group are ignored here and checked at
/// apply time. `None` on a cycle.
fn apply_order(resources: &[RenderedResource]) -> Option<Vec<&RenderedResource>> {
    let in_group: BTreeSet<ResourceKey> = resources.iter().map(RenderedResource::key).collect();
    let mut placed: BTreeSet<ResourceKey> = BTreeSet::new();
    let mut remaining: Vec<&RenderedResource> = resources.iter().collect();
    let mut order = Vec::with_capacity(resources.len());

    while !remaining.is_empty() {
        let next = remaining.iter().position(|r| {
            r.dependencies
                .iter()
                .all(|dep| !in_group.contains(dep) || placed.contains(dep))
        })?;
        let resource = remaining.remove(next);
        placed.insert(resource.key());
        order.push(resource);
    }

    Some(order)
}

/// One create/update/delete pass over a fixed set of kinds.
///
/// Shared by the workload and connectivity reconcilers.
pub(crate) struct ReconcilePass<'a> {
    cluster: &'a dyn ClusterApi,
    namespace: &'a str,
    topology: &'a str,
    kinds: &'a [ResourceKind],
    cancel: &'a CancellationToken,
    /// Snapshot, kept current with the objects this pass writes
    live: BTreeMap<ResourceKey, ManagedResource>,
    desired: BTreeSet<ResourceKey>,
    ready: BTreeSet<ResourceKey>,
    result: ReconcileResult,
}

impl<'a> ReconcilePass<'a> {
    /// List `kinds` once for `topology`. Objects without the owner label are dropped.
    pub(crate) async fn snapshot(
        cluster: &'a dyn ClusterApi,
        namespace: &'a str,
        topology: &'a str,
        kinds: &'a [ResourceKind],
        cancel: &'a CancellationToken,
    ) -> Result<ReconcilePass<'a>, ReconcileError> {
        let selector = topology_selector(topology);
        let mut live = BTreeMap::new();

        for &kind in kinds {
            let items = match guarded(cancel, cluster.list(kind, namespace, &selector)).await? {
                Ok(items) => items,
                Err(ClusterError::NotFound(_)) if kind == ResourceKind::VirtualMachine => {
                    debug!("VirtualMachine API not served, treating as empty");
                    Vec::new()
                }
                Err(source) => return Err(ReconcileError::List { kind, source }),
            };

            for item in items {
                if !is_owned_by(item.meta(), topology) {
                    debug!(key = %item.key(), "Ignoring object owned by another topology");
                    continue;
                }
                live.insert(item.key(), item);
            }
        }

        debug!(existing = live.len(), "Snapshot taken");

        Ok(Self {
            cluster,
            namespace,
            topology,
            kinds,
            cancel,
            live,
            desired: BTreeSet::new(),
            ready: BTreeSet::new(),
            result: ReconcileResult::default(),
        })
    }

    fn info(&self, key: &ResourceKey, workload_type: Option<WorkloadType>) -> ResourceInfo {
        ResourceInfo {
            kind: key.kind,
            name: key.name.clone(),
            namespace: self.namespace.to_string(),
            workload_type,
        }
    }

    fn fail(&mut self, key: &ResourceKey, error: ResourceError) {
        warn!(%key, %error, "Resource reconcile failed");
        self.result.errors.push(error);
    }

    /// Applied this pass, or already present. A failed update leaves the object in place.
    fn dependency_ready(&self, dep: &ResourceKey) -> bool {
        self.ready.contains(dep) || self.live.contains_key(dep)
    }

    /// Apply one owner's resources. Only cancellation is returned as an error.
    pub(crate) async fn apply_group(
        &mut self,
        owner: &str,
        workload_type: Option<WorkloadType>,
        resources: &[RenderedResource],
    ) -> Result<(), ReconcileError> {
        for resource in resources {
            self.desired.insert(resource.key());
        }

        // Kinds outside the snapshot could never be compared or pruned
        if let Some(kind) = resources
            .iter()
            .map(|r| r.resource.kind())
            .find(|kind| !self.kinds.contains(kind))
        {
            let error = ResourceError::UnsupportedResourceKind {
                node: owner.to_string(),
                kind,
            };
            warn!(owner, %error, "Skipping resources");
            self.result.errors.push(error);
            return Ok(());
        }

        let Some(order) = apply_order(resources) else {
            let error = ResourceError::DependencyCycle {
                node: owner.to_string(),
            };
            warn!(owner, %error, "Skipping resources");
            self.result.errors.push(error);
            return Ok(());
        };

        for rendered in order {
            let key = rendered.key();

            if let Some(dep) = rendered
                .dependencies
                .iter()
                .find(|dep| !self.dependency_ready(dep))
            {
                let error = ResourceError::DependencyNotReady {
                    key: key.clone(),
                    dependency: dep.clone(),
                };
                self.fail(&key, error);
                continue;
            }

            match self.live.get(&key).cloned() {
                None => self.create(key, &rendered.resource, workload_type).await?,
                Some(live) if needs_update(&rendered.resource, &live) => {
                    self.update(key, &rendered.resource, &live, workload_type)
                        .await?
                }
                Some(_) => {
                    debug!(%key, "Unchanged");
                    self.ready.insert(key);
                }
            }
        }

        Ok(())
    }

    async fn create(
        &mut self,
        key: ResourceKey,
        resource: &ManagedResource,
        workload_type: Option<WorkloadType>,
    ) -> Result<(), ReconcileError> {
        match guarded(self.cancel, self.cluster.create(self.namespace, resource)).await? {
            Ok(created) => {
                info!(%key, "Created");
                let info = self.info(&key, workload_type);
                self.result.created.push(info);
                self.live.insert(key.clone(), created);
                self.ready.insert(key);
            }
            Err(ClusterError::AlreadyExists(_)) => self.adopt_existing(key).await?,
            Err(source) => {
                let error = ResourceError::Api {
                    key: key.clone(),
                    action: Action::Create,
                    source,
                };
                self.fail(&key, error);
            }
        }
        Ok(())
    }

    /// Create lost a race or hit a name outside the snapshot. The object counts
    /// as ready only when this topology owns it.
    async fn adopt_existing(&mut self, key: ResourceKey) -> Result<(), ReconcileError> {
        let existing = guarded(
            self.cancel,
            self.cluster.get(key.kind, self.namespace, &key.name),
        )
        .await?;

        match existing {
            Ok(existing) if is_owned_by(existing.meta(), self.topology) => {
                info!(%key, "Already exists, created concurrently");
                self.live.insert(key.clone(), existing);
                self.ready.insert(key);
            }
            Ok(existing) => {
                let error = ResourceError::NameTaken {
                    key: key.clone(),
                    owner: existing.label(TOPOLOGY_LABEL).map(str::to_string),
                };
                self.fail(&key, error);
            }
            Err(source) => {
                let error = ResourceError::Api {
                    key: key.clone(),
                    action: Action::Create,
                    source,
                };
                self.fail(&key, error);
            }
        }
        Ok(())
    }

    async fn update(
        &mut self,
        key: ResourceKey,
        resource: &ManagedResource,
        live: &ManagedResource,
        workload_type: Option<WorkloadType>,
    ) -> Result<(), ReconcileError> {
        let update = carry_server_fields(resource, live);

        match guarded(self.cancel, self.cluster.replace(self.namespace, &update)).await? {
            Ok(replaced) => {
                info!(%key, "Updated");
                let info = self.info(&key, workload_type);
                self.result.updated.push(info);
                self.live.insert(key.clone(), replaced);
                self.ready.insert(key);
            }
            Err(ClusterError::Conflict(message)) => {
                let error = ResourceError::Conflict {
                    key: key.clone(),
                    message,
                };
                self.fail(&key, error);
            }
            Err(source) => {
                let error = ResourceError::Api {
                    key: key.clone(),
                    action: Action::Update,
                    source,
                };
                self.fail(&key, error);
            }
        }
        Ok(())
    }

    /// Delete snapshot objects that were not rendered, dependents first
    pub(crate) async fn prune(&mut self) -> Result<(), ReconcileError> {
        let unwanted: Vec<(ResourceKey, Option<WorkloadType>)> = self
            .live
            .iter()
            .rev()
            .filter(|(key, _)| !self.desired.contains(key))
            .map(|(key, live)| {
                let workload_type = live
                    .label(WORKLOAD_TYPE_LABEL)
                    .and_then(|t| t.parse().ok());
                (key.clone(), workload_type)
            })
            .collect();

        for (key, workload_type) in unwanted {
            match guarded(
                self.cancel,
                self.cluster.delete(key.kind, self.namespace, &key.name),
            )
            .await?
            {
                Ok(()) | Err(ClusterError::NotFound(_)) => {
                    info!(%key, "Deleted");
                    let info = self.info(&key, workload_type);
                    self.result.deleted.push(info);
                }
                Err(source) => {
                    let error = ResourceError::Api {
                        key: key.clone(),
                        action: Action::Delete,
                        source,
                    };
                    self.fail(&key, error);
                }
            }
        }

        Ok(())
    }

    /// Live object for `key` after this pass's writes
    pub(crate) fn observed(&self, key: &ResourceKey) -> Option<&ManagedResource> {
        self.live.get(key)
    }

    pub(crate) fn finish(self) -> ReconcileResult {
        self.result
    }
}

/// Reconciles rendered workloads against the cluster
#[derive(Clone)]
pub struct WorkloadReconciler {
    cluster: Arc<dyn ClusterApi>,
}

impl WorkloadReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Create, update and delete Deployments, Services, ConfigMaps and
    /// VirtualMachines so the namespace matches `render_results`.
    ///
    /// Errors only when the snapshot cannot be listed or `cancel` fires.
    #[instrument(skip_all, fields(topology = %topology.name, namespace = %namespace))]
    pub async fn reconcile_topology_workloads(
        &self,
        topology: &Topology,
        render_results: &BTreeMap<String, RenderResult>,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult, ReconcileError> {
        let mut pass = ReconcilePass::snapshot(
            self.cluster.as_ref(),
            namespace,
            &topology.name,
            &ResourceKind::WORKLOADS,
            cancel,
        )
        .await?;

        for (node, rendered) in render_results {
            pass.apply_group(node, Some(rendered.workload_type), &rendered.resources)
                .await?;
        }
        pass.prune().await?;

        let nodes: BTreeMap<String, NodeStatus> = render_results
            .iter()
            .map(|(node, rendered)| {
                let live = rendered
                    .workload_key()
                    .and_then(|key| pass.observed(&key));
                (node.clone(), NodeStatus::observe(rendered.workload_type, live))
            })
            .collect();

        let mut result = pass.finish();
        result.nodes = nodes;
        info!(
            %result,
            ready = result.nodes.values().filter(|n| n.ready).count(),
            "Reconciled topology workloads"
        );
        Ok(result)
    }
}
