//! In-memory cluster for integration tests
//!
//! Behaves like an API server where it matters to the reconciler: resourceVersion
//! checks on replace, cluster IP assignment, defaulted fields, status subtrees and
//! label-selector filtering. Failures can be injected per resource key.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use networksim_operator::error::ClusterError;
use networksim_operator::k8s::{ClusterApi, ManagedResource, ResourceKey, ResourceKind};
use networksim_operator::models::{NodeDefinition, Topology};

pub const NAMESPACE: &str = "networksim-sim";

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, ResourceKey), ManagedResource>,
    version: u64,
    next_ip: u32,
    fail_create: BTreeSet<ResourceKey>,
    conflict_on_replace: BTreeSet<ResourceKey>,
    fail_list: Option<ResourceKind>,
    vm_api_missing: bool,
    mutations: Vec<String>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn injected(message: &str) -> ClusterError {
    ClusterError::Api {
        code: 500,
        reason: "InternalError".to_string(),
        message: message.to_string(),
    }
}

fn matches_selector(resource: &ManagedResource, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => resource.label(key) == Some(value),
            None => resource.label(term).is_some(),
        })
}

impl State {
    /// Server-side defaulting applied on every write
    fn admit(&mut self, mut resource: ManagedResource) -> ManagedResource {
        self.version += 1;
        resource.meta_mut().resource_version = Some(self.version.to_string());

        match &mut resource {
            ManagedResource::Deployment(d) => {
                d.metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert("deployment.kubernetes.io/revision".to_string(), "1".to_string());
                if let Some(spec) = d.spec.as_mut() {
                    spec.revision_history_limit.get_or_insert(10);
                    spec.progress_deadline_seconds.get_or_insert(600);
                    if let Some(pod) = spec.template.spec.as_mut() {
                        pod.dns_policy.get_or_insert_with(|| "ClusterFirst".to_string());
                        for container in &mut pod.containers {
                            container
                                .termination_message_path
                                .get_or_insert_with(|| "/dev/termination-log".to_string());
                        }
                    }
                }
                d.status = Some(DeploymentStatus {
                    replicas: Some(1),
                    ..Default::default()
                });
            }
            ManagedResource::Service(s) => {
                if let Some(spec) = s.spec.as_mut() {
                    if spec.cluster_ip.is_none() {
                        self.next_ip += 1;
                        let ip = format!("10.96.0.{}", self.next_ip);
                        spec.cluster_ip = Some(ip.clone());
                        spec.cluster_ips = Some(vec![ip]);
                    }
                    spec.session_affinity.get_or_insert_with(|| "None".to_string());
                    for port in spec.ports.iter_mut().flatten() {
                        port.protocol.get_or_insert_with(|| "TCP".to_string());
                    }
                }
            }
            ManagedResource::VirtualMachine(vm) => {
                vm.data["spec"]["template"]["spec"]["domain"]["machine"] = json!({"type": "q35"});
                vm.data["status"] = json!({"created": true, "ready": false});
            }
            ManagedResource::ConfigMap(_) | ManagedResource::NetworkPolicy(_) => {}
        }

        resource
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if another actor had created it
    pub fn seed(&self, resource: ManagedResource) {
        let mut state = self.state.lock().unwrap();
        let stored = state.admit(resource);
        state
            .objects
            .insert((NAMESPACE.to_string(), stored.key()), stored);
    }

    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<ManagedResource> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(NAMESPACE.to_string(), ResourceKey::new(kind, name)))
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.objects.keys().map(|(_, key)| key.to_string()).collect()
    }

    /// Replace the status subtree of a stored object, as its controller would
    pub fn set_status(&self, kind: ResourceKind, name: &str, status: serde_json::Value) {
        let mut state = self.state.lock().unwrap();
        let id = (NAMESPACE.to_string(), ResourceKey::new(kind, name));
        match state.objects.get_mut(&id) {
            Some(ManagedResource::Deployment(d)) => {
                d.status = Some(serde_json::from_value(status).unwrap());
            }
            Some(ManagedResource::VirtualMachine(vm)) => vm.data["status"] = status,
            other => panic!("no status subtree for {:?}", other.map(|r| r.key())),
        }
    }

    pub fn fail_create(&self, kind: ResourceKind, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.fail_create.insert(ResourceKey::new(kind, name));
    }

    pub fn conflict_on_replace(&self, kind: ResourceKind, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.conflict_on_replace.insert(ResourceKey::new(kind, name));
    }

    pub fn fail_list(&self, kind: ResourceKind) {
        self.state.lock().unwrap().fail_list = Some(kind);
    }

    pub fn without_vm_api(&self) {
        self.state.lock().unwrap().vm_api_missing = true;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_create.clear();
        state.conflict_on_replace.clear();
        state.fail_list = None;
    }

    /// Successful writes, as `verb Kind/Name`
    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn reset_mutations(&self) {
        self.state.lock().unwrap().mutations.clear();
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<ManagedResource>, ClusterError> {
        let state = self.state.lock().unwrap();
        if kind == ResourceKind::VirtualMachine && state.vm_api_missing {
            return Err(ClusterError::NotFound(
                "the server could not find the requested resource".to_string(),
            ));
        }
        if state.fail_list == Some(kind) {
            return Err(injected("list failed"));
        }

        Ok(state
            .objects
            .iter()
            .filter(|((ns, key), resource)| {
                ns == namespace && key.kind == kind && matches_selector(resource, selector)
            })
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ManagedResource, ClusterError> {
        let state = self.state.lock().unwrap();
        let key = ResourceKey::new(kind, name);
        state
            .objects
            .get(&(namespace.to_string(), key.clone()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))
    }

    async fn create(
        &self,
        namespace: &str,
        resource: &ManagedResource,
    ) -> Result<ManagedResource, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let key = resource.key();

        if key.kind == ResourceKind::VirtualMachine && state.vm_api_missing {
            return Err(ClusterError::NotFound("virtualmachines.kubevirt.io".to_string()));
        }
        if state.fail_create.contains(&key) {
            return Err(injected("create failed"));
        }
        let id = (namespace.to_string(), key.clone());
        if state.objects.contains_key(&id) {
            return Err(ClusterError::AlreadyExists(key.to_string()));
        }

        let stored = state.admit(resource.clone());
        state.objects.insert(id, stored.clone());
        state.mutations.push(format!("create {}", key));
        Ok(stored)
    }

    async fn replace(
        &self,
        namespace: &str,
        resource: &ManagedResource,
    ) -> Result<ManagedResource, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let key = resource.key();
        let id = (namespace.to_string(), key.clone());

        let Some(current) = state.objects.get(&id) else {
            return Err(ClusterError::NotFound(key.to_string()));
        };
        if state.conflict_on_replace.contains(&key)
            || current.meta().resource_version != resource.meta().resource_version
        {
            return Err(ClusterError::Conflict(format!(
                "the object {} has been modified",
                key
            )));
        }
        if let (ManagedResource::Service(current), ManagedResource::Service(update)) =
            (current, resource)
        {
            let ip = |s: &k8s_openapi::api::core::v1::Service| {
                s.spec.as_ref().and_then(|spec| spec.cluster_ip.clone())
            };
            if ip(current) != ip(update) {
                return Err(ClusterError::Api {
                    code: 422,
                    reason: "Invalid".to_string(),
                    message: "spec.clusterIP: field is immutable".to_string(),
                });
            }
        }

        let stored = state.admit(resource.clone());
        state.objects.insert(id, stored.clone());
        state.mutations.push(format!("update {}", key));
        Ok(stored)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let key = ResourceKey::new(kind, name);
        match state.objects.remove(&(namespace.to_string(), key.clone())) {
            Some(_) => {
                state.mutations.push(format!("delete {}", key));
                Ok(())
            }
            None => Err(ClusterError::NotFound(key.to_string())),
        }
    }
}

/// Two containers and a VM; the VM ships a startup config
pub fn lab() -> Topology {
    let mut vm = NodeDefinition::new("vyos", "vyos/vyos:1.4");
    vm.startup_config = Some("set system host-name vm1\n".to_string());

    Topology::new("lab")
        .with_node("r1", NodeDefinition::new("linux", "alpine:3.19"))
        .with_node("r2", NodeDefinition::new("ceos", "arista/ceos:4.30"))
        .with_node("vm1", vm)
        .with_link("r1:eth1", "r2:eth1")
        .with_link("r2:eth2", "vm1:eth1")
}
