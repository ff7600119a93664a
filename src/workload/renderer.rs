//! Workload rendering
//!
//! Turns topology nodes into the Kubernetes resources that realize them. Per node:
//! assemble a [`NodeConfig`], classify it, then build either a Deployment or a
//! KubeVirt VirtualMachine, a Service in front of it, and a ConfigMap when the node
//! ships files. Output is deterministic for a given input so the reconciler never
//! sees spurious differences.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

use super::classifier::{Classification, WorkloadClassifier};
use super::container::{build_deployment, build_service};
use super::files::ConfigBundle;
use super::vm::build_virtual_machine;
use crate::error::RenderError;
use crate::k8s::labels::{
    dns_name, node_selector, topology_labels, CLASSIFICATION_ANNOTATION, EXECUTION_MODE_ENV,
    EXECUTION_MODE_LABEL, NETWORKING_MODE_ENV, NETWORKING_MODE_LABEL, NODE_KIND_LABEL,
    WORKLOAD_TYPE_LABEL,
};
use crate::k8s::{ManagedResource, ResourceKey, ResourceKind};
use crate::models::{
    ExecutionMode, NetworkInterface, NodeConfig, NodeDefinition, Topology, WorkloadType,
};

/// A rendered manifest and the resources that must exist before it is applied
#[derive(Debug, Clone)]
pub struct RenderedResource {
    pub resource: ManagedResource,
    pub dependencies: Vec<ResourceKey>,
}

impl RenderedResource {
    pub fn key(&self) -> ResourceKey {
        self.resource.key()
    }
}

/// Everything rendered for one node
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub workload_type: WorkloadType,
    pub classification: Classification,
    pub resources: Vec<RenderedResource>,
    pub node_config: NodeConfig,
}

impl RenderResult {
    pub fn resource(&self, kind: ResourceKind) -> Option<&ManagedResource> {
        self.resources
            .iter()
            .map(|r| &r.resource)
            .find(|r| r.kind() == kind)
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.resources.iter().map(RenderedResource::key).collect()
    }

    /// The Deployment or VirtualMachine running the node
    pub fn workload_key(&self) -> Option<ResourceKey> {
        let kind = match self.workload_type {
            WorkloadType::Container => ResourceKind::Deployment,
            WorkloadType::Vm => ResourceKind::VirtualMachine,
        };
        self.resource(kind).map(ManagedResource::key)
    }
}

/// Per-node values shared by the manifest builders
pub struct NodeContext<'a> {
    pub topology: &'a str,
    pub namespace: &'a str,
    pub node: &'a NodeConfig,
    /// Name of the workload and its Service
    pub name: String,
    pub classification: &'a Classification,
}

impl NodeContext<'_> {
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.node.labels.clone();
        labels.insert(
            WORKLOAD_TYPE_LABEL.to_string(),
            self.classification.workload_type.to_string(),
        );
        labels
    }

    pub fn metadata(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.to_string()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }

    pub fn workload_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = self.node.annotations.clone();
        annotations.insert(
            CLASSIFICATION_ANNOTATION.to_string(),
            self.classification.to_string(),
        );
        annotations
    }

    pub fn selector(&self) -> BTreeMap<String, String> {
        node_selector(self.topology, &self.node.name)
    }

    pub fn hostname(&self) -> String {
        dns_name(&[&self.node.name])
    }
}

/// Assemble a node's configuration.
///
/// Environment and labels are layered: containerlab fields, then topology defaults,
/// then the node override. Identity labels are applied last and cannot be replaced.
pub fn build_node_config(topology: &Topology, name: &str, definition: &NodeDefinition) -> NodeConfig {
    let native = &topology.spec.native_execution;
    let mut node = NodeConfig::new(name, &definition.image).with_kind(&definition.kind);

    node.environment.extend(definition.env.clone());
    node.labels.extend(definition.labels.clone());
    node.startup_config = definition.startup_config.clone();
    node.files = definition.files.clone();

    apply_execution_mode(&mut node, native.execution_mode);
    if let Some(cni) = &native.networking.cni {
        node.environment
            .insert(NETWORKING_MODE_ENV.to_string(), cni.clone());
        node.labels
            .insert(NETWORKING_MODE_LABEL.to_string(), cni.clone());
    }
    node.resources = native.resources.clone();

    if let Some(node_override) = native.node_overrides.get(name) {
        apply_execution_mode(&mut node, node_override.execution_mode);
        if node_override.resources.is_some() {
            node.resources = node_override.resources.clone();
        }
        node.environment.extend(node_override.config.clone());
    }

    node.labels.extend(topology_labels(&topology.name, name));
    if !definition.kind.is_empty() {
        node.labels
            .insert(NODE_KIND_LABEL.to_string(), definition.kind.clone());
    }

    node.interfaces = interfaces_for(topology, name);
    node
}

fn apply_execution_mode(node: &mut NodeConfig, mode: ExecutionMode) {
    if mode == ExecutionMode::Auto {
        return;
    }
    node.environment
        .insert(EXECUTION_MODE_ENV.to_string(), mode.to_string());
    node.labels
        .insert(EXECUTION_MODE_LABEL.to_string(), mode.to_string());
}

/// One interface per link endpoint on `node`, in link order
fn interfaces_for(topology: &Topology, node: &str) -> Vec<NetworkInterface> {
    let mut interfaces = Vec::new();
    for (a, b) in topology.endpoint_pairs() {
        if a.node == node {
            interfaces.push(NetworkInterface {
                name: a.interface.clone(),
                peer: b.clone(),
            });
        }
        if b.node == node {
            interfaces.push(NetworkInterface {
                name: b.interface,
                peer: a,
            });
        }
    }
    interfaces
}

/// Renders topology nodes into Kubernetes resources
#[derive(Debug, Clone, Default)]
pub struct WorkloadRenderer {
    classifier: WorkloadClassifier,
}

impl WorkloadRenderer {
    pub fn new(classifier: WorkloadClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &WorkloadClassifier {
        &self.classifier
    }

    pub fn classifier_mut(&mut self) -> &mut WorkloadClassifier {
        &mut self.classifier
    }

    /// Render every node in `definitions`, keyed by node name.
    ///
    /// Fails as a whole when any node fails, or when two nodes map to the same
    /// resource name.
    #[instrument(skip_all, fields(topology = %topology.name, namespace = %namespace))]
    pub fn render_topology_workloads(
        &self,
        topology: &Topology,
        definitions: &BTreeMap<String, NodeDefinition>,
        namespace: &str,
    ) -> Result<BTreeMap<String, RenderResult>, RenderError> {
        let mut names: BTreeMap<String, &str> = BTreeMap::new();
        let mut results = BTreeMap::new();

        for (node_name, definition) in definitions {
            let name = dns_name(&[&topology.name, node_name]);
            if let Some(first) = names.insert(name.clone(), node_name) {
                return Err(RenderError::NameCollision {
                    name,
                    first: first.to_string(),
                    second: node_name.clone(),
                });
            }

            let node = build_node_config(topology, node_name, definition);
            let result = self.render_node(topology, node, namespace, name)?;
            results.insert(node_name.clone(), result);
        }

        info!(
            nodes = results.len(),
            vms = results
                .values()
                .filter(|r| r.workload_type == WorkloadType::Vm)
                .count(),
            "Rendered topology workloads"
        );

        Ok(results)
    }

    fn render_node(
        &self,
        topology: &Topology,
        node: NodeConfig,
        namespace: &str,
        name: String,
    ) -> Result<RenderResult, RenderError> {
        let classification = self.classifier.classification(&node);
        let ctx = NodeContext {
            topology: &topology.name,
            namespace,
            node: &node,
            name,
            classification: &classification,
        };

        let bundle = ConfigBundle::from_node(&node, dns_name(&[&topology.name, &node.name, "config"]))?;
        let mut resources = Vec::with_capacity(3);

        let mut workload_dependencies = Vec::new();
        if let Some(bundle) = &bundle {
            let config_map = ManagedResource::ConfigMap(bundle.to_config_map(ctx.metadata(&bundle.name)));
            workload_dependencies.push(config_map.key());
            resources.push(RenderedResource {
                resource: config_map,
                dependencies: Vec::new(),
            });
        }

        let workload = match classification.workload_type {
            WorkloadType::Container => {
                ManagedResource::Deployment(build_deployment(&ctx, bundle.as_ref()))
            }
            WorkloadType::Vm => ManagedResource::VirtualMachine(build_virtual_machine(
                &ctx,
                &topology.spec.native_execution.vm_defaults,
                bundle.as_ref(),
            )?),
        };
        let workload_key = workload.key();
        resources.push(RenderedResource {
            resource: workload,
            dependencies: workload_dependencies,
        });

        resources.push(RenderedResource {
            resource: ManagedResource::Service(build_service(&ctx)),
            dependencies: vec![workload_key],
        });

        debug!(
            node = %node.name,
            workload_type = %classification.workload_type,
            resources = resources.len(),
            "Rendered node"
        );

        Ok(RenderResult {
            workload_type: classification.workload_type,
            classification,
            resources,
            node_config: node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeOverride, ResourceSpec};

    fn lab() -> Topology {
        let mut srl = NodeDefinition::new("srl", "ghcr.io/nokia/srlinux");
        srl.env.insert("EXECUTION_MODE".to_string(), "vm".to_string());
        srl.env.insert("FOO".to_string(), "from-node".to_string());
        srl.labels.insert("team".to_string(), "core".to_string());
        srl.labels
            .insert("networksim.io/topology".to_string(), "spoofed".to_string());

        Topology::new("lab")
            .with_node("srl", srl)
            .with_node("r1", NodeDefinition::new("vyos", "vyos/vyos:1.4"))
            .with_link("srl:e1-1", "r1:eth1")
            .with_link("srl:e1-2", "r1:eth2")
    }

    #[test]
    fn test_identity_labels_win() {
        let topology = lab();
        let node = build_node_config(&topology, "srl", &topology.spec.nodes["srl"]);

        assert_eq!(node.labels["networksim.io/topology"], "lab");
        assert_eq!(node.labels["networksim.io/node"], "srl");
        assert_eq!(node.labels["networksim.io/node-kind"], "srl");
        assert_eq!(node.labels["team"], "core");
    }

    #[test]
    fn test_topology_defaults_beat_node_fields() {
        let mut topology = lab();
        topology.spec.native_execution.execution_mode = ExecutionMode::Container;
        topology.spec.native_execution.networking.cni = Some("cilium".to_string());

        let node = build_node_config(&topology, "srl", &topology.spec.nodes["srl"]);
        assert_eq!(node.environment["EXECUTION_MODE"], "container");
        assert_eq!(node.environment["NETWORKING_MODE"], "cilium");
        assert_eq!(node.labels["networksim.io/execution-mode"], "container");
        assert_eq!(node.labels["networksim.io/networking-mode"], "cilium");
    }

    #[test]
    fn test_node_override_wins() {
        let mut topology = lab();
        topology.spec.native_execution.execution_mode = ExecutionMode::Container;
        topology.spec.native_execution.resources = Some(ResourceSpec::new("500m", "512Mi"));
        topology.spec.native_execution.node_overrides.insert(
            "srl".to_string(),
            NodeOverride {
                execution_mode: ExecutionMode::Vm,
                resources: Some(ResourceSpec::new("2", "4Gi")),
                config: [("FOO".to_string(), "from-override".to_string())]
                    .into_iter()
                    .collect(),
            },
        );

        let srl = build_node_config(&topology, "srl", &topology.spec.nodes["srl"]);
        assert_eq!(srl.environment["EXECUTION_MODE"], "vm");
        assert_eq!(srl.environment["FOO"], "from-override");
        assert_eq!(srl.resources.as_ref().and_then(|r| r.request("memory")), Some("4Gi"));

        // Nodes without an override keep the topology default
        let r1 = build_node_config(&topology, "r1", &topology.spec.nodes["r1"]);
        assert_eq!(r1.environment["EXECUTION_MODE"], "container");
        assert_eq!(r1.resources.as_ref().and_then(|r| r.request("memory")), Some("512Mi"));
    }

    #[test]
    fn test_interfaces_follow_links() {
        let topology = lab();
        let node = build_node_config(&topology, "r1", &topology.spec.nodes["r1"]);

        let names: Vec<&str> = node.interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["eth1", "eth2"]);
        assert_eq!(node.interfaces[0].peer.to_string(), "srl:e1-1");
    }

    #[test]
    fn test_unlinked_node_has_no_interfaces() {
        let topology = Topology::new("lab").with_node("solo", NodeDefinition::new("linux", "alpine"));
        let node = build_node_config(&topology, "solo", &topology.spec.nodes["solo"]);
        assert!(node.interfaces.is_empty());
    }

    #[test]
    fn test_name_collision() {
        let topology = Topology::new("lab")
            .with_node("leaf_1", NodeDefinition::new("linux", "alpine"))
            .with_node("leaf-1", NodeDefinition::new("linux", "alpine"));

        let renderer = WorkloadRenderer::default();
        let err = renderer
            .render_topology_workloads(&topology, &topology.spec.nodes, "ns")
            .unwrap_err();
        assert!(matches!(err, RenderError::NameCollision { name, .. } if name == "lab-leaf-1"));
    }

    #[test]
    fn test_forced_override_reaches_render() {
        let topology = Topology::new("lab").with_node("r1", NodeDefinition::new("linux", "alpine"));
        let mut renderer = WorkloadRenderer::default();
        renderer.classifier_mut().force_vm("r1");

        let results = renderer
            .render_topology_workloads(&topology, &topology.spec.nodes, "ns")
            .unwrap();
        assert_eq!(results["r1"].workload_type, WorkloadType::Vm);
        assert!(results["r1"].resource(ResourceKind::VirtualMachine).is_some());
    }
}
