//! Workload classification
//!
//! Decides per node whether it runs as a container or a KubeVirt virtual machine.
//! Rules are tried in a fixed order and the first one that matches wins:
//!
//! 1. `EXECUTION_MODE` in the node environment (`vm`/`virtual-machine`, `container`/`pod`)
//! 2. Administrator overrides keyed by node name
//! 3. The curated image pattern table, longest pattern first
//! 4. VM image indicators, then container image indicators
//! 5. Exact node kind lookup
//! 6. Image characteristics: disk-image extensions, then known registries
//! 7. Container
//!
//! [`WorkloadClassifier::classify`] and [`WorkloadClassifier::explain`] share one
//! walk of this chain, so an explanation always names the rule that decided.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::k8s::labels::EXECUTION_MODE_ENV;
use crate::models::{NodeConfig, WorkloadType};

/// Lookup tables driving classification
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Vendor image patterns, matched case-insensitively as substrings
    pub image_patterns: BTreeMap<String, WorkloadType>,
    pub vm_image_indicators: Vec<String>,
    pub container_image_indicators: Vec<String>,
    pub vm_kinds: BTreeSet<String>,
    pub container_kinds: BTreeSet<String>,
    /// Disk image formats that only a VM can boot
    pub vm_image_extensions: Vec<String>,
    /// Registry prefixes serving VM-only images
    pub vm_registries: Vec<String>,
    /// Registry prefixes serving container images
    pub container_registries: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        use WorkloadType::{Container, Vm};

        let image_patterns = [
            ("cisco/csr1000v", Vm),
            ("cisco/iosv", Vm),
            ("cisco/iosxr", Vm),
            ("cisco/nxos", Vm),
            ("arista/veos", Vm),
            ("arista/ceos", Container),
            ("juniper/vmx", Vm),
            ("juniper/vsrx", Vm),
            ("juniper/vqfx", Vm),
            ("vyos/vyos", Vm),
            ("pfsense/pfsense", Vm),
            ("opnsense/opnsense", Vm),
            ("mikrotik/routeros", Vm),
            ("mikrotik/chr", Vm),
            ("fortinet/fortigate", Vm),
            ("nokia/srl", Container),
            ("nokia/srlinux", Container),
            ("sonic/sonic", Container),
            ("azure/sonic", Container),
            ("frr/frr", Container),
            ("quagga/quagga", Container),
            ("alpine", Container),
            ("ubuntu", Container),
            ("centos", Container),
            ("debian", Container),
        ]
        .into_iter()
        .map(|(p, t)| (p.to_string(), t))
        .collect();

        Self {
            image_patterns,
            vm_image_indicators: strings(&[
                "vmx", "vsrx", "vqfx", "veos", "csr1000v", "iosv", "iosxr", "vyos", "pfsense",
                "opnsense", "routeros", "chr", "fortigate", "vm-", "-vm", "virtual", "qemu", "kvm",
            ]),
            container_image_indicators: strings(&[
                "ceos", "srl", "srlinux", "sonic", "frr", "quagga", "alpine", "ubuntu", "centos",
                "debian", "busybox", "container", "docker", "k8s",
            ]),
            vm_kinds: [
                "csr1000v", "iosv", "iosxr", "nxos", "veos", "vmx", "vsrx", "vqfx", "vyos",
                "pfsense", "opnsense", "routeros", "chr", "fortigate", "fortios",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            container_kinds: [
                "ceos", "srl", "srlinux", "sonic", "frr", "quagga", "linux", "host", "bridge",
                "ovs",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            vm_image_extensions: strings(&["qcow2", "vmdk", "iso", "ova", "vhd"]),
            vm_registries: strings(&[
                "registry.hub.docker.com/virtualization/",
                "quay.io/kubevirt/",
                "registry.redhat.io/ubi8/",
            ]),
            container_registries: strings(&[
                "docker.io/",
                "ghcr.io/",
                "quay.io/",
                "gcr.io/",
                "registry.k8s.io/",
            ]),
        }
    }
}

/// The rule in the precedence chain that decided a classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationRule {
    ExecutionModeDirective { value: String },
    ForcedOverride,
    ImagePattern { pattern: String },
    ImageIndicator { indicator: String },
    NodeKind { kind: String },
    ImageExtension { extension: String },
    Registry { registry: String },
    Default,
}

impl fmt::Display for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationRule::ExecutionModeDirective { value } => {
                write!(f, "{} environment variable set to {}", EXECUTION_MODE_ENV, value)
            }
            ClassificationRule::ForcedOverride => write!(f, "administrator override for node"),
            ClassificationRule::ImagePattern { pattern } => {
                write!(f, "image matches known pattern {}", pattern)
            }
            ClassificationRule::ImageIndicator { indicator } => {
                write!(f, "image contains indicator {}", indicator)
            }
            ClassificationRule::NodeKind { kind } => write!(f, "node kind {}", kind),
            ClassificationRule::ImageExtension { extension } => {
                write!(f, "image looks like a {} disk", extension)
            }
            ClassificationRule::Registry { registry } => {
                write!(f, "image is served from {}", registry)
            }
            ClassificationRule::Default => write!(f, "no rule matched, using default"),
        }
    }
}

/// Verdict plus the rule that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub workload_type: WorkloadType,
    pub rule: ClassificationRule,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.workload_type, self.rule)
    }
}

/// Classifies nodes into container or VM workloads.
///
/// Owns its lookup tables and the administrator override registry. Overrides are a
/// single map per node, so forcing one type replaces any earlier force of the other.
#[derive(Debug, Clone)]
pub struct WorkloadClassifier {
    config: ClassifierConfig,
    /// `image_patterns` sorted longest first, then lexicographically
    pattern_order: Vec<(String, WorkloadType)>,
    overrides: BTreeMap<String, WorkloadType>,
}

impl Default for WorkloadClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl WorkloadClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let mut pattern_order: Vec<(String, WorkloadType)> = config
            .image_patterns
            .iter()
            .map(|(p, t)| (p.to_lowercase(), *t))
            .collect();
        pattern_order.sort_by(|(a, _), (b, _)| (Reverse(a.len()), a).cmp(&(Reverse(b.len()), b)));

        Self {
            config,
            pattern_order,
            overrides: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn force_vm(&mut self, node: &str) {
        self.overrides.insert(node.to_string(), WorkloadType::Vm);
    }

    pub fn force_container(&mut self, node: &str) {
        self.overrides.insert(node.to_string(), WorkloadType::Container);
    }

    pub fn clear_override(&mut self, node: &str) {
        self.overrides.remove(node);
    }

    pub fn override_for(&self, node: &str) -> Option<WorkloadType> {
        self.overrides.get(node).copied()
    }

    pub fn classify(&self, node: &NodeConfig) -> WorkloadType {
        let classification = self.classification(node);
        debug!(
            node = %node.name,
            workload_type = %classification.workload_type,
            rule = %classification.rule,
            "Classified node"
        );
        classification.workload_type
    }

    /// Human-readable account of which rule decided the node's workload type
    pub fn explain(&self, node: &NodeConfig) -> String {
        self.classification(node).to_string()
    }

    pub fn classification(&self, node: &NodeConfig) -> Classification {
        let decided = |workload_type, rule| Classification {
            workload_type,
            rule,
        };

        if let Some((workload_type, value)) = self.execution_directive(node) {
            return decided(
                workload_type,
                ClassificationRule::ExecutionModeDirective { value },
            );
        }

        if let Some(workload_type) = self.override_for(&node.name) {
            return decided(workload_type, ClassificationRule::ForcedOverride);
        }

        let image = node.image.to_lowercase();

        if let Some((pattern, workload_type)) = self
            .pattern_order
            .iter()
            .find(|(pattern, _)| image.contains(pattern.as_str()))
        {
            return decided(
                *workload_type,
                ClassificationRule::ImagePattern {
                    pattern: pattern.clone(),
                },
            );
        }

        let indicator_lists = [
            (&self.config.vm_image_indicators, WorkloadType::Vm),
            (&self.config.container_image_indicators, WorkloadType::Container),
        ];
        for (indicators, workload_type) in indicator_lists {
            if let Some(indicator) = indicators.iter().find(|i| image.contains(i.as_str())) {
                return decided(
                    workload_type,
                    ClassificationRule::ImageIndicator {
                        indicator: indicator.clone(),
                    },
                );
            }
        }

        let kind = node.kind.to_lowercase();
        if self.config.vm_kinds.contains(&kind) {
            return decided(WorkloadType::Vm, ClassificationRule::NodeKind { kind });
        }
        if self.config.container_kinds.contains(&kind) {
            return decided(WorkloadType::Container, ClassificationRule::NodeKind { kind });
        }

        if let Some(extension) = self
            .config
            .vm_image_extensions
            .iter()
            .find(|ext| image.contains(ext.as_str()))
        {
            return decided(
                WorkloadType::Vm,
                ClassificationRule::ImageExtension {
                    extension: extension.clone(),
                },
            );
        }

        let registry_lists = [
            (&self.config.vm_registries, WorkloadType::Vm),
            (&self.config.container_registries, WorkloadType::Container),
        ];
        for (registries, workload_type) in registry_lists {
            if let Some(registry) = registries.iter().find(|r| image.starts_with(r.as_str())) {
                return decided(
                    workload_type,
                    ClassificationRule::Registry {
                        registry: registry.clone(),
                    },
                );
            }
        }

        decided(WorkloadType::Container, ClassificationRule::Default)
    }

    fn execution_directive(&self, node: &NodeConfig) -> Option<(WorkloadType, String)> {
        let value = node.environment.get(EXECUTION_MODE_ENV)?;
        let workload_type = match value.trim().to_lowercase().as_str() {
            "vm" | "virtual-machine" => WorkloadType::Vm,
            "container" | "pod" => WorkloadType::Container,
            _ => return None,
        };
        Some((workload_type, value.clone()))
    }

    /// Image patterns and kinds known to resolve to a VM
    pub fn supported_vm_kinds(&self) -> Vec<String> {
        self.known_kinds(WorkloadType::Vm)
    }

    /// Image patterns and kinds known to resolve to a container
    pub fn supported_container_kinds(&self) -> Vec<String> {
        self.known_kinds(WorkloadType::Container)
    }

    fn known_kinds(&self, workload_type: WorkloadType) -> Vec<String> {
        let kinds = match workload_type {
            WorkloadType::Vm => &self.config.vm_kinds,
            WorkloadType::Container => &self.config.container_kinds,
        };

        self.config
            .image_patterns
            .iter()
            .filter(|(_, t)| **t == workload_type)
            .map(|(p, _)| p)
            .chain(kinds)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
