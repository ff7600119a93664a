//! Label contract shared by every topology-owned resource
//!
//! The topology and node labels are what network policies, services and the UI
//! select on; changing them orphans existing resources.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "networksim";
pub const TOPOLOGY_LABEL: &str = "networksim.io/topology";
pub const NODE_LABEL: &str = "networksim.io/node";
pub const NODE_KIND_LABEL: &str = "networksim.io/node-kind";
pub const WORKLOAD_TYPE_LABEL: &str = "networksim.io/workload-type";
pub const EXECUTION_MODE_LABEL: &str = "networksim.io/execution-mode";
pub const NETWORKING_MODE_LABEL: &str = "networksim.io/networking-mode";
pub const POLICY_TYPE_LABEL: &str = "networksim.io/policy-type";

/// Annotation recording which classification rule picked the workload type
pub const CLASSIFICATION_ANNOTATION: &str = "networksim.io/classification";

/// Environment keys read by the classifier
pub const EXECUTION_MODE_ENV: &str = "EXECUTION_MODE";
pub const NETWORKING_MODE_ENV: &str = "NETWORKING_MODE";

const MAX_NAME_LEN: usize = 63;

/// Identity labels for a topology node. These always win over user labels.
pub fn topology_labels(topology: &str, node: &str) -> BTreeMap<String, String> {
    [
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (TOPOLOGY_LABEL.to_string(), topology.to_string()),
        (NODE_LABEL.to_string(), node.to_string()),
    ]
    .into_iter()
    .collect()
}

/// Minimal stable label set selecting one node's pods
pub fn node_selector(topology: &str, node: &str) -> BTreeMap<String, String> {
    [
        (TOPOLOGY_LABEL.to_string(), topology.to_string()),
        (NODE_LABEL.to_string(), node.to_string()),
    ]
    .into_iter()
    .collect()
}

/// Label selector string listing everything a topology owns
pub fn topology_selector(topology: &str) -> String {
    format!("{}={}", TOPOLOGY_LABEL, topology)
}

/// Whether an object carries the owner label of `topology`
pub fn is_owned_by(meta: &ObjectMeta, topology: &str) -> bool {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(TOPOLOGY_LABEL))
        .is_some_and(|owner| owner == topology)
}

/// DNS-1035 label built from arbitrary name parts
pub fn dns_name(parts: &[&str]) -> String {
    let joined = parts.join("-").to_lowercase();
    let mut name: String = joined
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        name.insert_str(0, "ns-");
    }
    name.truncate(MAX_NAME_LEN);
    name.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_labels() {
        let labels = topology_labels("lab", "r1");

        assert_eq!(labels.get(TOPOLOGY_LABEL), Some(&"lab".to_string()));
        assert_eq!(labels.get(NODE_LABEL), Some(&"r1".to_string()));
        assert_eq!(
            labels.get(MANAGED_BY_LABEL),
            Some(&"networksim".to_string())
        );
    }

    #[test]
    fn test_topology_selector() {
        assert_eq!(topology_selector("lab"), "networksim.io/topology=lab");
    }

    #[test]
    fn test_is_owned_by() {
        let meta = ObjectMeta {
            labels: Some(topology_labels("lab", "r1")),
            ..Default::default()
        };
        assert!(is_owned_by(&meta, "lab"));
        assert!(!is_owned_by(&meta, "other"));
        assert!(!is_owned_by(&ObjectMeta::default(), "lab"));
    }

    #[test]
    fn test_dns_name() {
        assert_eq!(dns_name(&["lab", "R1"]), "lab-r1");
        assert_eq!(dns_name(&["lab", "leaf_1.dc"]), "lab-leaf-1-dc");
        assert_eq!(dns_name(&["1lab", "r1"]), "ns-1lab-r1");

        let long = "x".repeat(80);
        let name = dns_name(&["lab", &long]);
        assert_eq!(name.len(), 63);
    }
}
