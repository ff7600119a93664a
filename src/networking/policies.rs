//! NetworkPolicy builders
//!
//! Links are enforced as policies: each node may talk only to the nodes it is linked
//! to, plus DNS. A node without links is isolated apart from DNS egress.

use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::{BTreeMap, BTreeSet};

use crate::k8s::labels::{
    dns_name, node_selector, topology_labels, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
    POLICY_TYPE_LABEL, TOPOLOGY_LABEL,
};
use crate::models::Topology;
use crate::workload::container::MANAGEMENT_PORTS;

pub const LINKS_POLICY: &str = "links";
pub const MANAGEMENT_POLICY: &str = "management";

/// Topology nodes linked to `node`, excluding itself and special endpoints
pub fn linked_peers(topology: &Topology, node: &str) -> BTreeSet<String> {
    topology
        .endpoint_pairs()
        .into_iter()
        .filter_map(|(a, b)| {
            if a.node == node {
                Some(b.node)
            } else if b.node == node {
                Some(a.node)
            } else {
                None
            }
        })
        .filter(|peer| peer != node && topology.spec.nodes.contains_key(peer))
        .collect()
}

fn tcp_udp_port(port: i32, protocol: &str) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::Int(port)),
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}

fn dns_egress() -> NetworkPolicyEgressRule {
    NetworkPolicyEgressRule {
        to: None,
        ports: Some(vec![tcp_udp_port(53, "UDP"), tcp_udp_port(53, "TCP")]),
    }
}

/// Policy restricting `node` to its linked peers
pub fn link_policy(
    topology: &str,
    node: &str,
    peers: &BTreeSet<String>,
    namespace: &str,
) -> NetworkPolicy {
    let mut labels = topology_labels(topology, node);
    labels.insert(POLICY_TYPE_LABEL.to_string(), LINKS_POLICY.to_string());

    let peer_selectors: Vec<NetworkPolicyPeer> = peers
        .iter()
        .map(|peer| NetworkPolicyPeer {
            pod_selector: Some(LabelSelector {
                match_labels: Some(node_selector(topology, peer)),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    // No ports on peer rules: every protocol, ICMP included
    let mut ingress = Vec::new();
    let mut egress = vec![dns_egress()];
    if !peer_selectors.is_empty() {
        ingress.push(NetworkPolicyIngressRule {
            from: Some(peer_selectors.clone()),
            ports: None,
        });
        egress.push(NetworkPolicyEgressRule {
            to: Some(peer_selectors),
            ports: None,
        });
    }

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(dns_name(&[topology, node, LINKS_POLICY])),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector {
                match_labels: Some(node_selector(topology, node)),
                ..Default::default()
            },
            ingress: Some(ingress),
            egress: Some(egress),
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
        }),
    }
}

/// Topology-wide policy admitting management traffic to every node
pub fn management_policy(topology: &str, namespace: &str) -> NetworkPolicy {
    let labels: BTreeMap<String, String> = [
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (TOPOLOGY_LABEL.to_string(), topology.to_string()),
        (POLICY_TYPE_LABEL.to_string(), MANAGEMENT_POLICY.to_string()),
    ]
    .into_iter()
    .collect();

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(dns_name(&[topology, MANAGEMENT_POLICY])),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector {
                match_labels: Some(
                    [(TOPOLOGY_LABEL.to_string(), topology.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: None,
                ports: Some(
                    MANAGEMENT_PORTS
                        .iter()
                        .map(|(_, port)| tcp_udp_port(*port, "TCP"))
                        .collect(),
                ),
            }]),
            egress: None,
            policy_types: Some(vec!["Ingress".to_string()]),
        }),
    }
}
