use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::warn;

use super::node::{ExecutionMode, NetworkEndpoint, ResourceSpec};
use crate::error::TopologyError;

/// Link endpoints that name containerlab host-side attachments rather than topology nodes
pub const SPECIAL_ENDPOINT_NODES: &[&str] = &["host", "mgmt-net", "macvlan"];

/// A network topology, already parsed from its containerlab-style definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub name: String,
    #[serde(default)]
    pub spec: TopologySpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySpec {
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeDefinition>,
    #[serde(default)]
    pub links: Vec<LinkDefinition>,
    #[serde(default)]
    pub native_execution: NativeExecution,
}

/// Containerlab node fields the native execution path understands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, rename = "startup-config")]
    pub startup_config: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl NodeDefinition {
    pub fn new(kind: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            image: image.into(),
            ..Default::default()
        }
    }
}

/// A point-to-point link, endpoints written `node:interface`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDefinition {
    pub endpoints: Vec<String>,
}

impl LinkDefinition {
    pub fn new(a: &str, b: &str) -> Self {
        Self {
            endpoints: vec![a.to_string(), b.to_string()],
        }
    }

    /// Both endpoints, or `None` when the link is not a well-formed pair
    pub fn pair(&self) -> Option<(NetworkEndpoint, NetworkEndpoint)> {
        match self.endpoints.as_slice() {
            [a, b] => Some((NetworkEndpoint::parse(a).ok()?, NetworkEndpoint::parse(b).ok()?)),
            _ => None,
        }
    }
}

/// Topology-level settings for native (non Docker-in-Docker) execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeExecution {
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub networking: NetworkingConfig,
    /// Default resources for every node
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
    #[serde(default)]
    pub node_overrides: BTreeMap<String, NodeOverride>,
    #[serde(default)]
    pub vm_defaults: VmDefaults,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkingConfig {
    /// CNI providing connectivity, e.g. `cilium`
    #[serde(default)]
    pub cni: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOverride {
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
    /// Extra environment entries for the node
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDefaults {
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub ssh_authorized_keys: Vec<String>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: TopologySpec::default(),
        }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, TopologyError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn with_node(mut self, name: &str, definition: NodeDefinition) -> Self {
        self.spec.nodes.insert(name.to_string(), definition);
        self
    }

    pub fn with_link(mut self, a: &str, b: &str) -> Self {
        self.spec.links.push(LinkDefinition::new(a, b));
        self
    }

    /// Well-formed links, in declaration order. Malformed ones are skipped.
    pub fn endpoint_pairs(&self) -> Vec<(NetworkEndpoint, NetworkEndpoint)> {
        self.spec
            .links
            .iter()
            .filter_map(|link| {
                let pair = link.pair();
                if pair.is_none() {
                    warn!(topology = %self.name, endpoints = ?link.endpoints, "Ignoring malformed link");
                }
                pair
            })
            .collect()
    }

    /// Validate links against the declared nodes
    pub fn validate(&self) -> Result<(), TopologyError> {
        let pairs: Vec<(NetworkEndpoint, NetworkEndpoint)> = self
            .spec
            .links
            .iter()
            .map(|link| match link.endpoints.as_slice() {
                [a, b] => Ok((NetworkEndpoint::parse(a)?, NetworkEndpoint::parse(b)?)),
                other => Err(TopologyError::InvalidEndpoint(other.join(","))),
            })
            .collect::<Result<_, _>>()?;

        let mut used: BTreeSet<&NetworkEndpoint> = BTreeSet::new();
        for (a, b) in &pairs {
            for ep in [a, b] {
                let special = SPECIAL_ENDPOINT_NODES.contains(&ep.node.as_str());
                if !special && !self.spec.nodes.contains_key(&ep.node) {
                    return Err(TopologyError::UnknownNode(ep.node.clone()));
                }
                if !special && !used.insert(ep) {
                    return Err(TopologyError::DuplicateInterface {
                        node: ep.node.clone(),
                        interface: ep.interface.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
