//! Per-node configuration consumed by the workload renderer

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::{AsRefStr, Display, EnumString};

use crate::error::TopologyError;

/// Execution substrate chosen for a node
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkloadType {
    Container,
    Vm,
}

/// Execution mode requested by a topology or a node override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Auto,
    Container,
    Vm,
}

impl ExecutionMode {
    /// The workload type this mode pins, if any
    pub fn workload_type(self) -> Option<WorkloadType> {
        match self {
            ExecutionMode::Auto => None,
            ExecutionMode::Container => Some(WorkloadType::Container),
            ExecutionMode::Vm => Some(WorkloadType::Vm),
        }
    }
}

/// One side of a topology link, written `node:interface`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    pub node: String,
    pub interface: String,
}

impl NetworkEndpoint {
    pub fn parse(raw: &str) -> Result<Self, TopologyError> {
        match raw.split_once(':') {
            Some((node, interface)) if !node.is_empty() && !interface.is_empty() => Ok(Self {
                node: node.to_string(),
                interface: interface.to_string(),
            }),
            _ => Err(TopologyError::InvalidEndpoint(raw.to_string())),
        }
    }
}

impl fmt::Display for NetworkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

/// A data-plane interface of a node, in link declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    /// Remote end of the link this interface belongs to
    pub peer: NetworkEndpoint,
}

/// CPU and memory requests/limits, keyed by resource name (`cpu`, `memory`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

impl ResourceSpec {
    pub fn new(cpu: &str, memory: &str) -> Self {
        Self {
            requests: [
                ("cpu".to_string(), cpu.to_string()),
                ("memory".to_string(), memory.to_string()),
            ]
            .into_iter()
            .collect(),
            limits: BTreeMap::new(),
        }
    }

    pub fn request(&self, name: &str) -> Option<&str> {
        self.requests.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }

    pub fn to_requirements(&self) -> ResourceRequirements {
        fn quantities(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
            if map.is_empty() {
                return None;
            }
            Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                    .collect(),
            )
        }

        ResourceRequirements {
            requests: quantities(&self.requests),
            limits: quantities(&self.limits),
            ..Default::default()
        }
    }
}

/// Canonical per-node input to rendering.
///
/// Built fresh every pass from the topology spec and never mutated once handed
/// to a manifest builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub image: String,
    pub kind: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
    #[serde(default)]
    pub startup_config: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Whether the node carries any content for a config bundle
    pub fn has_config_content(&self) -> bool {
        self.startup_config.is_some() || !self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let ep = NetworkEndpoint::parse("r1:eth1").unwrap();
        assert_eq!(ep.node, "r1");
        assert_eq!(ep.interface, "eth1");
        assert_eq!(ep.to_string(), "r1:eth1");

        // Only the first colon separates node from interface
        let ep = NetworkEndpoint::parse("srl:e1-1:0").unwrap();
        assert_eq!(ep.node, "srl");
        assert_eq!(ep.interface, "e1-1:0");
    }

    #[test]
    fn test_parse_endpoint_rejects_malformed() {
        assert!(NetworkEndpoint::parse("r1").is_err());
        assert!(NetworkEndpoint::parse(":eth1").is_err());
        assert!(NetworkEndpoint::parse("r1:").is_err());
    }

    #[test]
    fn test_workload_type_strings() {
        assert_eq!(WorkloadType::Vm.to_string(), "vm");
        assert_eq!(WorkloadType::Container.as_ref(), "container");
        assert_eq!("vm".parse::<WorkloadType>().unwrap(), WorkloadType::Vm);
        assert_eq!(
            serde_json::to_string(&WorkloadType::Container).unwrap(),
            "\"container\""
        );
    }

    #[test]
    fn test_execution_mode_pins_workload_type() {
        assert_eq!(ExecutionMode::Auto.workload_type(), None);
        assert_eq!(ExecutionMode::Vm.workload_type(), Some(WorkloadType::Vm));
        let mode: ExecutionMode = serde_yaml::from_str("container").unwrap();
        assert_eq!(mode, ExecutionMode::Container);
    }

    #[test]
    fn test_resource_spec_to_requirements() {
        let spec = ResourceSpec::new("2", "4Gi");
        let req = spec.to_requirements();
        let requests = req.requests.unwrap();
        assert_eq!(requests.get("cpu"), Some(&Quantity("2".to_string())));
        assert_eq!(requests.get("memory"), Some(&Quantity("4Gi".to_string())));
        assert!(req.limits.is_none());
        assert!(ResourceSpec::default().is_empty());
    }
}
