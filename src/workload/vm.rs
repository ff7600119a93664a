//! KubeVirt VirtualMachine manifests
//!
//! The VirtualMachine API belongs to an external operator, so the manifest is
//! assembled as JSON and carried as a `DynamicObject`.

use kube::api::DynamicObject;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::files::{ConfigBundle, CONFIG_VOLUME, STARTUP_CONFIG_PATH};
use super::renderer::NodeContext;
use crate::error::RenderError;
use crate::models::{NodeConfig, VmDefaults};

const BASE_MEMORY: &str = "1Gi";
const BASE_CPU: &str = "1";

/// Memory and CPU handed to the VM domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmResources {
    pub memory: String,
    pub cpu: String,
    pub limits: BTreeMap<String, String>,
}

/// Heavier defaults for router and firewall images known to need them
fn kind_profile(kind: &str) -> Option<(&'static str, &'static str)> {
    match kind.to_lowercase().as_str() {
        "vyos" | "opnsense" | "pfsense" => Some(("2Gi", "2")),
        "csr1000v" | "vmx" => Some(("4Gi", "2")),
        _ => None,
    }
}

/// Explicit node requests, then topology VM defaults, then the kind table, then 1Gi / 1 CPU
pub fn resource_profile(node: &NodeConfig, defaults: &VmDefaults) -> VmResources {
    let requested = node.resources.as_ref();
    let by_kind = kind_profile(&node.kind);

    let memory = requested
        .and_then(|r| r.request("memory"))
        .or(defaults.memory.as_deref())
        .or(by_kind.map(|(memory, _)| memory))
        .unwrap_or(BASE_MEMORY);
    let cpu = requested
        .and_then(|r| r.request("cpu"))
        .or(defaults.cpu.as_deref())
        .or(by_kind.map(|(_, cpu)| cpu))
        .unwrap_or(BASE_CPU);

    VmResources {
        memory: memory.to_string(),
        cpu: cpu.to_string(),
        limits: requested.map(|r| r.limits.clone()).unwrap_or_default(),
    }
}

#[derive(Serialize)]
struct CloudConfig<'a> {
    hostname: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: &'a Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    write_files: Vec<WriteFile<'a>>,
}

#[derive(Serialize)]
struct WriteFile<'a> {
    path: &'a str,
    content: &'a str,
    permissions: &'a str,
}

/// `#cloud-config` user data: hostname, authorized keys and the startup config
pub fn cloud_init_user_data(
    hostname: &str,
    node: &NodeConfig,
    defaults: &VmDefaults,
) -> Result<String, serde_yaml::Error> {
    let write_files = node
        .startup_config
        .as_deref()
        .map(|content| WriteFile {
            path: STARTUP_CONFIG_PATH,
            content,
            permissions: "0644",
        })
        .into_iter()
        .collect();

    let config = CloudConfig {
        hostname,
        ssh_authorized_keys: &defaults.ssh_authorized_keys,
        write_files,
    };

    Ok(format!("#cloud-config\n{}", serde_yaml::to_string(&config)?))
}

pub fn build_virtual_machine(
    ctx: &NodeContext<'_>,
    defaults: &VmDefaults,
    bundle: Option<&ConfigBundle>,
) -> Result<DynamicObject, RenderError> {
    let node = ctx.node;
    let hostname = ctx.hostname();
    let profile = resource_profile(node, defaults);

    let user_data =
        cloud_init_user_data(&hostname, node, defaults).map_err(|source| RenderError::CloudInit {
            node: node.name.clone(),
            source,
        })?;

    let mut template_labels = ctx.labels();
    template_labels.insert("kubevirt.io/vm".to_string(), ctx.name.clone());

    let mut disks = vec![
        json!({"name": "containerdisk", "disk": {"bus": "virtio"}}),
        json!({"name": "cloudinitdisk", "disk": {"bus": "virtio"}}),
    ];
    let mut volumes = vec![
        json!({"name": "containerdisk", "containerDisk": {"image": node.image}}),
        json!({"name": "cloudinitdisk", "cloudInitNoCloud": {"userData": user_data}}),
    ];
    if let Some(bundle) = bundle {
        disks.push(json!({"name": CONFIG_VOLUME, "serial": "NSCONFIG", "disk": {"bus": "virtio"}}));
        volumes.push(json!({"name": CONFIG_VOLUME, "configMap": {"name": bundle.name}}));
    }

    let mut interfaces = vec![json!({"name": "default", "masquerade": {}})];
    let mut networks = vec![json!({"name": "default", "pod": {}})];
    for index in 1..=node.interfaces.len() {
        let name = format!("net{}", index);
        interfaces.push(json!({"name": name, "bridge": {}}));
        networks.push(json!({
            "name": name,
            "multus": {"networkName": format!("{}-{}", ctx.name, name)},
        }));
    }

    let mut resources = json!({
        "requests": {"memory": profile.memory, "cpu": profile.cpu},
    });
    if !profile.limits.is_empty() {
        resources["limits"] = json!(profile.limits);
    }

    let manifest: Value = json!({
        "apiVersion": "kubevirt.io/v1",
        "kind": "VirtualMachine",
        "metadata": {
            "name": ctx.name,
            "namespace": ctx.namespace,
            "labels": ctx.labels(),
            "annotations": ctx.workload_annotations(),
        },
        "spec": {
            "running": true,
            "template": {
                "metadata": {"labels": template_labels},
                "spec": {
                    "hostname": hostname,
                    "domain": {
                        "devices": {"disks": disks, "interfaces": interfaces},
                        "resources": resources,
                    },
                    "networks": networks,
                    "volumes": volumes,
                },
            },
        },
    });

    serde_json::from_value(manifest).map_err(|source| RenderError::Manifest {
        node: node.name.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceSpec;

    #[test]
    fn test_resource_profile_by_kind() {
        let defaults = VmDefaults::default();

        let base = resource_profile(&NodeConfig::new("a", "x").with_kind("unknown"), &defaults);
        assert_eq!((base.memory.as_str(), base.cpu.as_str()), ("1Gi", "1"));

        let vyos = resource_profile(&NodeConfig::new("a", "x").with_kind("vyos"), &defaults);
        assert_eq!((vyos.memory.as_str(), vyos.cpu.as_str()), ("2Gi", "2"));

        let csr = resource_profile(&NodeConfig::new("a", "x").with_kind("CSR1000v"), &defaults);
        assert_eq!((csr.memory.as_str(), csr.cpu.as_str()), ("4Gi", "2"));
    }

    #[test]
    fn test_resource_profile_precedence() {
        let defaults = VmDefaults {
            memory: Some("3Gi".to_string()),
            cpu: None,
            ssh_authorized_keys: vec![],
        };

        // Topology defaults beat the kind table, per field
        let node = NodeConfig::new("a", "x").with_kind("csr1000v");
        let profile = resource_profile(&node, &defaults);
        assert_eq!((profile.memory.as_str(), profile.cpu.as_str()), ("3Gi", "2"));

        // Explicit requests beat everything
        let mut node = NodeConfig::new("a", "x").with_kind("csr1000v");
        let mut spec = ResourceSpec::new("4", "8Gi");
        spec.limits.insert("memory".to_string(), "8Gi".to_string());
        node.resources = Some(spec);
        let profile = resource_profile(&node, &defaults);
        assert_eq!((profile.memory.as_str(), profile.cpu.as_str()), ("8Gi", "4"));
        assert_eq!(profile.limits["memory"], "8Gi");
    }

    #[test]
    fn test_cloud_init_user_data() {
        let mut node = NodeConfig::new("r1", "vyos/vyos");
        node.startup_config = Some("set system host-name r1\n".to_string());
        let defaults = VmDefaults {
            ssh_authorized_keys: vec!["ssh-ed25519 AAAA admin".to_string()],
            ..Default::default()
        };

        let user_data = cloud_init_user_data("lab-r1", &node, &defaults).unwrap();
        assert!(user_data.starts_with("#cloud-config\n"));

        let parsed: serde_yaml::Value =
            serde_yaml::from_str(user_data.trim_start_matches("#cloud-config\n")).unwrap();
        assert_eq!(parsed["hostname"], "lab-r1");
        assert_eq!(parsed["ssh_authorized_keys"][0], "ssh-ed25519 AAAA admin");
        assert_eq!(parsed["write_files"][0]["path"], STARTUP_CONFIG_PATH);
        assert_eq!(
            parsed["write_files"][0]["content"],
            "set system host-name r1\n"
        );
    }

    #[test]
    fn test_cloud_init_minimal() {
        let node = NodeConfig::new("r1", "vyos/vyos");
        let user_data = cloud_init_user_data("r1", &node, &VmDefaults::default()).unwrap();
        assert_eq!(user_data, "#cloud-config\nhostname: r1\n");
    }
}
