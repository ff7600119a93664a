//! Config bundle: startup configuration and node files shipped as one ConfigMap

use k8s_openapi::api::core::v1::{ConfigMap, ConfigMapVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use crate::error::RenderError;
use crate::models::NodeConfig;

pub const STARTUP_CONFIG_KEY: &str = "startup-config";
pub const STARTUP_CONFIG_PATH: &str = "/etc/networksim/startup-config";
pub const FILES_DIR: &str = "/etc/networksim/files";
pub const CONFIG_VOLUME: &str = "node-config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub mount_path: String,
    pub content: String,
}

/// ConfigMap contents for one node, with where each key is mounted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBundle {
    pub name: String,
    pub entries: Vec<ConfigEntry>,
}

/// ConfigMap key for a file path. Keys may only hold `[-._a-zA-Z0-9]`.
pub fn config_key(path: &str) -> String {
    path.trim_start_matches('/')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn mount_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", FILES_DIR, path)
    }
}

impl ConfigBundle {
    /// Bundle a node's startup config and files. `None` when there is nothing to ship.
    pub fn from_node(node: &NodeConfig, name: String) -> Result<Option<Self>, RenderError> {
        if !node.has_config_content() {
            return Ok(None);
        }

        let mut entries = Vec::new();
        let mut sources: BTreeMap<String, String> = BTreeMap::new();

        if let Some(startup) = &node.startup_config {
            sources.insert(STARTUP_CONFIG_KEY.to_string(), STARTUP_CONFIG_KEY.to_string());
            entries.push(ConfigEntry {
                key: STARTUP_CONFIG_KEY.to_string(),
                mount_path: STARTUP_CONFIG_PATH.to_string(),
                content: startup.clone(),
            });
        }

        for (path, content) in &node.files {
            let key = config_key(path);
            if let Some(first) = sources.insert(key.clone(), path.clone()) {
                return Err(RenderError::ConfigKeyCollision {
                    node: node.name.clone(),
                    key,
                    first,
                    second: path.clone(),
                });
            }
            entries.push(ConfigEntry {
                key,
                mount_path: mount_path(path),
                content: content.clone(),
            });
        }

        Ok(Some(Self { name, entries }))
    }

    pub fn data(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.key.clone(), e.content.clone()))
            .collect()
    }

    pub fn to_config_map(&self, metadata: ObjectMeta) -> ConfigMap {
        ConfigMap {
            metadata,
            data: Some(self.data()),
            ..Default::default()
        }
    }

    pub fn volume(&self) -> Volume {
        Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(self.name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// One read-only subPath mount per entry
    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.entries
            .iter()
            .map(|e| VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: e.mount_path.clone(),
                sub_path: Some(e.key.clone()),
                read_only: Some(true),
                ..Default::default()
            })
            .collect()
    }
}
