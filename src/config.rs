use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::workload::WorkloadClassifier;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_topology_path")]
    pub topology_path: String,

    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Comma-separated node names forced onto VMs
    #[serde(default)]
    pub force_vm_nodes: String,

    /// Comma-separated node names forced onto containers
    #[serde(default)]
    pub force_container_nodes: String,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_port() -> u16 {
    8080
}

fn default_namespace() -> String {
    "networksim-sim".to_string()
}

fn default_topology_path() -> String {
    "topology.yaml".to_string()
}

fn default_reconcile_interval_secs() -> u64 {
    30
}

fn default_log_format() -> String {
    "text".to_string()
}

fn node_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("NETWORKSIM"))
            .build()?;

        let settings: Config = config
            .try_deserialize()
            .unwrap_or_else(|_| Config::default());

        Ok(settings)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Register the administrator overrides. VMs first, so a node listed twice
    /// ends up a container.
    pub fn apply_overrides(&self, classifier: &mut WorkloadClassifier) {
        for node in node_list(&self.force_vm_nodes) {
            classifier.force_vm(node);
        }
        for node in node_list(&self.force_container_nodes) {
            classifier.force_container(node);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            namespace: default_namespace(),
            topology_path: default_topology_path(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            force_vm_nodes: String::new(),
            force_container_nodes: String::new(),
            log_format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkloadType;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.namespace, "networksim-sim");
        assert_eq!(config.topology_path, "topology.yaml");
        assert_eq!(config.reconcile_interval(), Duration::from_secs(30));
        assert!(!config.json_logs());
    }

    #[test]
    fn test_apply_overrides() {
        let config = Config {
            force_vm_nodes: "r1, r2,,".to_string(),
            force_container_nodes: "r2".to_string(),
            ..Default::default()
        };
        let mut classifier = WorkloadClassifier::default();
        config.apply_overrides(&mut classifier);

        assert_eq!(classifier.override_for("r1"), Some(WorkloadType::Vm));
        assert_eq!(classifier.override_for("r2"), Some(WorkloadType::Container));
        assert_eq!(classifier.override_for(""), None);
    }
}
