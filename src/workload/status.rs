//! Runtime status of node workloads, read from the live Deployment or VirtualMachine

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::DynamicObject;
use serde::Serialize;

use crate::k8s::ManagedResource;
use crate::models::WorkloadType;

pub const RUNNING: &str = "Running";
pub const PENDING: &str = "Pending";
pub const CREATING: &str = "Creating";
/// No live workload object, usually because its create failed
pub const MISSING: &str = "Missing";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub workload_type: WorkloadType,
    /// One of the phases above, or the VirtualMachine's `printableStatus`
    pub phase: String,
    pub ready: bool,
    pub message: String,
}

impl NodeStatus {
    /// Status of a node from its live workload object, if there is one
    pub fn observe(workload_type: WorkloadType, live: Option<&ManagedResource>) -> Self {
        match live {
            Some(ManagedResource::Deployment(d)) => deployment_status(d),
            Some(ManagedResource::VirtualMachine(vm)) => virtual_machine_status(vm),
            _ => Self {
                workload_type,
                phase: MISSING.to_string(),
                ready: false,
                message: format!("{} workload does not exist", workload_type),
            },
        }
    }
}

fn deployment_status(deployment: &Deployment) -> NodeStatus {
    let status = deployment.status.clone().unwrap_or_default();
    let ready = status.ready_replicas.unwrap_or(0) > 0;

    let (phase, message) = if ready {
        (RUNNING, "Deployment is running")
    } else if status.replicas.unwrap_or(0) > 0 {
        (PENDING, "Deployment is pending")
    } else {
        (CREATING, "Deployment is starting")
    };

    NodeStatus {
        workload_type: WorkloadType::Container,
        phase: phase.to_string(),
        ready,
        message: message.to_string(),
    }
}

fn virtual_machine_status(vm: &DynamicObject) -> NodeStatus {
    let status = &vm.data["status"];
    let ready = status["ready"].as_bool().unwrap_or(false);

    let (phase, message) = match status["printableStatus"].as_str() {
        _ if ready => (RUNNING, "Virtual machine is running".to_string()),
        Some(printable) => (printable, format!("Virtual machine status: {}", printable)),
        None => (CREATING, "Virtual machine is starting".to_string()),
    };

    NodeStatus {
        workload_type: WorkloadType::Vm,
        phase: phase.to_string(),
        ready,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::virtual_machine_resource;
    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use serde_json::json;

    fn deployment(replicas: i32, ready: Option<i32>) -> ManagedResource {
        ManagedResource::Deployment(Deployment {
            status: Some(DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: ready,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn vm(status: serde_json::Value) -> ManagedResource {
        let mut vm = DynamicObject::new("lab-vm1", &virtual_machine_resource());
        vm.data = json!({ "status": status });
        ManagedResource::VirtualMachine(vm)
    }

    #[test]
    fn test_deployment_phases() {
        let running = NodeStatus::observe(WorkloadType::Container, Some(&deployment(1, Some(1))));
        assert!(running.ready);
        assert_eq!(running.phase, RUNNING);

        let pending = NodeStatus::observe(WorkloadType::Container, Some(&deployment(1, None)));
        assert!(!pending.ready);
        assert_eq!(pending.phase, PENDING);

        let creating = NodeStatus::observe(WorkloadType::Container, Some(&deployment(0, None)));
        assert_eq!(creating.phase, CREATING);
    }

    #[test]
    fn test_vm_phases() {
        let running = NodeStatus::observe(WorkloadType::Vm, Some(&vm(json!({"ready": true}))));
        assert!(running.ready);
        assert_eq!(running.phase, RUNNING);

        let starting = NodeStatus::observe(
            WorkloadType::Vm,
            Some(&vm(json!({"ready": false, "printableStatus": "Starting"}))),
        );
        assert!(!starting.ready);
        assert_eq!(starting.phase, "Starting");

        let fresh = NodeStatus::observe(WorkloadType::Vm, Some(&vm(json!({}))));
        assert_eq!(fresh.phase, CREATING);
    }

    #[test]
    fn test_missing_workload() {
        let status = NodeStatus::observe(WorkloadType::Vm, None);
        assert_eq!(status.phase, MISSING);
        assert_eq!(status.workload_type, WorkloadType::Vm);
        assert!(!status.ready);
    }
}
