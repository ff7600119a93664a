//! Container workload manifests: Deployment and the per-node Service

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, SecurityContext,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::files::ConfigBundle;
use super::renderer::NodeContext;

/// Management ports every node exposes
pub const MANAGEMENT_PORTS: [(&str, i32); 3] = [("ssh", 22), ("netconf", 830), ("gnmi", 57400)];

pub const NODE_CONTAINER: &str = "node";

/// Env names set by the renderer; node environment cannot replace them
const RESERVED_ENV: [&str; 2] = ["NODE_NAME", "TOPOLOGY_NAME"];

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn build_env_vars(ctx: &NodeContext<'_>) -> Vec<EnvVar> {
    let mut env_vars = vec![
        env_var("NODE_NAME", &ctx.node.name),
        env_var("TOPOLOGY_NAME", ctx.topology),
    ];

    env_vars.extend(
        ctx.node
            .environment
            .iter()
            .filter(|(k, _)| !RESERVED_ENV.contains(&k.as_str()))
            .map(|(k, v)| env_var(k, v)),
    );

    env_vars
}

/// Single-replica Deployment. Recreate strategy: a node must never run twice.
pub fn build_deployment(ctx: &NodeContext<'_>, bundle: Option<&ConfigBundle>) -> Deployment {
    let labels = ctx.labels();

    let container = Container {
        name: NODE_CONTAINER.to_string(),
        image: Some(ctx.node.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(build_env_vars(ctx)),
        ports: Some(
            MANAGEMENT_PORTS
                .iter()
                .map(|(name, port)| ContainerPort {
                    name: Some(name.to_string()),
                    container_port: *port,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        resources: ctx.node.resources.as_ref().map(|r| r.to_requirements()),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["NET_ADMIN".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: bundle.map(ConfigBundle::volume_mounts),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            annotations: Some(ctx.workload_annotations()),
            ..ctx.metadata(&ctx.name)
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(ctx.selector()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(ctx.node.annotations.clone()).filter(|a| !a.is_empty()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    hostname: Some(ctx.hostname()),
                    containers: vec![container],
                    volumes: bundle.map(|b| vec![b.volume()]),
                    restart_policy: Some("Always".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ClusterIP Service selecting the node by its topology and node labels
pub fn build_service(ctx: &NodeContext<'_>) -> Service {
    Service {
        metadata: ctx.metadata(&ctx.name),
        spec: Some(ServiceSpec {
            selector: Some(ctx.selector()),
            ports: Some(
                MANAGEMENT_PORTS
                    .iter()
                    .map(|(name, port)| ServicePort {
                        name: Some(name.to_string()),
                        port: *port,
                        target_port: Some(IntOrString::Int(*port)),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
