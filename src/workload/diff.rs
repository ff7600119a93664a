//! Semantic comparison of desired and live objects
//!
//! Live objects carry fields the API server fills in (resourceVersion, status,
//! defaulted container fields, assigned cluster IPs). Desired values are matched
//! as a subset of the live object, so those never cause an update. Fields the
//! renderer owns outright are also checked for presence: dropping one from the
//! desired object is drift.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::k8s::ManagedResource;

/// Whether every field set in `desired` holds the same value in `live`.
///
/// Objects may carry extra keys on the live side. Arrays must have the same
/// length and match element-wise. Empty objects and arrays match a missing field.
pub fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Null) | (Value::Object(d), Value::Object(_)) if d.is_empty() => {
            true
        }
        (Value::Object(d), Value::Object(l)) => d
            .iter()
            .all(|(k, v)| is_subset(v, l.get(k).unwrap_or(&Value::Null))),
        (Value::Array(d), Value::Null) => d.is_empty(),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(d, l)| is_subset(d, l))
        }
        (d, l) => d == l,
    }
}

fn subset_of<T: Serialize>(desired: &T, live: &T) -> bool {
    let desired = serde_json::to_value(desired).unwrap_or_default();
    let live = serde_json::to_value(live).unwrap_or_default();
    is_subset(&desired, &live)
}

fn map_or_empty(map: &Option<BTreeMap<String, String>>) -> BTreeMap<String, String> {
    map.clone().unwrap_or_default()
}

/// Pod and container fields the renderer owns outright. Unset in the desired
/// object means they must be unset live too.
const OWNED_POD_FIELDS: [&str; 1] = ["volumes"];
const OWNED_CONTAINER_FIELDS: [&str; 6] =
    ["command", "args", "env", "ports", "volumeMounts", "resources"];
const OWNED_RESOURCE_FIELDS: [&str; 2] = ["requests", "limits"];

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(o) => !o.is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => true,
    }
}

/// Whether `live` still holds one of `fields` that `desired` no longer sets
fn keeps_dropped(desired: &Value, live: &Value, fields: &[&str]) -> bool {
    fields
        .iter()
        .any(|field| !is_set(&desired[*field]) && is_set(&live[*field]))
}

fn container_keeps_dropped(desired: &Value, live: &Value) -> bool {
    keeps_dropped(desired, live, &OWNED_CONTAINER_FIELDS)
        || keeps_dropped(&desired["resources"], &live["resources"], &OWNED_RESOURCE_FIELDS)
}

/// Template metadata and pod spec of a Deployment, the pod spec as JSON
fn pod_template(deployment: &Deployment) -> (ObjectMeta, Value) {
    let template = deployment.spec.as_ref().map(|s| &s.template);
    let meta = template
        .and_then(|t| t.metadata.clone())
        .unwrap_or_default();
    let pod = template
        .and_then(|t| t.spec.as_ref())
        .and_then(|s| serde_json::to_value(s).ok())
        .unwrap_or_default();
    (meta, pod)
}

fn pod_drifted(desired: &Value, live: &Value) -> bool {
    if !is_subset(desired, live) || keeps_dropped(desired, live, &OWNED_POD_FIELDS) {
        return true;
    }
    // Same container count is guaranteed by the subset check
    match (desired["containers"].as_array(), live["containers"].as_array()) {
        (Some(d), Some(l)) => d
            .iter()
            .zip(l)
            .any(|(d, l)| container_keeps_dropped(d, l)),
        _ => false,
    }
}

/// Whether `live` has drifted from `desired` in a field the renderer owns
pub fn needs_update(desired: &ManagedResource, live: &ManagedResource) -> bool {
    let (dm, lm) = (desired.meta(), live.meta());
    if map_or_empty(&dm.labels) != map_or_empty(&lm.labels) {
        return true;
    }
    if !subset_of(&dm.annotations, &lm.annotations) {
        return true;
    }

    match (desired, live) {
        (ManagedResource::Deployment(d), ManagedResource::Deployment(l)) => {
            let (d_meta, d_pod) = pod_template(d);
            let (l_meta, l_pod) = pod_template(l);
            map_or_empty(&d_meta.labels) != map_or_empty(&l_meta.labels)
                || !subset_of(&d_meta.annotations, &l_meta.annotations)
                || pod_drifted(&d_pod, &l_pod)
        }
        (ManagedResource::Service(d), ManagedResource::Service(l)) => {
            let (ds, ls) = (d.spec.clone().unwrap_or_default(), l.spec.clone().unwrap_or_default());
            let service_type =
                |t: &Option<String>| t.clone().unwrap_or_else(|| "ClusterIP".to_string());
            !subset_of(&ds.ports, &ls.ports)
                || map_or_empty(&ds.selector) != map_or_empty(&ls.selector)
                || service_type(&ds.type_) != service_type(&ls.type_)
        }
        (ManagedResource::ConfigMap(d), ManagedResource::ConfigMap(l)) => {
            map_or_empty(&d.data) != map_or_empty(&l.data)
        }
        (ManagedResource::VirtualMachine(d), ManagedResource::VirtualMachine(l)) => {
            let (d_template, l_template) = (&d.data["spec"]["template"], &l.data["spec"]["template"]);
            !is_subset(&d.data["spec"], &l.data["spec"])
                || d_template["metadata"]["labels"] != l_template["metadata"]["labels"]
                || keeps_dropped(
                    &d_template["spec"]["domain"]["resources"],
                    &l_template["spec"]["domain"]["resources"],
                    &OWNED_RESOURCE_FIELDS,
                )
        }
        (ManagedResource::NetworkPolicy(d), ManagedResource::NetworkPolicy(l)) => {
            !subset_of(&d.spec, &l.spec)
        }
        _ => true,
    }
}

/// Desired object prepared for replace: keeps the live resourceVersion and, for
/// Services, the assigned cluster IPs.
pub fn carry_server_fields(desired: &ManagedResource, live: &ManagedResource) -> ManagedResource {
    let mut update = desired.clone();
    update.meta_mut().resource_version = live.meta().resource_version.clone();

    if let (ManagedResource::Service(update), ManagedResource::Service(live)) = (&mut update, live) {
        if let (Some(spec), Some(live_spec)) = (update.spec.as_mut(), live.spec.as_ref()) {
            spec.cluster_ip = live_spec.cluster_ip.clone();
            spec.cluster_ips = live_spec.cluster_ips.clone();
        }
    }

    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
    use serde_json::json;

    fn service(selector: &[(&str, &str)], cluster_ip: Option<&str>) -> ManagedResource {
        ManagedResource::Service(Service {
            metadata: ObjectMeta {
                name: Some("lab-r1".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(
                    selector
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ports: Some(vec![ServicePort {
                    name: Some("ssh".to_string()),
                    port: 22,
                    ..Default::default()
                }]),
                cluster_ip: cluster_ip.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_is_subset() {
        let desired = json!({"a": 1, "b": {"c": [1, 2]}, "empty": {}, "none": []});
        let live = json!({"a": 1, "b": {"c": [1, 2], "extra": true}, "status": {}});
        assert!(is_subset(&desired, &live));

        assert!(!is_subset(&json!({"a": 2}), &live));
        assert!(!is_subset(&json!({"b": {"c": [1]}}), &live));
        assert!(!is_subset(&json!({"missing": "x"}), &live));
        assert!(is_subset(&json!([{"name": "n"}]), &json!([{"name": "n", "protocol": "TCP"}])));
    }

    #[test]
    fn test_service_server_fields_ignored() {
        let desired = service(&[("networksim.io/node", "r1")], None);
        let mut live = service(&[("networksim.io/node", "r1")], Some("10.0.0.7"));
        if let ManagedResource::Service(s) = &mut live {
            s.metadata.resource_version = Some("42".to_string());
            let spec = s.spec.as_mut().unwrap();
            spec.type_ = Some("ClusterIP".to_string());
            spec.ports.as_mut().unwrap()[0].protocol = Some("TCP".to_string());
        }
        assert!(!needs_update(&desired, &live));
    }

    #[test]
    fn test_service_selector_change_keeps_cluster_ip() {
        let desired = service(&[("networksim.io/node", "r2")], None);
        let mut live = service(&[("networksim.io/node", "r1")], Some("10.0.0.7"));
        live.meta_mut().resource_version = Some("42".to_string());
        assert!(needs_update(&desired, &live));

        let update = carry_server_fields(&desired, &live);
        assert_eq!(update.meta().resource_version.as_deref(), Some("42"));
        match update {
            ManagedResource::Service(s) => {
                assert_eq!(s.spec.unwrap().cluster_ip.as_deref(), Some("10.0.0.7"))
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn test_label_and_annotation_rules() {
        let mut desired = service(&[], None);
        desired.meta_mut().labels = Some([("a".to_string(), "1".to_string())].into());
        desired.meta_mut().annotations = Some([("x".to_string(), "y".to_string())].into());

        let mut live = desired.clone();
        live.meta_mut()
            .annotations
            .as_mut()
            .unwrap()
            .insert("kubectl.kubernetes.io/last-applied".to_string(), "{}".to_string());
        assert!(!needs_update(&desired, &live));

        live.meta_mut()
            .labels
            .as_mut()
            .unwrap()
            .insert("b".to_string(), "2".to_string());
        assert!(needs_update(&desired, &live));
    }

    #[test]
    fn test_config_map_data_exact() {
        let cm = |data: &[(&str, &str)]| {
            ManagedResource::ConfigMap(ConfigMap {
                data: Some(
                    data.iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            })
        };
        assert!(!needs_update(&cm(&[("a", "1")]), &cm(&[("a", "1")])));
        assert!(needs_update(&cm(&[("a", "1")]), &cm(&[("a", "2")])));
        assert!(needs_update(&cm(&[("a", "1")]), &cm(&[("a", "1"), ("b", "2")])));
    }

    #[test]
    fn test_dropped_pod_fields_are_drift() {
        let desired = json!({
            "containers": [{"name": "node", "image": "alpine", "env": [{"name": "A", "value": "1"}]}],
        });
        let mut live = json!({
            "containers": [{
                "name": "node",
                "image": "alpine",
                "env": [{"name": "A", "value": "1"}],
                "terminationMessagePath": "/dev/termination-log",
            }],
            "dnsPolicy": "ClusterFirst",
        });
        assert!(!pod_drifted(&desired, &live));

        live["volumes"] = json!([{"name": "config", "configMap": {"name": "lab-r1-config"}}]);
        assert!(pod_drifted(&desired, &live));

        live["volumes"] = json!([]);
        live["containers"][0]["volumeMounts"] = json!([{"name": "config", "mountPath": "/x"}]);
        assert!(pod_drifted(&desired, &live));

        live["containers"][0]["volumeMounts"] = Value::Null;
        live["containers"][0]["resources"] = json!({"requests": {"cpu": "2"}});
        assert!(pod_drifted(&desired, &live));
    }

    #[test]
    fn test_dropped_limits_are_drift() {
        let desired = json!({"requests": {"cpu": "1"}});
        assert!(!keeps_dropped(&desired, &json!({"requests": {"cpu": "1"}}), &OWNED_RESOURCE_FIELDS));
        assert!(keeps_dropped(
            &desired,
            &json!({"requests": {"cpu": "1"}, "limits": {"cpu": "2"}}),
            &OWNED_RESOURCE_FIELDS
        ));
    }
}
