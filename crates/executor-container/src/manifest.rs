//! Pod manifests submitted for each command.

use crate::container_executor::KubernetesConfig;
use serde_json::{json, Map, Value};

/// Label key every pod carries; its value is the pod name, so a watch can
/// select exactly one pod.
pub const POD_LABEL: &str = "name";

const CONTAINER_NAME: &str = "task";

/// Pod name `<prefix>-<8 hex>`.
pub fn pod_name(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

/// A single-container pod running `sh -c <command>` once.
pub fn pod_manifest(config: &KubernetesConfig, pod_name: &str, command: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": pod_name,
            "namespace": config.namespace,
            "labels": { POD_LABEL: pod_name },
        },
        "spec": {
            "restartPolicy": "Never",
            "dnsPolicy": "Default",
            "terminationGracePeriodSeconds": 0,
            "hostNetwork": config.host_network,
            "containers": [{
                "name": CONTAINER_NAME,
                "image": config.image,
                "imagePullPolicy": "IfNotPresent",
                "command": ["sh", "-c", command],
                "resources": resources(config),
                "securityContext": { "privileged": config.privileged },
            }],
        },
    })
}

fn resources(config: &KubernetesConfig) -> Value {
    let mut requests = Map::new();
    let mut limits = Map::new();
    if config.cpu_request > 0 {
        requests.insert("cpu".into(), format!("{}m", config.cpu_request).into());
    }
    if config.memory_request > 0 {
        requests.insert("memory".into(), config.memory_request.to_string().into());
    }
    if config.cpu_limit > 0 {
        limits.insert("cpu".into(), format!("{}m", config.cpu_limit).into());
    }
    if config.memory_limit > 0 {
        limits.insert("memory".into(), config.memory_limit.to_string().into());
    }

    let mut resources = Map::new();
    if !requests.is_empty() {
        resources.insert("requests".into(), Value::Object(requests));
    }
    if !limits.is_empty() {
        resources.insert("limits".into(), Value::Object(limits));
    }
    Value::Object(resources)
}
