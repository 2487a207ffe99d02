// ABOUTME: Renders a deployment spec and artifact into cluster desired state.
// ABOUTME: Produces a multi-document YAML manifest: Deployment, Service and optional Ingress.

use serde_json::{Map, Value, json};

use super::builder::BuildArtifact;
use super::spec::DeploymentSpec;
use crate::config::ResourceQuantities;

const MANAGED_BY: &str = "conveyor";

fn quantities(q: &ResourceQuantities) -> Value {
    let mut map = Map::new();
    if let Some(ref cpu) = q.cpu {
        map.insert("cpu".to_string(), Value::String(cpu.clone()));
    }
    if let Some(ref memory) = q.memory {
        map.insert("memory".to_string(), Value::String(memory.clone()));
    }
    Value::Object(map)
}

fn labels(spec: &DeploymentSpec) -> Value {
    json!({
        "app.kubernetes.io/name": spec.app.as_str(),
        "app.kubernetes.io/managed-by": MANAGED_BY,
        "conveyor.dev/environment": spec.environment.as_str(),
    })
}

fn deployment(spec: &DeploymentSpec, artifact: &BuildArtifact) -> Value {
    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut container = json!({
        "name": spec.app.as_str(),
        "image": artifact.deploy_reference().to_string(),
        "ports": [{ "containerPort": spec.port }],
        "readinessProbe": {
            "httpGet": { "path": spec.health_check.path, "port": spec.port },
            "periodSeconds": spec.health_check.interval.as_secs().max(1),
        },
    });

    if !env.is_empty() {
        container["env"] = Value::Array(env);
    }

    let limits = quantities(&spec.resources.limits);
    let requests = quantities(&spec.resources.requests);
    let mut resources = Map::new();
    if limits.as_object().is_some_and(|m| !m.is_empty()) {
        resources.insert("limits".to_string(), limits);
    }
    if requests.as_object().is_some_and(|m| !m.is_empty()) {
        resources.insert("requests".to_string(), requests);
    }
    if !resources.is_empty() {
        container["resources"] = Value::Object(resources);
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": spec.app.as_str(),
            "namespace": spec.namespace.as_str(),
            "labels": labels(spec),
            "annotations": { "conveyor.dev/tag": artifact.tag().as_str() },
        },
        "spec": {
            "replicas": spec.replicas,
            "selector": { "matchLabels": { "app.kubernetes.io/name": spec.app.as_str() } },
            "template": {
                "metadata": { "labels": labels(spec) },
                "spec": { "containers": [container] },
            },
        },
    })
}

fn service(spec: &DeploymentSpec) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": spec.app.as_str(),
            "namespace": spec.namespace.as_str(),
            "labels": labels(spec),
        },
        "spec": {
            "selector": { "app.kubernetes.io/name": spec.app.as_str() },
            "ports": [{ "port": 80, "targetPort": spec.port, "protocol": "TCP" }],
        },
    })
}

fn ingress(spec: &DeploymentSpec) -> Option<Value> {
    if !spec.ingress.enabled {
        return None;
    }
    let host = spec.ingress.host.as_deref()?;

    let mut ingress = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": spec.app.as_str(),
            "namespace": spec.namespace.as_str(),
            "labels": labels(spec),
        },
        "spec": {
            "rules": [{
                "host": host,
                "http": { "paths": [{
                    "path": "/",
                    "pathType": "Prefix",
                    "backend": { "service": { "name": spec.app.as_str(), "port": { "number": 80 } } },
                }]},
            }],
        },
    });

    if spec.ingress.tls {
        let secret = spec
            .ingress
            .tls_secret
            .clone()
            .unwrap_or_else(|| format!("{}-tls", spec.app));
        ingress["spec"]["tls"] = json!([{ "hosts": [host], "secretName": secret }]);
    }

    Some(ingress)
}

/// Render the desired state as a multi-document YAML stream.
pub fn render(
    spec: &DeploymentSpec,
    artifact: &BuildArtifact,
) -> Result<String, serde_yaml::Error> {
    let mut documents = vec![deployment(spec, artifact), service(spec)];
    documents.extend(ingress(spec));

    let mut out = String::new();
    for doc in &documents {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(doc)?);
    }
    Ok(out)
}
