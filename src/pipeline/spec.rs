// ABOUTME: Deployment spec: the desired shape of one app in one namespace.
// ABOUTME: Built from merged deploy config and validated before anything is applied.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{
    DeployConfig, HealthCheckConfig, IngressConfig, ResourceQuantities, ResourcesConfig,
    resolve_env_map,
};
use crate::error::Result;
use crate::types::{AppName, Environment, Namespace};

use super::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub app: AppName,
    pub environment: Environment,
    pub namespace: Namespace,
    pub replicas: u32,
    pub port: u16,
    #[serde(default)]
    pub resources: ResourcesConfig,
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    /// Resolved environment variables for the container.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl DeploymentSpec {
    /// Build a spec from deploy settings, resolving env var references now.
    pub fn from_config(
        deploy: &DeployConfig,
        app: AppName,
        environment: Environment,
        namespace: Namespace,
    ) -> Result<Self> {
        Ok(Self {
            app,
            environment,
            namespace,
            replicas: deploy.replicas,
            port: deploy.port,
            resources: deploy.resources.clone(),
            health_check: deploy.health_check.clone(),
            ingress: deploy.ingress.clone(),
            env: resolve_env_map(&deploy.env)?,
        })
    }

    /// Check every constraint and report all problems at once.
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        let mut problems = Vec::new();

        if self.replicas < 1 {
            problems.push("replicas must be at least 1".to_string());
        }
        if self.port == 0 {
            problems.push("port must be non-zero".to_string());
        }
        if !self.health_check.path.starts_with('/') {
            problems.push(format!(
                "health check path '{}' must start with '/'",
                self.health_check.path
            ));
        }
        if self.health_check.timeout.is_zero() {
            problems.push("health check timeout must be greater than zero".to_string());
        }
        if self.health_check.interval.is_zero() {
            problems.push("health check interval must be greater than zero".to_string());
        }

        if self.ingress.tls && !self.ingress.enabled {
            problems.push("TLS requires ingress to be enabled".to_string());
        }
        if self.ingress.enabled && self.ingress.host.as_deref().is_none_or(str::is_empty) {
            problems.push("ingress requires a host".to_string());
        }

        check_quantities("limits", &self.resources.limits, &mut problems);
        check_quantities("requests", &self.resources.requests, &mut problems);

        for name in self.env.keys() {
            if !is_env_name(name) {
                problems.push(format!("invalid environment variable name '{}'", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::InvalidSpec(problems))
        }
    }

    /// Public URL when an ingress host is configured.
    pub fn ingress_url(&self) -> Option<String> {
        if !self.ingress.enabled {
            return None;
        }
        let host = self.ingress.host.as_deref().filter(|h| !h.is_empty())?;
        let scheme = if self.ingress.tls { "https" } else { "http" };
        Some(format!("{}://{}", scheme, host))
    }

    /// Cluster-internal URL of the service.
    pub fn service_url(&self) -> String {
        format!("http://{}.{}.svc.cluster.local", self.app, self.namespace)
    }
}

fn check_quantities(which: &str, q: &ResourceQuantities, problems: &mut Vec<String>) {
    if let Some(ref cpu) = q.cpu
        && !is_cpu_quantity(cpu)
    {
        problems.push(format!("invalid cpu {} '{}'", which, cpu));
    }
    if let Some(ref memory) = q.memory
        && !is_memory_quantity(memory)
    {
        problems.push(format!("invalid memory {} '{}'", which, memory));
    }
}

/// `500m` (millicores) or a decimal number of cores (`1`, `0.5`).
fn is_cpu_quantity(s: &str) -> bool {
    if let Some(millis) = s.strip_suffix('m') {
        return !millis.is_empty() && millis.chars().all(|c| c.is_ascii_digit());
    }
    match s.parse::<f64>() {
        Ok(cores) => cores.is_finite() && cores > 0.0 && !s.starts_with('+'),
        Err(_) => false,
    }
}

/// Integer with an optional `Ki|Mi|Gi|K|M|G` suffix.
fn is_memory_quantity(s: &str) -> bool {
    const SUFFIXES: &[&str] = &["Ki", "Mi", "Gi", "K", "M", "G"];
    let digits = SUFFIXES
        .iter()
        .find_map(|suffix| s.strip_suffix(suffix))
        .unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_env_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
