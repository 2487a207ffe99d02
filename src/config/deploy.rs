// ABOUTME: Deployment settings: replicas, resources, ingress and env vars.
// ABOUTME: Per-environment overrides deep-merge onto the base settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::env_value::EnvValue;
use super::healthcheck::{HealthCheckConfig, HealthCheckOverride};

#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Container port the application listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub resources: ResourcesConfig,

    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,

    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

fn default_replicas() -> u32 {
    1
}

fn default_port() -> u16 {
    8080
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            replicas: default_replicas(),
            port: default_port(),
            resources: ResourcesConfig::default(),
            env: BTreeMap::new(),
            ingress: IngressConfig::default(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default)]
    pub limits: ResourceQuantities,
    #[serde(default)]
    pub requests: ResourceQuantities,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantities {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

impl ResourceQuantities {
    fn merged(&self, over: &ResourceQuantities) -> Self {
        ResourceQuantities {
            cpu: over.cpu.clone().or_else(|| self.cpu.clone()),
            memory: over.memory.clone().or_else(|| self.memory.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub tls: bool,
    /// Secret holding the TLS certificate; defaults to `{app}-tls`.
    #[serde(default)]
    pub tls_secret: Option<String>,
}

/// Settings an environment may override. Absent fields keep the base value;
/// `env` entries are merged key by key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentOverrides {
    #[serde(default)]
    pub replicas: Option<u32>,

    #[serde(default)]
    pub resources: Option<ResourcesConfig>,

    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,

    #[serde(default)]
    pub ingress: Option<IngressConfig>,

    #[serde(default)]
    pub health_check: Option<HealthCheckOverride>,

    /// Turn automatic rollback on or off for this environment only.
    #[serde(default)]
    pub auto_rollback: Option<bool>,
}

impl DeployConfig {
    pub fn merged(&self, over: &EnvironmentOverrides) -> DeployConfig {
        let mut merged = self.clone();

        if let Some(replicas) = over.replicas {
            merged.replicas = replicas;
        }

        if let Some(ref resources) = over.resources {
            merged.resources = ResourcesConfig {
                limits: self.resources.limits.merged(&resources.limits),
                requests: self.resources.requests.merged(&resources.requests),
            };
        }

        for (k, v) in &over.env {
            merged.env.insert(k.clone(), v.clone());
        }

        if let Some(ref ingress) = over.ingress {
            merged.ingress = ingress.clone();
        }

        if let Some(ref health_check) = over.health_check {
            merged.health_check = self.health_check.merged(health_check);
        }

        merged
    }
}
