// ABOUTME: Configuration types and parsing for conveyor.yml.
// ABOUTME: Handles YAML parsing, env var interpolation, and environment merging.

mod commands;
mod deploy;
mod env_value;
mod healthcheck;
mod init;
mod policy;

pub use commands::{CommandLine, CommandsConfig};
pub use deploy::{
    DeployConfig, EnvironmentOverrides, IngressConfig, ResourceQuantities, ResourcesConfig,
};
pub use env_value::{EnvValue, resolve_env_map};
pub use healthcheck::{HealthCheckConfig, HealthCheckOverride};
pub use init::init_config;
pub use policy::{
    AcceptanceConfig, LockConfig, RetryConfig, RollbackConfig, ScanConfig, StatusConfig,
};

use crate::error::{Error, Result};
use crate::types::{ApiKey, AppName, Environment};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "conveyor.yml";
pub const CONFIG_FILENAME_ALT: &str = "conveyor.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".conveyor/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Application name; derived from the repository name when absent.
    #[serde(default)]
    pub app: Option<AppName>,

    /// Image repository prefix, e.g. `us.icr.io/acme`.
    #[serde(deserialize_with = "deserialize_registry")]
    pub registry: String,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub environments: HashMap<Environment, EnvironmentOverrides>,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub rollback: RollbackConfig,

    #[serde(default)]
    pub acceptance: AcceptanceConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    /// Where revision history and lock files live.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_context")]
    pub context: PathBuf,

    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,

    #[serde(default)]
    pub args: BTreeMap<String, EnvValue>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("Dockerfile")
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            context: default_context(),
            dockerfile: default_dockerfile(),
            args: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    /// Cloud API key handed to registry and cluster commands.
    #[serde(default)]
    pub api_key: Option<EnvValue>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".conveyor/state")
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                let mut config = Self::load(path)?;
                if config.state_dir.is_relative() {
                    config.state_dir = dir.join(&config.state_dir);
                }
                return Ok(config);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Deploy settings for an environment, with its overrides merged in.
    pub fn deploy_for(&self, environment: Environment) -> DeployConfig {
        match self.environments.get(&environment) {
            Some(over) => self.deploy.merged(over),
            None => self.deploy.clone(),
        }
    }

    /// Whether automatic rollback is on for an environment.
    pub fn rollback_enabled_for(&self, environment: Environment) -> bool {
        self.environments
            .get(&environment)
            .and_then(|over| over.auto_rollback)
            .unwrap_or(self.rollback.enabled)
    }

    /// Resolve the API key, if one is configured.
    ///
    /// A configured key whose variable is unset is an error: running without
    /// it would fail later with a less useful message.
    pub fn api_key(&self) -> Result<Option<ApiKey>> {
        self.credentials
            .api_key
            .as_ref()
            .map(|value| value.resolve().map(ApiKey::new))
            .transpose()
    }

    /// Build args with env references resolved.
    pub fn build_args(&self) -> Result<BTreeMap<String, String>> {
        resolve_env_map(&self.build.args)
    }

    pub fn template() -> Self {
        Config {
            app: Some(AppName::new("my-app").expect("template app name is valid")),
            registry: "registry.example.com/my-team".to_string(),
            build: BuildConfig::default(),
            credentials: CredentialsConfig::default(),
            deploy: DeployConfig::default(),
            environments: HashMap::new(),
            scan: ScanConfig::default(),
            retry: RetryConfig::default(),
            rollback: RollbackConfig::default(),
            acceptance: AcceptanceConfig::default(),
            status: StatusConfig::default(),
            lock: LockConfig::default(),
            commands: CommandsConfig::default(),
            state_dir: default_state_dir(),
        }
    }
}

fn deserialize_registry<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let trimmed = s.trim().trim_end_matches('/');

    // The prefix must form a valid image reference once a name is appended
    crate::types::ImageRef::parse(&format!("{}/probe", trimmed))
        .map_err(|e| serde::de::Error::custom(format!("invalid registry '{}': {}", s, e)))?;

    if trimmed.contains('@') {
        return Err(serde::de::Error::custom(format!(
            "invalid registry '{}': must not contain a digest",
            s
        )));
    }

    Ok(trimmed.to_string())
}
