// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates conveyor.yml template files.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::AppName;

use super::{CONFIG_FILENAME, Config};

pub fn init_config(
    dir: &Path,
    app: Option<&str>,
    registry: Option<&str>,
    force: bool,
) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut config = Config::template();

    if let Some(a) = app {
        config.app = Some(AppName::new(a).map_err(|e| Error::InvalidConfig(e.to_string()))?);
    }

    if let Some(r) = registry {
        config.registry = r.trim_end_matches('/').to_string();
    }

    let yaml = generate_template_yaml(&config);

    // Round-trip so a bad --registry fails here instead of on the first run
    Config::from_yaml(&yaml)?;

    std::fs::write(&config_path, yaml)?;

    Ok(())
}

fn generate_template_yaml(config: &Config) -> String {
    let app = config
        .app
        .as_ref()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "my-app".to_string());
    format!(
        r#"app: {app}
registry: {registry}

build:
  context: .
  dockerfile: Dockerfile
  # args:
  #   NODE_ENV: production

credentials:
  # Passed to registry and cluster commands as CONVEYOR_API_KEY
  api_key:
    env: IBMCLOUD_API_KEY

deploy:
  replicas: 1
  port: 8080
  resources:
    limits:
      cpu: 500m
      memory: 512Mi
    requests:
      cpu: 100m
      memory: 128Mi
  health_check:
    path: /health
    timeout: 300s
    interval: 5s

environments:
  production:
    replicas: 3
    ingress:
      enabled: true
      host: {app}.example.com
      tls: true

scan:
  enabled: true
  severity_threshold: high

rollback:
  enabled: true

commands:
  # Trivy JSON output is expected on stdout
  scan: "trivy image --format json --quiet {{image}}"
"#,
        app = app,
        registry = config.registry,
    )
}
