// ABOUTME: Shared helper for wiring the default backends from config.
// ABOUTME: Used by the run, rollback and history commands.

use conveyor::backend::{
    CommandBackend, GithubStatusApi, HttpHealthProbe, LogStatusApi, StatusApi,
};
use conveyor::config::Config;
use conveyor::error::Result;
use conveyor::pipeline::{Backends, FileRevisionStore};
use std::path::Path;
use std::sync::Arc;

/// Command-driven build, registry and cluster backends, HTTP probe and status API.
pub fn default_backends(config: &Config, project_dir: &Path) -> Result<Backends> {
    let commands = Arc::new(CommandBackend::new(
        config.commands.clone(),
        config.api_key()?,
        project_dir,
    ));
    let probe = Arc::new(HttpHealthProbe::new(
        config.deploy.health_check.request_timeout,
    )?);

    Ok(Backends {
        build: commands.clone(),
        registry: commands.clone(),
        cluster: commands,
        probe,
        status: status_api(config)?,
        store: Arc::new(FileRevisionStore::new(&config.state_dir)),
    })
}

/// GitHub statuses when a token is available, otherwise log only.
fn status_api(config: &Config) -> Result<Arc<dyn StatusApi>> {
    let token = config
        .status
        .token
        .as_ref()
        .and_then(|t| t.resolve_optional());

    match token {
        Some(token) => Ok(Arc::new(GithubStatusApi::new(
            &config.status.api_url,
            token,
            &config.status.context,
        )?)),
        None => {
            tracing::info!("No status token configured; commit statuses will only be logged");
            Ok(Arc::new(LogStatusApi))
        }
    }
}
