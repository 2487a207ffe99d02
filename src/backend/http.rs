// ABOUTME: HTTP implementations of the health probe and the commit status API.
// ABOUTME: Uses reqwest; the status API follows GitHub's commit status endpoint.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::cluster::{HealthProbe, ProbeError};
use super::status::{StatusApi, StatusError, StatusUpdate};
use crate::types::RunId;

/// GitHub rejects descriptions longer than this.
const MAX_DESCRIPTION_LEN: usize = 140;

/// Probes an endpoint with a GET; any 2xx answer is healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("conveyor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, url: &str) -> Result<bool, ProbeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let status = response.status();
        tracing::debug!("Health probe {} answered {}", url, status);
        Ok(status.is_success())
    }
}

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    state: &'a str,
    description: String,
    context: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_url: Option<&'a str>,
}

/// Posts commit statuses to `{api_url}/repos/{repository}/statuses/{sha}`.
pub struct GithubStatusApi {
    client: reqwest::Client,
    api_url: String,
    token: String,
    context: String,
}

impl std::fmt::Debug for GithubStatusApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubStatusApi")
            .field("api_url", &self.api_url)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl GithubStatusApi {
    pub fn new(api_url: &str, token: String, context: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("conveyor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            context: context.to_string(),
        })
    }

    fn url(&self, update: &StatusUpdate) -> String {
        format!(
            "{}/repos/{}/statuses/{}",
            self.api_url, update.repository, update.sha
        )
    }
}

fn truncate_description(description: &str) -> String {
    if description.chars().count() <= MAX_DESCRIPTION_LEN {
        return description.to_string();
    }
    let mut out: String = description.chars().take(MAX_DESCRIPTION_LEN - 3).collect();
    out.push_str("...");
    out
}

#[async_trait]
impl StatusApi for GithubStatusApi {
    async fn set_status(&self, run: &RunId, update: &StatusUpdate) -> Result<(), StatusError> {
        let state = update.state.to_string();
        let body = StatusBody {
            state: &state,
            description: truncate_description(&update.description),
            context: &self.context,
            target_url: update.target_url.as_deref(),
        };

        tracing::debug!("Run {}: posting {} status for {}", run, state, update.sha);

        let response = self
            .client
            .post(self.url(update))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| StatusError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(StatusError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Status sink used when no API token is available: logs and succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusApi;

#[async_trait]
impl StatusApi for LogStatusApi {
    async fn set_status(&self, run: &RunId, update: &StatusUpdate) -> Result<(), StatusError> {
        tracing::info!(
            "Run {}: status {} for {}@{}: {}",
            run,
            update.state,
            update.repository,
            update.sha,
            update.description
        );
        Ok(())
    }
}
