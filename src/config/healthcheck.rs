// ABOUTME: Post-deploy health check configuration.
// ABOUTME: Defines HTTP health check parameters with sensible defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_path")]
    pub path: String,

    /// Overall deadline for the deployment to become healthy.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Pause between probes.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Deadline for a single probe request.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_path() -> String {
    "/health".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        HealthCheckConfig {
            path: default_path(),
            timeout: default_timeout(),
            interval: default_interval(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Per-environment health check override; unset fields keep the base value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthCheckOverride {
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
}

impl HealthCheckConfig {
    pub fn merged(&self, over: &HealthCheckOverride) -> Self {
        HealthCheckConfig {
            path: over.path.clone().unwrap_or_else(|| self.path.clone()),
            timeout: over.timeout.unwrap_or(self.timeout),
            interval: over.interval.unwrap_or(self.interval),
            request_timeout: self.request_timeout,
        }
    }
}
