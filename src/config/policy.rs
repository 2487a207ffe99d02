// ABOUTME: Pipeline policy knobs: scan threshold, retries, rollback, locking.
// ABOUTME: Also holds acceptance test and status reporting settings.

use serde::Deserialize;
use std::time::Duration;

use super::env_value::EnvValue;
use crate::backend::Severity;

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Findings at or above this severity block the deployment.
    #[serde(default = "default_threshold")]
    pub severity_threshold: Severity,
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> Severity {
    Severity::High
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            enabled: true,
            severity_threshold: default_threshold(),
        }
    }
}

/// Bounded exponential backoff for registry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RollbackConfig {
    /// Roll back automatically when a deploy or acceptance test fails.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        RollbackConfig { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptanceConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Command to run; defaults to `.conveyor/hooks/acceptance-test`.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default = "default_acceptance_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_acceptance_timeout() -> Duration {
    Duration::from_secs(600)
}

impl Default for AcceptanceConfig {
    fn default() -> Self {
        AcceptanceConfig {
            enabled: false,
            command: None,
            timeout: default_acceptance_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// Status context shown on the pull request / commit.
    #[serde(default = "default_context")]
    pub context: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Token for the status API; without one, statuses are only logged.
    #[serde(default = "default_token")]
    pub token: Option<EnvValue>,
}

fn default_context() -> String {
    "conveyor/deploy".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_token() -> Option<EnvValue> {
    Some(EnvValue::FromEnv {
        var: "GITHUB_TOKEN".to_string(),
        default: None,
    })
}

impl Default for StatusConfig {
    fn default() -> Self {
        StatusConfig {
            context: default_context(),
            api_url: default_api_url(),
            token: default_token(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LockConfig {
    /// How long to wait for another run holding the namespace.
    #[serde(default = "default_wait_timeout", with = "humantime_serde")]
    pub wait_timeout: Duration,

    /// Locks older than this are considered abandoned and broken.
    #[serde(default = "default_stale_after", with = "humantime_serde")]
    pub stale_after: Duration,
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_stale_after() -> Duration {
    Duration::from_secs(3600)
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            wait_timeout: default_wait_timeout(),
            stale_after: default_stale_after(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for(3), Duration::from_secs(4));
        assert_eq!(retry.delay_for(4), Duration::from_secs(5));
        assert_eq!(retry.delay_for(40), Duration::from_secs(5));
    }
}
