// ABOUTME: Deployment environments and their derivation from git refs.
// ABOUTME: main deploys to production, develop to staging, everything else to development.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::name::Namespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl Environment {
    /// Select the environment for a git ref.
    ///
    /// Accepts full refs (`refs/heads/main`) and bare branch names (`main`).
    pub fn for_ref(git_ref: &str) -> Self {
        let branch = git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref);
        match branch {
            "main" => Environment::Production,
            "develop" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
        }
    }

    /// Namespace used when no explicit namespace is given.
    pub fn default_namespace(&self) -> Namespace {
        Namespace::new(self.as_str()).expect("environment names are valid namespaces")
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" | "stage" => Ok(Environment::Staging),
            "development" | "dev" => Ok(Environment::Development),
            other => Err(format!(
                "unknown environment '{}' (expected production, staging or development)",
                other
            )),
        }
    }
}
