// ABOUTME: Container registry backend contract and vulnerability reports.
// ABOUTME: Push, scan and delete; errors say whether a retry may help.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::ImageRef;

/// Registry operations on a built image.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Push the image; returns the content digest when the registry reports one.
    async fn push(&self, image: &ImageRef) -> Result<Option<String>, RegistryError>;

    /// Scan a pushed image for known vulnerabilities.
    async fn scan(&self, image: &ImageRef) -> Result<VulnerabilityReport, RegistryError>;

    /// Delete the image. Returns `RegistryError::NotFound` if it is absent.
    async fn delete(&self, image: &ImageRef) -> Result<(), RegistryError>;

    /// Whether `scan` is backed by a real scanner.
    fn supports_scan(&self) -> bool {
        true
    }
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("transient registry failure: {0}")]
    Transient(String),

    #[error("registry rejected the request: {0}")]
    Rejected(String),

    #[error("unreadable scan report: {0}")]
    InvalidReport(String),
}

impl RegistryError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Transient(_))
    }
}

/// Vulnerability severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    /// Case-insensitive, so scanner output (`HIGH`) and config (`high`) both parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" | "negligible" => Ok(Severity::Unknown),
            "low" => Ok(Severity::Low),
            "medium" | "moderate" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub id: String,
    pub package: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VulnerabilityReport {
    pub findings: Vec<Finding>,
}

impl VulnerabilityReport {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self { findings }
    }

    /// Findings at or above `threshold`.
    pub fn blocking(&self, threshold: Severity) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity >= threshold)
            .collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// Parse a Trivy JSON report (`Results[].Vulnerabilities[]`).
    pub fn from_trivy_json(json: &str) -> Result<Self, RegistryError> {
        #[derive(Deserialize)]
        struct Report {
            #[serde(rename = "Results", default)]
            results: Option<Vec<Target>>,
        }

        #[derive(Deserialize)]
        struct Target {
            #[serde(rename = "Vulnerabilities", default)]
            vulnerabilities: Option<Vec<Vulnerability>>,
        }

        #[derive(Deserialize)]
        struct Vulnerability {
            #[serde(rename = "VulnerabilityID")]
            id: String,
            #[serde(rename = "PkgName", default)]
            package: String,
            #[serde(rename = "Severity")]
            severity: Severity,
        }

        let report: Report = serde_json::from_str(json)
            .map_err(|e| RegistryError::InvalidReport(e.to_string()))?;

        let findings = report
            .results
            .unwrap_or_default()
            .into_iter()
            .flat_map(|t| t.vulnerabilities.unwrap_or_default())
            .map(|v| Finding {
                id: v.id,
                package: v.package,
                severity: v.severity,
            })
            .collect();

        Ok(Self { findings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Unknown);
    }

    #[test]
    fn severity_parses_any_case() {
        assert_eq!("HIGH".parse::<Severity>(), Ok(Severity::High));
        assert_eq!("moderate".parse::<Severity>(), Ok(Severity::Medium));
    }

    #[test]
    fn parses_trivy_report() {
        let json = r#"{
            "SchemaVersion": 2,
            "Results": [
                {"Target": "app", "Vulnerabilities": [
                    {"VulnerabilityID": "CVE-1", "PkgName": "openssl", "Severity": "CRITICAL"},
                    {"VulnerabilityID": "CVE-2", "PkgName": "zlib", "Severity": "LOW"}
                ]},
                {"Target": "node_modules", "Vulnerabilities": null}
            ]
        }"#;
        let report = VulnerabilityReport::from_trivy_json(json).unwrap();
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.blocking(Severity::High).len(), 1);
        assert_eq!(report.count(Severity::Low), 1);
    }

    #[test]
    fn clean_trivy_report_has_no_findings() {
        let report = VulnerabilityReport::from_trivy_json(r#"{"SchemaVersion": 2}"#).unwrap();
        assert!(report.findings.is_empty());
    }

    #[test]
    fn garbage_report_is_invalid() {
        let err = VulnerabilityReport::from_trivy_json("not json").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidReport(_)));
        assert!(!err.is_transient());
    }
}
