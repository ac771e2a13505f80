use serde::{Deserialize, Serialize};

/// Severity level for a vulnerability, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric rank where higher values indicate higher severity.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
            Severity::Critical => 3,
        }
    }

    /// Spanish display name used by the persistence schema.
    pub fn nombre(&self) -> &'static str {
        match self {
            Severity::Low => "Baja",
            Severity::Medium => "Media",
            Severity::High => "Alta",
            Severity::Critical => "Crítica",
        }
    }
}

/// Which scanner family produced the finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VulnKind {
    #[serde(rename = "SQLi")]
    Sqli,
    #[serde(rename = "XSS")]
    Xss,
}

impl VulnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqli => "SQLi",
            Self::Xss => "XSS",
        }
    }
}

impl std::fmt::Display for VulnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An in-memory vulnerability produced by an executor.
/// Duplicate suppression key: `(kind, endpoint, parameter)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub kind: VulnKind,
    pub severity: Severity,
    pub endpoint: String,
    pub parameter: String,
    pub description: String,
}

impl Vulnerability {
    pub fn identity(&self) -> (VulnKind, &str, &str) {
        (self.kind, &self.endpoint, &self.parameter)
    }
}
