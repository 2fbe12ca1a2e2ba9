use crate::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};

/// Severity level for a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, not a blocker.
    Info,
    /// Should be addressed eventually.
    Low,
    /// Should be addressed before approval.
    Medium,
    /// Important correctness or design issue.
    High,
    /// Must fix: security, data loss, or architecture violation.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A single issue reported by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Agent-assigned identifier. Equal ids across agents denote the same issue.
    pub id: String,
    /// Category such as `security`, `performance` or `interface`.
    #[serde(rename = "type")]
    pub finding_type: String,
    /// How serious the issue is.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
    /// File, symbol or line reference, when the agent gave one.
    #[serde(default)]
    pub location: Option<String>,
    /// Suggested fix, when the agent gave one.
    #[serde(default)]
    pub suggestion: Option<String>,
    /// The agent's confidence in this finding, in `[0, 1]`.
    pub confidence: f64,
}

impl Finding {
    /// Creates a finding with no location or suggestion.
    pub fn new(
        id: impl Into<String>,
        finding_type: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            finding_type: finding_type.into(),
            severity,
            description: description.into(),
            location: None,
            suggestion: None,
            confidence,
        }
    }

    /// Sets the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the suggested fix.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Rejects empty ids and confidences outside `[0, 1]` (including NaN).
    pub fn validate(&self) -> ConclaveResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConclaveError::Validation(
                "finding id must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConclaveError::Validation(format!(
                "finding '{}' has confidence {} outside [0, 1]",
                self.id, self.confidence
            )));
        }
        Ok(())
    }
}
