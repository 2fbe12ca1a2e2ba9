use conclave_core::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};

/// Knobs of the development/review loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Rejections allowed per task before it is left in `needs_revision`.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Ask the architect to accept each approved task before completing it.
    #[serde(default)]
    pub acceptance_gate: bool,
    /// Commit accepted artifacts when a git capability is attached.
    #[serde(default = "default_auto_commit")]
    pub auto_commit: bool,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_auto_commit() -> bool {
    true
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            acceptance_gate: false,
            auto_commit: default_auto_commit(),
        }
    }
}

impl WorkflowConfig {
    /// Reject settings the workflow cannot run with.
    pub fn validate(&self) -> ConclaveResult<()> {
        if self.max_iterations == 0 {
            return Err(ConclaveError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
