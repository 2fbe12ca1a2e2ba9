//! Core types and error definitions for the conclave workflow engine.
//!
//! This crate provides the foundational types shared across all conclave crates:
//! the error taxonomy, agent roles, the structured request/response exchanged
//! with agents, and review findings.
//!
//! # Main types
//!
//! - [`ConclaveError`]: Unified error enum carrying a machine-readable code.
//! - [`ConclaveResult`]: Convenience alias for `Result<T, ConclaveError>`.
//! - [`AgentRole`]: The three roles an agent can be bound to.
//! - [`AgentRequest`] / [`AgentResponse`]: The agent capability's wire shape.
//! - [`Finding`]: A single reported issue with a confidence score.

/// Review findings and severities.
pub mod finding;
/// Agent roles, task kinds and the request/response exchanged with agents.
pub mod request;

pub use finding::{Finding, Severity};
pub use request::{AgentRequest, AgentResponse, AgentRole, TaskKind, TokenCount};

// --- Error types ---

/// Top-level error type for conclave.
///
/// Every variant maps to a stable code returned by [`ConclaveError::code`].
#[derive(Debug, thiserror::Error)]
pub enum ConclaveError {
    /// A remote agent call failed. Retryable or fatal depending on its message.
    #[error("Agent error: {0}")]
    Agent(String),

    /// A side-effecting tool (git, filesystem, test runner) failed. Never retried.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Consensus could not be built (e.g. no responses to merge).
    #[error("Consensus error: {0}")]
    Consensus(String),

    /// Unknown role or model, missing pricing, or an invalid config value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A malformed request, task, response payload or illegal state transition.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Substrings that mark an agent failure as transient.
const RETRYABLE_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "timeout",
    "timed out",
    "429",
];

impl ConclaveError {
    /// Stable, machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ConclaveError::Agent(_) => "AGENT_ERROR",
            ConclaveError::Tool(_) => "TOOL_ERROR",
            ConclaveError::Consensus(_) => "CONSENSUS_ERROR",
            ConclaveError::Configuration(_) => "CONFIGURATION_ERROR",
            ConclaveError::Validation(_) => "VALIDATION_ERROR",
            ConclaveError::Json(_) => "JSON_ERROR",
            ConclaveError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Only agent errors carrying a rate-limit, timeout or HTTP 429 marker are
    /// retryable. Tool failures are fatal even when their message mentions a
    /// timeout.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConclaveError::Agent(msg) => {
                let lower = msg.to_lowercase();
                RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
            }
            _ => false,
        }
    }
}

/// A convenience `Result` alias using [`ConclaveError`].
pub type ConclaveResult<T> = Result<T, ConclaveError>;
