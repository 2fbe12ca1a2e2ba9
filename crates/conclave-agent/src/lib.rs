//! Role-bound agents for conclave.
//!
//! An [`Agent`] binds one model backend to one [`conclave_core::AgentRole`],
//! validates the requests it is given and protects every remote call with the
//! [`RetryOrchestrator`]. The [`ContextManager`] keeps each agent's
//! conversation state isolated between turns.

/// Role-bound agent wrapper.
pub mod agent;
/// Model backend capability.
pub mod backends;
/// Model and pricing configuration.
pub mod config;
/// Per-agent conversation contexts.
pub mod context;
/// Retry with exponential backoff.
pub mod retry;

pub use agent::{Agent, RoleProfile};
pub use backends::scripted::{ScriptStep, ScriptedBackend};
pub use backends::AgentBackend;
pub use config::{ModelConfig, Pricing};
pub use context::{ContextEntry, ContextManager, EntryKind, DEFAULT_CONTEXT_CAPACITY};
pub use retry::{compute_backoff, RetryOrchestrator, RetryPolicy};
