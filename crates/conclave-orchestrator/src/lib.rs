//! Architect/developer/reviewer workflow engine for conclave.
//!
//! Turns free-text requirements into an architecture, runs a
//! development/review feedback loop per component and merges independent
//! agent analyses into one consensus report.
//!
//! # Main types
//!
//! - [`WorkflowManager`]: drives architecture, the per-task review loop, acceptance and commit.
//! - [`TaskQueue`]: tasks keyed by id, ordered by creation priority.
//! - [`TokenTracker`]: token and cost aggregation by role, phase and task.
//! - [`ConsensusBuilder`]: deduplicates and scores findings from N agents.
//! - [`GitCapability`]: commit interface, with the libgit2-backed [`Git2Committer`].

/// Parsing and validation of architecture responses.
pub mod architecture;
/// Workflow configuration.
pub mod config;
/// Consensus merging of agent findings.
pub mod consensus;
/// The workflow manager.
pub mod engine;
/// Git commit capability.
pub mod git;
/// Default per-role model profiles.
pub mod profiles;
/// Task storage ordered by priority.
pub mod task_queue;
/// Token and cost aggregation.
pub mod tokens;
/// Task state machine and workflow state types.
pub mod types;

pub use architecture::parse_architecture;
pub use config::WorkflowConfig;
pub use consensus::{
    ConsensusBuilder, ConsensusLevel, ConsensusReport, FindingMatcher, MergedFinding,
    PrefixOverlapMatcher, SourcedResponse,
};
pub use engine::{IterationRecord, TaskSummary, WorkflowAgents, WorkflowManager, WorkflowSummary};
pub use git::{CommitInfo, Git2Committer, GitCapability};
pub use profiles::default_profiles;
pub use task_queue::TaskQueue;
pub use tokens::{Phase, TokenMetrics, TokenTracker, UsageTotals};
pub use types::{
    ApprovalRecord, ArchitectureContext, ArchitectureSpec, Component, Implementation,
    ReviewDecision, ReviewFeedback, Task, TaskFailure, TaskStatus, TaskTokenUsage, WorkflowStage,
    WorkflowState,
};
