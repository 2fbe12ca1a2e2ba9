use crate::task_queue::TaskQueue;
use chrono::{DateTime, Utc};
use conclave_core::{ConclaveError, ConclaveResult, Finding, TokenCount};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task.
///
/// ```text
/// pending -> in_development -> in_review -> approved -> completed
///                 ^                 |
///                 +- needs_revision +
/// ```
///
/// A propagated failure moves an in-flight task straight to `needs_revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InDevelopment,
    InReview,
    NeedsRevision,
    Approved,
    Completed,
}

impl TaskStatus {
    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InDevelopment)
                | (InDevelopment, InReview)
                | (InReview, Approved)
                | (InReview, NeedsRevision)
                | (NeedsRevision, InDevelopment)
                | (Approved, Completed)
                // failure edges
                | (InDevelopment, NeedsRevision)
                | (Approved, NeedsRevision)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InDevelopment => write!(f, "in_development"),
            TaskStatus::InReview => write!(f, "in_review"),
            TaskStatus::NeedsRevision => write!(f, "needs_revision"),
            TaskStatus::Approved => write!(f, "approved"),
            TaskStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One component of an architecture specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Unique component id.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// What the component does.
    #[serde(default)]
    pub description: String,
    /// Ids of components this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Interfaces the component must expose.
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Functional requirements.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Conditions for acceptance.
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// Architecture produced by the architect agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureSpec {
    /// Overall architecture description.
    pub description: String,
    /// Components, in the architect's order.
    pub components: Vec<Component>,
    /// Tokens spent producing it.
    pub tokens_used: TokenCount,
    /// When it was parsed.
    pub created_at: DateTime<Utc>,
}

/// The slice of the architecture a task is built against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureContext {
    /// Requirements of the component.
    pub requirements: Vec<String>,
    /// Interfaces to expose.
    pub interfaces: Vec<String>,
    /// Components depended on.
    pub dependencies: Vec<String>,
    /// Conditions for acceptance.
    pub success_criteria: Vec<String>,
}

impl From<&Component> for ArchitectureContext {
    fn from(component: &Component) -> Self {
        Self {
            requirements: component.requirements.clone(),
            interfaces: component.interfaces.clone(),
            dependencies: component.dependencies.clone(),
            success_criteria: component.success_criteria.clone(),
        }
    }
}

/// An implementation artifact returned by the developer agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Produced source text.
    pub content: String,
    /// Paths the developer wrote, relative to the project root.
    #[serde(default)]
    pub files: Vec<String>,
    /// Developer summary.
    #[serde(default)]
    pub summary: String,
    /// Iteration that produced this artifact.
    #[serde(default)]
    pub iteration: u32,
}

/// Reviewer verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Outcome of one review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFeedback {
    /// Verdict.
    pub decision: ReviewDecision,
    /// Issues raised.
    pub issues: Vec<Finding>,
    /// Reviewer summary.
    pub summary: String,
    /// Tokens spent on the review.
    pub tokens_used: TokenCount,
    /// Id of the agent that reviewed.
    pub reviewer: String,
    /// Iteration the review belongs to.
    pub iteration: u32,
    /// When the review was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Tokens spent on a task, per phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTokenUsage {
    /// Share of the architecture call attributed to this task.
    pub architecture: u64,
    /// One entry per development call.
    pub development: Vec<u64>,
    /// One entry per review call.
    pub review: Vec<u64>,
    /// Tokens spent on the acceptance gate.
    #[serde(default)]
    pub acceptance: u64,
    /// Sum over all phases.
    pub total: u64,
}

impl TaskTokenUsage {
    /// Add the task's share of the architecture call.
    pub fn record_architecture(&mut self, tokens: u64) {
        self.architecture += tokens;
        self.total += tokens;
    }

    /// Record one development call.
    pub fn record_development(&mut self, tokens: u64) {
        self.development.push(tokens);
        self.total += tokens;
    }

    /// Record one review call.
    pub fn record_review(&mut self, tokens: u64) {
        self.review.push(tokens);
        self.total += tokens;
    }

    /// Record the acceptance call.
    pub fn record_acceptance(&mut self, tokens: u64) {
        self.acceptance += tokens;
        self.total += tokens;
    }
}

/// Why a task stopped short of completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Machine-readable error code.
    pub code: String,
    /// Error text.
    pub message: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

/// The development-and-review unit of work for one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: Uuid,
    /// Component the task implements.
    pub component_id: String,
    /// What to build.
    pub description: String,
    /// Current state-machine status.
    pub status: TaskStatus,
    /// 1-based creation order; lower runs first.
    pub priority: u32,
    /// Architecture slice to build against.
    pub architecture_context: ArchitectureContext,
    /// Latest implementation.
    pub implementation: Option<Implementation>,
    /// Every review, oldest first.
    pub review_history: Vec<ReviewFeedback>,
    /// Most recent review.
    pub current_review: Option<ReviewFeedback>,
    /// Tokens spent per phase.
    pub token_usage: TaskTokenUsage,
    /// Number of rejected reviews so far.
    pub iteration_count: u32,
    /// Rejection budget.
    pub max_iterations: u32,
    /// Last failure recorded by the loop.
    #[serde(default)]
    pub failure: Option<TaskFailure>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// Set on completion.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Pending task for `component_id`.
    pub fn new(
        component_id: impl Into<String>,
        description: impl Into<String>,
        architecture_context: ArchitectureContext,
        max_iterations: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            component_id: component_id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: 0,
            architecture_context,
            implementation: None,
            review_history: Vec::new(),
            current_review: None,
            token_usage: TaskTokenUsage::default(),
            iteration_count: 0,
            max_iterations,
            failure: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether another development round is allowed.
    pub fn can_iterate(&self) -> bool {
        self.iteration_count < self.max_iterations
    }

    /// Whether any review so far approved the task.
    pub fn has_approval(&self) -> bool {
        self.review_history
            .iter()
            .any(|r| r.decision == ReviewDecision::Approve)
    }

    /// Move to `next`, enforcing the state machine.
    ///
    /// Re-entering development requires iteration budget, and completion
    /// requires an approving review in the history.
    pub fn transition_to(&mut self, next: TaskStatus) -> ConclaveResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ConclaveError::Validation(format!(
                "task {} cannot move from {} to {}",
                self.component_id, self.status, next
            )));
        }
        if self.status == TaskStatus::NeedsRevision
            && next == TaskStatus::InDevelopment
            && !self.can_iterate()
        {
            return Err(ConclaveError::Validation(format!(
                "task {} exhausted its {} iterations",
                self.component_id, self.max_iterations
            )));
        }
        if next == TaskStatus::Completed && !self.has_approval() {
            return Err(ConclaveError::Validation(format!(
                "task {} cannot complete without an approving review",
                self.component_id
            )));
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next == TaskStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Append a review and make it the current one.
    pub fn record_review(&mut self, feedback: ReviewFeedback) {
        self.review_history.push(feedback.clone());
        self.current_review = Some(feedback);
        self.updated_at = Utc::now();
    }

    /// Count a rejected review against the iteration budget.
    pub fn record_rejection(&mut self) -> ConclaveResult<()> {
        if !self.can_iterate() {
            return Err(ConclaveError::Validation(format!(
                "task {} already used all {} iterations",
                self.component_id, self.max_iterations
            )));
        }
        self.iteration_count += 1;
        Ok(())
    }

    /// Remember the error that stopped this task.
    pub fn record_failure(&mut self, err: &ConclaveError) {
        let now = Utc::now();
        self.failure = Some(TaskFailure {
            code: err.code().to_string(),
            message: err.to_string(),
            at: now,
        });
        self.updated_at = now;
    }
}

/// Coarse progress of the whole workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Idle,
    Architecture,
    Development,
    Completed,
    Failed,
}

/// Result of the acceptance step for an approved task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Task the record belongs to.
    pub task_id: Uuid,
    /// Component of that task.
    pub component_id: String,
    /// Whether the gate accepted.
    pub accepted: bool,
    /// Commit created on acceptance.
    pub commit_hash: Option<String>,
    /// Acceptance rationale.
    pub reason: String,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

/// Everything the workflow manager owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Project identifier.
    pub project_id: String,
    /// Current stage.
    pub stage: WorkflowStage,
    /// Architecture, once produced.
    pub architecture: Option<ArchitectureSpec>,
    /// Components of the architecture.
    pub components: Vec<Component>,
    /// Tasks keyed by id.
    pub tasks: TaskQueue,
    /// Acceptance outcomes, in order.
    pub approval_history: Vec<ApprovalRecord>,
}

impl WorkflowState {
    /// Idle state for `project_id`.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            stage: WorkflowStage::Idle,
            architecture: None,
            components: Vec::new(),
            tasks: TaskQueue::new(),
            approval_history: Vec::new(),
        }
    }
}
