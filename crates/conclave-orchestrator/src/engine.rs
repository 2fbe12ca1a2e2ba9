use crate::architecture::parse_architecture;
use crate::config::WorkflowConfig;
use crate::consensus::{ConsensusBuilder, ConsensusReport, SourcedResponse};
use crate::git::GitCapability;
use crate::task_queue::TaskQueue;
use crate::tokens::{Phase, TokenMetrics, TokenTracker};
use crate::types::{
    ApprovalRecord, ArchitectureContext, ArchitectureSpec, Component, Implementation,
    ReviewDecision, ReviewFeedback, Task, TaskFailure, TaskStatus, WorkflowStage, WorkflowState,
};
use chrono::Utc;
use conclave_agent::{Agent, ContextManager, EntryKind};
use conclave_core::{
    AgentRequest, AgentResponse, AgentRole, ConclaveError, ConclaveResult, TaskKind,
};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The three role-bound agents a workflow runs with.
pub struct WorkflowAgents {
    /// Produces the architecture and serves the acceptance gate.
    pub architect: Agent,
    /// Implements each component.
    pub developer: Agent,
    /// Approves or rejects implementations.
    pub reviewer: Agent,
}

impl WorkflowAgents {
    fn all(&self) -> [&Agent; 3] {
        [&self.architect, &self.developer, &self.reviewer]
    }

    fn by_role(&self, role: AgentRole) -> &Agent {
        match role {
            AgentRole::Architect => &self.architect,
            AgentRole::Developer => &self.developer,
            AgentRole::Reviewer => &self.reviewer,
        }
    }
}

/// Decision payload of review and acceptance responses.
#[derive(Debug, Deserialize)]
struct DecisionPayload {
    decision: ReviewDecision,
}

/// Implementation payload of development responses.
#[derive(Debug, Default, Deserialize)]
struct ImplementationPayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    files: Vec<String>,
}

/// One development/review round as shown in the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Zero-based round number.
    pub iteration: u32,
    /// Reviewer verdict.
    pub decision: ReviewDecision,
    /// Issues raised in the round.
    pub issues: usize,
    /// Reviewing agent id.
    pub reviewer: String,
    /// Reviewer summary.
    pub summary: String,
}

/// Per-task view in [`WorkflowSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task id.
    pub task_id: Uuid,
    /// Component the task implements.
    pub component_id: String,
    /// Execution priority.
    pub priority: u32,
    /// Final status.
    pub status: TaskStatus,
    /// Rejections so far.
    pub iteration_count: u32,
    /// Rejection budget.
    pub max_iterations: u32,
    /// Each review round.
    pub iterations: Vec<IterationRecord>,
    /// Tokens spent on the task.
    pub tokens: u64,
    /// Last recorded failure, if any.
    pub failure: Option<TaskFailure>,
}

/// Structural summary of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Project identifier.
    pub project_id: String,
    /// Stage reached.
    pub stage: WorkflowStage,
    /// Architecture description.
    pub architecture: Option<String>,
    /// Number of components.
    pub components: usize,
    /// Per-task summaries in priority order.
    pub tasks: Vec<TaskSummary>,
    /// Tasks completed.
    pub completed: usize,
    /// Tasks left in `needs_revision`.
    pub needs_revision: usize,
    /// Acceptance outcomes.
    pub approval_history: Vec<ApprovalRecord>,
    /// Tokens recorded across all calls.
    pub total_tokens: u64,
    /// Cost of all calls.
    pub total_cost: f64,
}

/// Drives architecture, the per-task development/review loop, acceptance and
/// commit, and records token usage along the way.
///
/// The manager is the single writer of the [`WorkflowState`]: tasks run one
/// at a time and every operation takes `&mut self`.
pub struct WorkflowManager {
    agents: WorkflowAgents,
    config: WorkflowConfig,
    state: WorkflowState,
    contexts: ContextManager,
    tracker: TokenTracker,
    consensus: ConsensusBuilder,
    git: Option<Arc<dyn GitCapability>>,
}

impl WorkflowManager {
    /// Build a manager. Each agent must be bound to its slot's role.
    pub fn new(
        project_id: impl Into<String>,
        agents: WorkflowAgents,
        config: WorkflowConfig,
    ) -> ConclaveResult<Self> {
        config.validate()?;
        let mut pricing = HashMap::new();
        for role in AgentRole::ALL {
            let agent = agents.by_role(role);
            if agent.role() != role {
                return Err(ConclaveError::Configuration(format!(
                    "agent {} configured in the {role} slot",
                    agent.id()
                )));
            }
            pricing.insert(role, agent.pricing());
        }
        let tracker = TokenTracker::new(pricing)?;

        let mut contexts = ContextManager::new();
        for agent in agents.all() {
            contexts.create(agent.id());
        }

        let project_id = project_id.into();
        info!(project = %project_id, max_iterations = config.max_iterations, "Workflow manager created");
        Ok(Self {
            agents,
            config,
            state: WorkflowState::new(project_id),
            contexts,
            tracker,
            consensus: ConsensusBuilder::new(),
            git: None,
        })
    }

    /// Attach a git capability used to commit accepted artifacts.
    pub fn with_git(mut self, git: Arc<dyn GitCapability>) -> Self {
        self.git = Some(git);
        self
    }

    /// Replace the consensus builder (e.g. to use a different matcher).
    pub fn with_consensus_builder(mut self, builder: ConsensusBuilder) -> Self {
        self.consensus = builder;
        self
    }

    /// Current workflow state. Read-only: the manager is its single writer.
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Per-agent conversation contexts.
    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    /// Workflow settings in force.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Ask the architect for an architecture and create one task per
    /// component, prioritised in creation order.
    pub async fn start_architecture(&mut self, requirements: &str) -> ConclaveResult<ArchitectureSpec> {
        if requirements.trim().is_empty() {
            return Err(ConclaveError::Validation(
                "requirements must not be empty".to_string(),
            ));
        }
        info!(project = %self.state.project_id, "Workflow phase: architecture");
        self.state.stage = WorkflowStage::Architecture;

        let request = self
            .agents
            .architect
            .request(TaskKind::Architecture)
            .with_context(json!({
                "project_id": self.state.project_id,
                "requirements": requirements,
            }));

        let spec = match Self::run_turn(&mut self.contexts, &self.agents.architect, &request).await {
            Ok(response) => {
                self.tracker
                    .record(AgentRole::Architect, Phase::Architecture, None, response.tokens_used);
                parse_architecture(&response)
            }
            Err(e) => Err(e),
        };
        let spec = match spec {
            Ok(spec) => spec,
            Err(e) => {
                error!(error = %e, "Architecture phase failed");
                self.state.stage = WorkflowStage::Failed;
                return Err(e);
            }
        };

        self.state.tasks = self.materialize_tasks(&spec);
        self.state.components = spec.components.clone();
        self.state.architecture = Some(spec.clone());
        self.state.stage = WorkflowStage::Development;

        info!(
            components = spec.components.len(),
            tokens = spec.tokens_used.total(),
            "Architecture accepted"
        );
        Ok(spec)
    }

    fn materialize_tasks(&self, spec: &ArchitectureSpec) -> TaskQueue {
        let mut queue = TaskQueue::new();
        let total = spec.tokens_used.total();
        let n = spec.components.len() as u64;
        let (share, remainder) = if n == 0 { (0, 0) } else { (total / n, total % n) };

        for (i, component) in spec.components.iter().enumerate() {
            let mut task = Task::new(
                component.id.clone(),
                task_description(component),
                ArchitectureContext::from(component),
                self.config.max_iterations,
            );
            let tokens = if i == 0 { share + remainder } else { share };
            task.token_usage.record_architecture(tokens);
            queue.add(task);
        }
        queue
    }

    /// All tasks in priority order.
    pub fn get_tasks(&self) -> Vec<Task> {
        self.state
            .tasks
            .in_priority_order()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Run the development/review loop for `task` and store the result.
    ///
    /// `task` only identifies the work: the stored copy is what runs, so a
    /// stale clone cannot resurrect a finished task. A failure inside the
    /// loop does not escape: the task is moved to `needs_revision` with the
    /// error recorded and returned as `Ok`. A task unknown to this workflow,
    /// or one that cannot be started (completed, or out of iterations),
    /// yields an error.
    pub async fn execute_task_with_review_loop(&mut self, task: Task) -> ConclaveResult<Task> {
        let mut task = match self.state.tasks.get(task.id) {
            Some(stored) => stored.clone(),
            None => {
                return Err(ConclaveError::Validation(format!(
                    "task {} ({}) is not part of this workflow",
                    task.id, task.component_id
                )));
            }
        };
        match task.status {
            TaskStatus::Pending => {}
            TaskStatus::NeedsRevision if task.can_iterate() => {}
            TaskStatus::NeedsRevision => {
                return Err(ConclaveError::Validation(format!(
                    "task {} exhausted its {} iterations",
                    task.component_id, task.max_iterations
                )));
            }
            other => {
                return Err(ConclaveError::Validation(format!(
                    "task {} cannot be executed from status {other}",
                    task.component_id
                )));
            }
        }

        let started = Instant::now();
        task.failure = None;
        info!(task_id = %task.id, component = %task.component_id, "Executing task");

        if let Err(e) = self.review_loop(&mut task).await {
            warn!(
                task_id = %task.id,
                component = %task.component_id,
                code = e.code(),
                error = %e,
                "Task failed, marking needs_revision"
            );
            task.record_failure(&e);
            if task.status.can_transition_to(TaskStatus::NeedsRevision) {
                if let Err(t) = task.transition_to(TaskStatus::NeedsRevision) {
                    error!(task_id = %task.id, error = %t, "Could not record failure status");
                }
            }
        }

        info!(
            task_id = %task.id,
            status = %task.status,
            iterations = task.iteration_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "Task finished"
        );
        self.state.tasks.add(task.clone());
        Ok(task)
    }

    async fn review_loop(&mut self, task: &mut Task) -> ConclaveResult<()> {
        loop {
            task.transition_to(TaskStatus::InDevelopment)?;
            let implementation = self.develop(task).await?;
            task.implementation = Some(implementation);

            task.transition_to(TaskStatus::InReview)?;
            let feedback = self.review(task).await?;
            let decision = feedback.decision;
            task.record_review(feedback);

            match decision {
                ReviewDecision::Approve => {
                    task.transition_to(TaskStatus::Approved)?;
                    info!(task_id = %task.id, iteration = task.iteration_count, "Review approved");
                    break;
                }
                ReviewDecision::Reject => {
                    task.record_rejection()?;
                    task.transition_to(TaskStatus::NeedsRevision)?;
                    if !task.can_iterate() {
                        warn!(
                            task_id = %task.id,
                            iterations = task.iteration_count,
                            "Iteration budget exhausted"
                        );
                        return Ok(());
                    }
                    info!(
                        task_id = %task.id,
                        iteration = task.iteration_count,
                        "Review rejected, revising"
                    );
                }
            }
        }
        self.accept_and_commit(task).await
    }

    async fn develop(&mut self, task: &mut Task) -> ConclaveResult<Implementation> {
        let previous_review = task.current_review.as_ref().map(|r| {
            json!({
                "summary": r.summary,
                "issues": r.issues,
            })
        });
        let request = self
            .agents
            .developer
            .request(TaskKind::Development)
            .for_component(task.component_id.clone())
            .with_context(json!({
                "description": task.description,
                "architecture": task.architecture_context,
                "iteration": task.iteration_count,
                "previous_implementation": task.implementation,
                "review_feedback": previous_review,
            }));

        let response = Self::run_turn(&mut self.contexts, &self.agents.developer, &request).await?;
        let tokens = response.tokens_used;
        task.token_usage.record_development(tokens.total());
        self.tracker
            .record(AgentRole::Developer, Phase::Development, Some(task.id), tokens);

        let payload: ImplementationPayload = if response.assessment.is_null() {
            ImplementationPayload::default()
        } else {
            response.assessment_as()?
        };
        let content = if payload.content.is_empty() {
            response.summary.clone()
        } else {
            payload.content
        };
        if content.trim().is_empty() {
            return Err(ConclaveError::Validation(format!(
                "developer returned an empty implementation for {}",
                task.component_id
            )));
        }
        Ok(Implementation {
            content,
            files: payload.files,
            summary: response.summary,
            iteration: task.iteration_count,
        })
    }

    async fn review(&mut self, task: &mut Task) -> ConclaveResult<ReviewFeedback> {
        let request = self
            .agents
            .reviewer
            .request(TaskKind::Review)
            .for_component(task.component_id.clone())
            .with_context(json!({
                "description": task.description,
                "architecture": task.architecture_context,
                "implementation": task.implementation,
                "iteration": task.iteration_count,
            }));

        let response = Self::run_turn(&mut self.contexts, &self.agents.reviewer, &request).await?;
        let tokens = response.tokens_used;
        task.token_usage.record_review(tokens.total());
        self.tracker
            .record(AgentRole::Reviewer, Phase::Review, Some(task.id), tokens);

        let payload: DecisionPayload = response.assessment_as()?;
        for issue in &response.findings {
            issue.validate()?;
        }
        Ok(ReviewFeedback {
            decision: payload.decision,
            issues: response.findings,
            summary: response.summary,
            tokens_used: tokens,
            reviewer: self.agents.reviewer.id().to_string(),
            iteration: task.iteration_count,
            timestamp: Utc::now(),
        })
    }

    /// Optional acceptance gate, optional commit, then completion.
    async fn accept_and_commit(&mut self, task: &mut Task) -> ConclaveResult<()> {
        let mut reason = "approved by reviewer".to_string();

        if self.config.acceptance_gate {
            let request = self
                .agents
                .architect
                .request(TaskKind::Acceptance)
                .for_component(task.component_id.clone())
                .with_context(json!({
                    "description": task.description,
                    "architecture": task.architecture_context,
                    "implementation": task.implementation,
                    "reviews": task.review_history,
                }));
            let response =
                Self::run_turn(&mut self.contexts, &self.agents.architect, &request).await?;
            let tokens = response.tokens_used;
            task.token_usage.record_acceptance(tokens.total());
            self.tracker
                .record(AgentRole::Architect, Phase::Acceptance, Some(task.id), tokens);

            let payload: DecisionPayload = response.assessment_as()?;
            if payload.decision == ReviewDecision::Reject {
                warn!(task_id = %task.id, "Acceptance gate rejected task");
                self.state.approval_history.push(ApprovalRecord {
                    task_id: task.id,
                    component_id: task.component_id.clone(),
                    accepted: false,
                    commit_hash: None,
                    reason: response.summary.clone(),
                    timestamp: Utc::now(),
                });
                task.transition_to(TaskStatus::NeedsRevision)?;
                task.failure = Some(TaskFailure {
                    code: "ACCEPTANCE_REJECTED".to_string(),
                    message: response.summary,
                    at: Utc::now(),
                });
                return Ok(());
            }
            if !response.summary.is_empty() {
                reason = response.summary;
            }
        }

        let mut commit_hash = None;
        if self.config.auto_commit {
            if let Some(git) = self.git.clone() {
                let files = task
                    .implementation
                    .as_ref()
                    .map(|i| i.files.clone())
                    .unwrap_or_default();
                let message = format!("feat({}): {}", task.component_id, task.description);
                let info = git.commit(&message, &files).await?;
                commit_hash = Some(info.commit_hash);
            }
        }

        task.transition_to(TaskStatus::Completed)?;
        self.state.approval_history.push(ApprovalRecord {
            task_id: task.id,
            component_id: task.component_id.clone(),
            accepted: true,
            commit_hash,
            reason,
            timestamp: Utc::now(),
        });
        info!(task_id = %task.id, component = %task.component_id, "Task completed");
        Ok(())
    }

    /// Architecture, then every task in priority order.
    ///
    /// A failing task is recorded and the run moves on; only an architecture
    /// failure aborts.
    pub async fn orchestrate_workflow(&mut self, requirements: &str) -> ConclaveResult<WorkflowState> {
        let started = Instant::now();
        info!(project = %self.state.project_id, "Workflow: starting");

        self.start_architecture(requirements).await?;

        for id in self.state.tasks.ids_in_priority_order() {
            let Some(task) = self.state.tasks.get(id).cloned() else {
                continue;
            };
            if task.status == TaskStatus::Completed {
                continue;
            }
            if let Err(e) = self.execute_task_with_review_loop(task).await {
                warn!(task_id = %id, error = %e, "Task skipped");
            }
        }

        let total = self.state.tasks.total_count();
        let completed = self.state.tasks.count_with_status(TaskStatus::Completed);
        self.state.stage = if completed == total {
            WorkflowStage::Completed
        } else {
            WorkflowStage::Failed
        };

        let metrics = self.tracker.metrics();
        info!(
            completed,
            total,
            tokens = metrics.total.total_tokens(),
            cost = metrics.total.cost,
            duration_ms = started.elapsed().as_millis() as u64,
            "Workflow: finished"
        );
        Ok(self.state.clone())
    }

    /// Aggregated token usage by role, phase and task.
    pub fn get_token_metrics(&self) -> TokenMetrics {
        self.tracker.metrics()
    }

    /// Merge already collected responses.
    pub fn build_consensus(&self, responses: &[SourcedResponse]) -> ConclaveResult<ConsensusReport> {
        self.consensus.build(responses)
    }

    /// Run all three agents on the same artifact concurrently and merge what
    /// they report.
    ///
    /// Failed agents are left out of the merge; if every agent fails the last
    /// error is returned.
    pub async fn analyze_with_consensus(
        &mut self,
        component_ref: Option<&str>,
        context: serde_json::Value,
    ) -> ConclaveResult<ConsensusReport> {
        let agents = self.agents.all();
        let requests: Vec<AgentRequest> = agents
            .iter()
            .map(|agent| {
                let request = agent.request(TaskKind::Analysis).with_context(context.clone());
                match component_ref {
                    Some(c) => request.for_component(c),
                    None => request,
                }
            })
            .collect();

        let mut opened: Vec<&str> = Vec::new();
        for (agent, request) in agents.iter().zip(&requests) {
            let begun = self
                .contexts
                .begin_turn(agent.id())
                .and_then(|_| {
                    self.contexts
                        .push(agent.id(), EntryKind::Request, serde_json::to_string(request)?)
                });
            if let Err(e) = begun {
                self.contexts.end_turn(agent.id());
                for id in opened {
                    self.contexts.end_turn(id);
                }
                return Err(e);
            }
            opened.push(agent.id());
        }

        info!(agents = agents.len(), "Consensus analysis: fan-out");
        let results = join_all(
            agents
                .iter()
                .zip(&requests)
                .map(|(agent, request)| agent.analyze(request)),
        )
        .await;

        let mut responses = Vec::new();
        let mut last_error = None;
        for (agent, result) in agents.iter().zip(results) {
            match result {
                Ok(response) => {
                    if let Err(e) =
                        self.contexts
                            .push(agent.id(), EntryKind::Response, response.summary.clone())
                    {
                        warn!(agent = agent.id(), error = %e, "Context push failed");
                    }
                    self.tracker
                        .record(agent.role(), Phase::Analysis, None, response.tokens_used);
                    responses.push(SourcedResponse::new(agent.id(), response));
                }
                Err(e) => {
                    warn!(agent = agent.id(), error = %e, "Consensus participant failed");
                    last_error = Some(e);
                }
            }
            self.contexts.end_turn(agent.id());
        }

        if responses.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                ConclaveError::Consensus("no agent produced a response".to_string())
            }));
        }
        let report = self.consensus.build(&responses)?;
        info!(
            participants = report.participants.len(),
            findings = report.merged_findings.len(),
            agreement = report.overall_agreement,
            "Consensus analysis: merged"
        );
        Ok(report)
    }

    /// Structural summary: architecture, per-task iteration history and the
    /// approval log.
    pub fn summary(&self) -> WorkflowSummary {
        let tasks: Vec<TaskSummary> = self
            .state
            .tasks
            .in_priority_order()
            .into_iter()
            .map(|t| TaskSummary {
                task_id: t.id,
                component_id: t.component_id.clone(),
                priority: t.priority,
                status: t.status,
                iteration_count: t.iteration_count,
                max_iterations: t.max_iterations,
                iterations: t
                    .review_history
                    .iter()
                    .map(|r| IterationRecord {
                        iteration: r.iteration,
                        decision: r.decision,
                        issues: r.issues.len(),
                        reviewer: r.reviewer.clone(),
                        summary: r.summary.clone(),
                    })
                    .collect(),
                tokens: t.token_usage.total,
                failure: t.failure.clone(),
            })
            .collect();

        let metrics = self.tracker.metrics();
        WorkflowSummary {
            project_id: self.state.project_id.clone(),
            stage: self.state.stage,
            architecture: self.state.architecture.as_ref().map(|a| a.description.clone()),
            components: self.state.components.len(),
            completed: self.state.tasks.count_with_status(TaskStatus::Completed),
            needs_revision: self.state.tasks.count_with_status(TaskStatus::NeedsRevision),
            tasks,
            approval_history: self.state.approval_history.clone(),
            total_tokens: metrics.total.total_tokens(),
            total_cost: metrics.total.cost,
        }
    }

    /// One agent turn: open a clean context, call the agent, close the
    /// context whatever the outcome.
    async fn run_turn(
        contexts: &mut ContextManager,
        agent: &Agent,
        request: &AgentRequest,
    ) -> ConclaveResult<AgentResponse> {
        contexts.begin_turn(agent.id())?;
        let result = Self::call_in_turn(contexts, agent, request).await;
        contexts.end_turn(agent.id());
        result
    }

    async fn call_in_turn(
        contexts: &mut ContextManager,
        agent: &Agent,
        request: &AgentRequest,
    ) -> ConclaveResult<AgentResponse> {
        contexts.push(agent.id(), EntryKind::Request, serde_json::to_string(request)?)?;
        let response = agent.analyze(request).await?;
        contexts.push(agent.id(), EntryKind::Response, response.summary.clone())?;
        Ok(response)
    }
}

fn task_description(component: &Component) -> String {
    if !component.description.trim().is_empty() {
        return component.description.clone();
    }
    let name = if component.name.trim().is_empty() {
        &component.id
    } else {
        &component.name
    };
    format!("Implement {name}")
}
