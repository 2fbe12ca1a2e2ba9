//! End-to-end workflow tests.
//!
//! Drives architecture, the development/review loop, the acceptance gate,
//! git commits and consensus mode through mock backends. Per-component
//! attempt counters live in a map owned by the test and shared with the
//! mocks.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use conclave_agent::{Agent, AgentBackend, ModelConfig, Pricing, RetryPolicy, ScriptStep, ScriptedBackend};
use conclave_core::{
    AgentRequest, AgentResponse, AgentRole, ConclaveError, ConclaveResult, Finding, Severity,
    TaskKind, TokenCount,
};
use conclave_orchestrator::*;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

type Counters = Arc<Mutex<HashMap<String, u32>>>;

// ---------------------------------------------------------------------------
// Mock backend, one per role, sharing the harness-owned counter map
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Behaviour {
    /// Reviewer approves once the developer made at least this many attempts.
    approve_from_attempt: u32,
    fail_development_of: Option<String>,
    accept: bool,
    /// Where the developer "writes" its files.
    workdir: Option<PathBuf>,
    fail_analysis: bool,
    /// Reported by the analysis instead of the shared SQL finding.
    analysis_finding: Option<Finding>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            approve_from_attempt: 1,
            fail_development_of: None,
            accept: true,
            workdir: None,
            fail_analysis: false,
            analysis_finding: None,
        }
    }
}

struct MockBackend {
    behaviour: Behaviour,
    counters: Counters,
}

fn architecture_response() -> AgentResponse {
    AgentResponse {
        summary: "Three layer inventory service".into(),
        tokens_used: TokenCount::new(200, 101),
        assessment: json!({
            "description": "Inventory service",
            "components": [
                {"id": "storage", "interfaces": ["Repository"], "success_criteria": ["persists items"]},
                {"id": "api", "dependencies": ["storage"], "interfaces": ["GET /items"]},
                {"id": "ui", "name": "Web UI", "dependencies": ["api"]}
            ]
        }),
        ..Default::default()
    }
}

fn decision(approve: bool) -> serde_json::Value {
    json!({ "decision": if approve { "approve" } else { "reject" } })
}

#[async_trait]
impl AgentBackend for MockBackend {
    async fn analyze(&self, request: &AgentRequest) -> ConclaveResult<AgentResponse> {
        let component = request.component_ref.clone().unwrap_or_default();
        match request.task_kind {
            TaskKind::Architecture => Ok(architecture_response()),
            TaskKind::Development => {
                if self.behaviour.fail_development_of.as_deref() == Some(component.as_str()) {
                    return Err(ConclaveError::Agent("invalid api key".into()));
                }
                let attempt = {
                    let mut counters = self.counters.lock().unwrap();
                    let n = counters.entry(component.clone()).or_insert(0);
                    *n += 1;
                    *n
                };
                let file = format!("{component}.rs");
                if let Some(dir) = &self.behaviour.workdir {
                    std::fs::write(dir.join(&file), format!("// {component} v{attempt}\n")).unwrap();
                }
                Ok(AgentResponse {
                    summary: format!("{component} attempt {attempt}"),
                    tokens_used: TokenCount::new(80, 20),
                    assessment: json!({
                        "content": format!("pub fn {component}() {{}} // v{attempt}"),
                        "files": [file],
                    }),
                    ..Default::default()
                })
            }
            TaskKind::Review => {
                let attempts = self
                    .counters
                    .lock()
                    .unwrap()
                    .get(&component)
                    .copied()
                    .unwrap_or(0);
                let approve = attempts >= self.behaviour.approve_from_attempt;
                let findings = if approve {
                    vec![]
                } else {
                    vec![Finding::new(
                        format!("{component}-missing-tests"),
                        "quality",
                        Severity::Medium,
                        "No tests cover the public interface",
                        0.8,
                    )]
                };
                Ok(AgentResponse {
                    findings,
                    summary: if approve { "looks good" } else { "needs work" }.into(),
                    tokens_used: TokenCount::new(40, 10),
                    assessment: decision(approve),
                })
            }
            TaskKind::Acceptance => Ok(AgentResponse {
                summary: if self.behaviour.accept { "accepted" } else { "does not meet criteria" }
                    .into(),
                tokens_used: TokenCount::new(10, 5),
                assessment: decision(self.behaviour.accept),
                ..Default::default()
            }),
            TaskKind::Analysis => {
                if self.behaviour.fail_analysis {
                    return Err(ConclaveError::Agent("backend unavailable".into()));
                }
                let finding = self.behaviour.analysis_finding.clone().unwrap_or_else(|| {
                    Finding::new(
                        "sql-1",
                        "security",
                        Severity::High,
                        "SQL injection in query builder",
                        0.9,
                    )
                    .with_location("src/db.rs:10")
                });
                Ok(AgentResponse {
                    findings: vec![finding],
                    summary: "one issue".into(),
                    tokens_used: TokenCount::new(30, 10),
                    ..Default::default()
                })
            }
        }
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

fn config(role: AgentRole) -> ModelConfig {
    let mut config = ModelConfig::new(role, "mock");
    config.retry_policy = Some(RetryPolicy {
        max_retries: 2,
        backoff_ms: 0,
    });
    config.pricing = Pricing::new(1.0, 2.0);
    config
}

fn agent(role: AgentRole, behaviour: &Behaviour, counters: &Counters) -> Agent {
    let backend = Arc::new(MockBackend {
        behaviour: behaviour.clone(),
        counters: counters.clone(),
    });
    Agent::new(config(role), backend).unwrap()
}

fn agents_with(
    architect: &Behaviour,
    developer: &Behaviour,
    reviewer: &Behaviour,
    counters: &Counters,
) -> WorkflowAgents {
    WorkflowAgents {
        architect: agent(AgentRole::Architect, architect, counters),
        developer: agent(AgentRole::Developer, developer, counters),
        reviewer: agent(AgentRole::Reviewer, reviewer, counters),
    }
}

fn manager(behaviour: Behaviour, workflow: WorkflowConfig, counters: &Counters) -> WorkflowManager {
    let agents = agents_with(&behaviour, &behaviour, &behaviour, counters);
    WorkflowManager::new("inventory", agents, workflow).unwrap()
}

fn counters() -> Counters {
    Arc::new(Mutex::new(HashMap::new()))
}

const REQUIREMENTS: &str = "Build an inventory service with storage, an HTTP API and a web UI.";

// ---------------------------------------------------------------------------
// Architecture and task materialisation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_one_task_per_component_in_priority_order() {
    let c = counters();
    let mut wm = manager(Behaviour::default(), WorkflowConfig::default(), &c);

    let spec = wm.start_architecture(REQUIREMENTS).await.unwrap();
    assert_eq!(spec.components.len(), 3);
    assert_eq!(wm.state().stage, WorkflowStage::Development);

    let tasks = wm.get_tasks();
    let listed: Vec<(&str, u32)> = tasks
        .iter()
        .map(|t| (t.component_id.as_str(), t.priority))
        .collect();
    assert_eq!(listed, vec![("storage", 1), ("api", 2), ("ui", 3)]);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    assert_eq!(tasks[2].description, "Implement Web UI");
    assert_eq!(tasks[1].architecture_context.dependencies, vec!["storage"]);

    // 301 architecture tokens over three tasks, remainder to the first
    let shares: Vec<u64> = tasks.iter().map(|t| t.token_usage.architecture).collect();
    assert_eq!(shares, vec![101, 100, 100]);
}

#[tokio::test]
async fn test_empty_requirements_rejected() {
    let c = counters();
    let mut wm = manager(Behaviour::default(), WorkflowConfig::default(), &c);
    let err = wm.start_architecture("   ").await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_malformed_architecture_fails_workflow() {
    let architect = Arc::new(ScriptedBackend::from_responses(
        "mock",
        vec![AgentResponse {
            assessment: json!({"description": "no components here"}),
            ..Default::default()
        }],
    ));
    let c = counters();
    let b = Behaviour::default();
    let agents = WorkflowAgents {
        architect: Agent::new(config(AgentRole::Architect), architect).unwrap(),
        developer: agent(AgentRole::Developer, &b, &c),
        reviewer: agent(AgentRole::Reviewer, &b, &c),
    };
    let mut wm = WorkflowManager::new("p", agents, WorkflowConfig::default()).unwrap();

    let err = wm.orchestrate_workflow(REQUIREMENTS).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(wm.state().stage, WorkflowStage::Failed);
    assert!(wm.get_tasks().is_empty());
}

// ---------------------------------------------------------------------------
// Feedback loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_workflow_completes() {
    let c = counters();
    let mut wm = manager(Behaviour::default(), WorkflowConfig::default(), &c);

    let state = wm.orchestrate_workflow(REQUIREMENTS).await.unwrap();
    assert_eq!(state.stage, WorkflowStage::Completed);
    assert_eq!(state.tasks.count_with_status(TaskStatus::Completed), 3);
    assert_eq!(state.approval_history.len(), 3);
    assert!(state.approval_history.iter().all(|a| a.accepted && a.commit_hash.is_none()));

    for task in wm.get_tasks() {
        assert!(task.has_approval());
        assert_eq!(task.iteration_count, 0);
        assert!(task.completed_at.is_some());
        // 101/100 architecture share + 100 development + 50 review
        assert!(task.token_usage.total == 250 || task.token_usage.total == 251);
    }

    // no turn left open, no context left behind
    for role in ["architect:mock", "developer:mock", "reviewer:mock"] {
        assert!(!wm.contexts().is_turn_open(role));
        assert!(wm.contexts().messages(role).is_empty());
    }

    let metrics = wm.get_token_metrics();
    assert_eq!(metrics.by_phase[&Phase::Development].calls, 3);
    assert_eq!(metrics.by_phase[&Phase::Review].calls, 3);
    assert_eq!(metrics.by_phase[&Phase::Architecture].total_tokens(), 301);
    assert_eq!(metrics.by_task.len(), 3);
    assert!(metrics.total.cost > 0.0);
}

#[tokio::test]
async fn test_rejection_then_approval() {
    let c = counters();
    let behaviour = Behaviour {
        approve_from_attempt: 2,
        ..Default::default()
    };
    let mut wm = manager(behaviour, WorkflowConfig::default(), &c);
    wm.start_architecture(REQUIREMENTS).await.unwrap();

    let task = wm.get_tasks().remove(0);
    let done = wm.execute_task_with_review_loop(task).await.unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.iteration_count, 1);
    assert_eq!(done.review_history.len(), 2);
    assert_eq!(done.review_history[0].decision, ReviewDecision::Reject);
    assert_eq!(done.review_history[0].issues.len(), 1);
    assert_eq!(done.token_usage.development, vec![100, 100]);
    assert_eq!(c.lock().unwrap()["storage"], 2);

    // stored back in the queue
    let stored = wm.state().tasks.get(done.id).unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.priority, 1);
}

#[tokio::test]
async fn test_iteration_budget_is_never_exceeded() {
    let c = counters();
    let behaviour = Behaviour {
        approve_from_attempt: u32::MAX,
        ..Default::default()
    };
    let workflow = WorkflowConfig {
        max_iterations: 3,
        ..Default::default()
    };
    let mut wm = manager(behaviour, workflow, &c);

    let state = wm.orchestrate_workflow(REQUIREMENTS).await.unwrap();
    assert_eq!(state.stage, WorkflowStage::Failed);

    for task in wm.get_tasks() {
        assert_eq!(task.status, TaskStatus::NeedsRevision);
        assert_eq!(task.iteration_count, task.max_iterations);
        assert_eq!(task.review_history.len(), 3);
        assert!(!task.has_approval());
        assert!(task.failure.is_none());
    }
    // exactly max_iterations development attempts per component
    let counts = c.lock().unwrap().clone();
    assert_eq!(counts.values().copied().collect::<Vec<_>>(), vec![3, 3, 3]);
    assert!(wm.state().tasks.is_settled());
}

#[tokio::test]
async fn test_exhausted_task_cannot_be_rerun() {
    let c = counters();
    let behaviour = Behaviour {
        approve_from_attempt: u32::MAX,
        ..Default::default()
    };
    let workflow = WorkflowConfig {
        max_iterations: 1,
        ..Default::default()
    };
    let mut wm = manager(behaviour, workflow, &c);
    wm.start_architecture(REQUIREMENTS).await.unwrap();

    let task = wm.get_tasks().remove(0);
    let task = wm.execute_task_with_review_loop(task).await.unwrap();
    assert_eq!(task.status, TaskStatus::NeedsRevision);

    let err = wm.execute_task_with_review_loop(task).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(c.lock().unwrap()["storage"], 1);
}

#[tokio::test]
async fn test_completed_task_cannot_be_rerun() {
    let c = counters();
    let mut wm = manager(Behaviour::default(), WorkflowConfig::default(), &c);
    wm.start_architecture(REQUIREMENTS).await.unwrap();
    let task = wm.get_tasks().remove(0);
    let done = wm.execute_task_with_review_loop(task).await.unwrap();
    assert!(wm.execute_task_with_review_loop(done).await.is_err());
}

#[tokio::test]
async fn test_stale_copy_does_not_rerun_completed_task() {
    let c = counters();
    let mut wm = manager(Behaviour::default(), WorkflowConfig::default(), &c);
    wm.start_architecture(REQUIREMENTS).await.unwrap();

    let stale = wm.get_tasks().remove(0);
    assert_eq!(stale.status, TaskStatus::Pending);
    let done = wm.execute_task_with_review_loop(stale.clone()).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    let err = wm.execute_task_with_review_loop(stale).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(c.lock().unwrap()["storage"], 1);
    assert_eq!(wm.state().approval_history.len(), 1);

    let stored = wm.state().tasks.get(done.id).unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.review_history.len(), 1);
}

#[tokio::test]
async fn test_task_outside_architecture_rejected() {
    let c = counters();
    let mut wm = manager(Behaviour::default(), WorkflowConfig::default(), &c);
    wm.start_architecture(REQUIREMENTS).await.unwrap();

    let ghost = Task::new("ghost", "Not in the architecture", ArchitectureContext::default(), 3);
    let err = wm.execute_task_with_review_loop(ghost).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(wm.state().tasks.total_count(), 3);
    assert!(wm.state().tasks.find_by_component("ghost").is_none());
    assert!(c.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_becomes_needs_revision_and_run_continues() {
    let c = counters();
    let behaviour = Behaviour {
        fail_development_of: Some("api".into()),
        ..Default::default()
    };
    let mut wm = manager(behaviour, WorkflowConfig::default(), &c);

    let state = wm.orchestrate_workflow(REQUIREMENTS).await.unwrap();
    assert_eq!(state.stage, WorkflowStage::Failed);

    let api = state.tasks.find_by_component("api").unwrap();
    assert_eq!(api.status, TaskStatus::NeedsRevision);
    assert_eq!(api.iteration_count, 0);
    let failure = api.failure.as_ref().unwrap();
    assert_eq!(failure.code, "AGENT_ERROR");
    assert!(failure.message.contains("invalid api key"));

    // later tasks still ran
    assert_eq!(
        state.tasks.find_by_component("ui").unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(
        state.tasks.find_by_component("storage").unwrap().status,
        TaskStatus::Completed
    );
    assert!(!wm.contexts().is_turn_open("developer:mock"));
}

#[tokio::test]
async fn test_rate_limited_developer_is_retried() {
    let c = counters();
    let b = Behaviour::default();
    let architect = Arc::new(ScriptedBackend::from_responses(
        "mock",
        vec![AgentResponse {
            tokens_used: TokenCount::new(10, 10),
            assessment: json!({"components": [{"id": "solo"}]}),
            ..Default::default()
        }],
    ));
    let developer = Arc::new(ScriptedBackend::new(
        "mock",
        vec![
            ScriptStep::Fail("429 Too Many Requests".into()),
            ScriptStep::Fail("rate limit exceeded".into()),
            ScriptStep::Respond(AgentResponse {
                summary: "done".into(),
                tokens_used: TokenCount::new(50, 50),
                assessment: json!({"content": "fn solo() {}"}),
                ..Default::default()
            }),
        ],
    ));
    let agents = WorkflowAgents {
        architect: Agent::new(config(AgentRole::Architect), architect).unwrap(),
        developer: Agent::new(config(AgentRole::Developer), developer.clone()).unwrap(),
        reviewer: agent(AgentRole::Reviewer, &b, &c),
    };
    // reviewer reads attempts from the shared map, which the scripted
    // developer never touches
    c.lock().unwrap().insert("solo".into(), 1);
    let mut wm = WorkflowManager::new("p", agents, WorkflowConfig::default()).unwrap();

    let state = wm.orchestrate_workflow("one component").await.unwrap();
    let task = state.tasks.find_by_component("solo").unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.token_usage.development, vec![100]);
    assert_eq!(developer.remaining().await, 0);
}

// ---------------------------------------------------------------------------
// Acceptance gate and git
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_acceptance_gate_rejection() {
    let c = counters();
    let behaviour = Behaviour {
        accept: false,
        ..Default::default()
    };
    let workflow = WorkflowConfig {
        acceptance_gate: true,
        ..Default::default()
    };
    let mut wm = manager(behaviour, workflow, &c);

    let state = wm.orchestrate_workflow(REQUIREMENTS).await.unwrap();
    assert_eq!(state.tasks.count_with_status(TaskStatus::NeedsRevision), 3);
    assert_eq!(state.approval_history.len(), 3);
    assert!(state.approval_history.iter().all(|a| !a.accepted));

    for task in wm.get_tasks() {
        assert!(task.has_approval());
        assert_eq!(task.token_usage.acceptance, 15);
        assert_eq!(task.failure.as_ref().unwrap().code, "ACCEPTANCE_REJECTED");
    }
    assert_eq!(wm.get_token_metrics().by_phase[&Phase::Acceptance].calls, 3);
}

#[tokio::test]
async fn test_acceptance_gate_accepts_and_commits() {
    let dir = tempfile::tempdir().unwrap();
    git2::Repository::init(dir.path()).unwrap();

    let c = counters();
    let behaviour = Behaviour {
        workdir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let workflow = WorkflowConfig {
        acceptance_gate: true,
        ..Default::default()
    };
    let git = Arc::new(Git2Committer::open(dir.path()).unwrap());
    let mut wm = manager(behaviour, workflow, &c).with_git(git);

    let state = wm.orchestrate_workflow(REQUIREMENTS).await.unwrap();
    assert_eq!(state.stage, WorkflowStage::Completed);
    assert!(state.approval_history.iter().all(|a| a.accepted));
    let hashes: Vec<&str> = state
        .approval_history
        .iter()
        .map(|a| a.commit_hash.as_deref().unwrap())
        .collect();
    assert_eq!(hashes.len(), 3);

    let repo = git2::Repository::open(dir.path()).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.id().to_string(), hashes[2]);
    assert_eq!(head.message(), Some("feat(ui): Implement Web UI"));
    assert_eq!(head.parent(0).unwrap().id().to_string(), hashes[1]);
}

struct BrokenGit;

#[async_trait]
impl GitCapability for BrokenGit {
    async fn commit(&self, _message: &str, _files: &[String]) -> ConclaveResult<CommitInfo> {
        Err(ConclaveError::Tool("git: index locked".into()))
    }
}

#[tokio::test]
async fn test_commit_failure_marks_needs_revision() {
    let c = counters();
    let mut wm = manager(Behaviour::default(), WorkflowConfig::default(), &c).with_git(Arc::new(BrokenGit));

    let state = wm.orchestrate_workflow(REQUIREMENTS).await.unwrap();
    assert_eq!(state.tasks.count_with_status(TaskStatus::NeedsRevision), 3);
    for task in wm.get_tasks() {
        assert_eq!(task.failure.as_ref().unwrap().code, "TOOL_ERROR");
        assert!(task.has_approval());
    }
    assert!(state.approval_history.is_empty());
}

#[tokio::test]
async fn test_auto_commit_disabled_skips_git() {
    let c = counters();
    let workflow = WorkflowConfig {
        auto_commit: false,
        ..Default::default()
    };
    let mut wm = manager(Behaviour::default(), workflow, &c).with_git(Arc::new(BrokenGit));
    let state = wm.orchestrate_workflow(REQUIREMENTS).await.unwrap();
    assert_eq!(state.stage, WorkflowStage::Completed);
}

// ---------------------------------------------------------------------------
// Consensus mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_consensus_mode_fans_out_to_all_roles() {
    let c = counters();
    let mut wm = manager(Behaviour::default(), WorkflowConfig::default(), &c);

    let report = wm
        .analyze_with_consensus(Some("storage"), json!({"artifact": "fn query(sql: &str) {}"}))
        .await
        .unwrap();
    assert_eq!(report.participants.len(), 3);
    assert_eq!(report.merged_findings.len(), 1);
    let merged = &report.merged_findings[0];
    assert_eq!(merged.consensus_level, ConsensusLevel::Unanimous);
    assert!((merged.agreement_score - 1.0).abs() < 1e-9);
    assert_eq!(report.total_tokens.total(), 120);

    let metrics = wm.get_token_metrics();
    assert_eq!(metrics.by_phase[&Phase::Analysis].calls, 3);
    for role in ["architect:mock", "developer:mock", "reviewer:mock"] {
        assert!(!wm.contexts().is_turn_open(role));
    }
}

#[tokio::test]
async fn test_consensus_mode_tolerates_partial_failure() {
    let c = counters();
    let ok = Behaviour::default();
    let broken = Behaviour {
        fail_analysis: true,
        ..Default::default()
    };
    let agents = agents_with(&ok, &ok, &broken, &c);
    let mut wm = WorkflowManager::new("p", agents, WorkflowConfig::default()).unwrap();

    let report = wm.analyze_with_consensus(None, json!({})).await.unwrap();
    assert_eq!(report.participants, vec!["architect:mock", "developer:mock"]);
}

#[tokio::test]
async fn test_consensus_mode_all_failed_returns_error() {
    let c = counters();
    let broken = Behaviour {
        fail_analysis: true,
        ..Default::default()
    };
    let mut wm = manager(broken, WorkflowConfig::default(), &c);
    let err = wm.analyze_with_consensus(None, json!({})).await.unwrap_err();
    assert_eq!(err.code(), "AGENT_ERROR");
    assert!(!wm.contexts().is_turn_open("reviewer:mock"));
}

#[tokio::test]
async fn test_consensus_mode_uses_configured_matcher() {
    let c = counters();
    let ok = Behaviour::default();
    let perf = Behaviour {
        analysis_finding: Some(
            Finding::new("perf-3", "performance", Severity::Low, "Query runs per row", 0.5)
                .with_location("src/db.rs:10"),
        ),
        ..Default::default()
    };

    // default matcher keeps the differently typed finding apart
    let mut plain = WorkflowManager::new(
        "p",
        agents_with(&ok, &ok, &perf, &c),
        WorkflowConfig::default(),
    )
    .unwrap();
    let report = plain.analyze_with_consensus(None, json!({})).await.unwrap();
    assert_eq!(report.merged_findings.len(), 2);
    assert_eq!(report.disagreement_hotspots.len(), 1);

    let same_location =
        |a: &Finding, b: &Finding| a.location.is_some() && a.location == b.location;
    let mut wm = WorkflowManager::new(
        "p",
        agents_with(&ok, &ok, &perf, &c),
        WorkflowConfig::default(),
    )
    .unwrap()
    .with_consensus_builder(ConsensusBuilder::new().with_matcher(same_location));
    let report = wm.analyze_with_consensus(None, json!({})).await.unwrap();

    assert_eq!(report.merged_findings.len(), 1);
    let merged = &report.merged_findings[0];
    assert_eq!(merged.finding.id, "sql-1");
    assert_eq!(merged.consensus_level, ConsensusLevel::Unanimous);
    assert_eq!(merged.confidences["reviewer:mock"], 0.5);
    assert!((merged.finding.confidence - (0.9 + 0.9 + 0.5) / 3.0).abs() < 1e-9);
    assert!(report.disagreement_hotspots.is_empty());
}

#[tokio::test]
async fn test_build_consensus_requires_responses() {
    let c = counters();
    let wm = manager(Behaviour::default(), WorkflowConfig::default(), &c);
    assert_eq!(wm.build_consensus(&[]).unwrap_err().code(), "CONSENSUS_ERROR");
}

// ---------------------------------------------------------------------------
// Construction and summary
// ---------------------------------------------------------------------------

#[test]
fn test_agent_in_wrong_slot_rejected() {
    let c = counters();
    let b = Behaviour::default();
    let agents = WorkflowAgents {
        architect: agent(AgentRole::Developer, &b, &c),
        developer: agent(AgentRole::Developer, &b, &c),
        reviewer: agent(AgentRole::Reviewer, &b, &c),
    };
    let err = WorkflowManager::new("p", agents, WorkflowConfig::default())
        .err()
        .unwrap();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn test_summary_reports_iterations_and_approvals() {
    let c = counters();
    let behaviour = Behaviour {
        approve_from_attempt: 2,
        ..Default::default()
    };
    let mut wm = manager(behaviour, WorkflowConfig::default(), &c);
    wm.orchestrate_workflow(REQUIREMENTS).await.unwrap();

    let summary = wm.summary();
    assert_eq!(summary.architecture.as_deref(), Some("Inventory service"));
    assert_eq!(summary.components, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.needs_revision, 0);
    assert_eq!(summary.tasks[0].iterations.len(), 2);
    assert_eq!(summary.tasks[0].iterations[0].decision, ReviewDecision::Reject);
    assert_eq!(summary.approval_history.len(), 3);
    assert_eq!(summary.total_tokens, wm.get_token_metrics().total.total_tokens());

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["stage"], "completed");
    assert_eq!(json["tasks"][1]["component_id"], "api");
}
