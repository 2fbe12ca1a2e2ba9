use crate::backends::AgentBackend;
use crate::config::{ModelConfig, Pricing};
use crate::retry::RetryOrchestrator;
use conclave_core::{AgentRequest, AgentResponse, AgentRole, ConclaveError, ConclaveResult, TaskKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Role-specific behaviour, fixed when the agent is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleProfile {
    /// The bound role.
    pub role: AgentRole,
    /// Tool names advertised in every request.
    pub tools: Vec<String>,
    /// Task kinds this role serves.
    pub serves: &'static [TaskKind],
}

impl RoleProfile {
    /// Profile for `role`.
    pub fn for_role(role: AgentRole) -> Self {
        let (tools, serves): (&[&str], &'static [TaskKind]) = match role {
            AgentRole::Architect => (
                &["read_file", "search_code"],
                &[TaskKind::Architecture, TaskKind::Acceptance, TaskKind::Analysis],
            ),
            AgentRole::Developer => (
                &["read_file", "write_file", "run_tests", "search_code"],
                &[TaskKind::Development, TaskKind::Analysis],
            ),
            AgentRole::Reviewer => (
                &["read_file", "git_diff", "run_tests", "search_code"],
                &[TaskKind::Review, TaskKind::Analysis],
            ),
        };
        Self {
            role,
            tools: tools.iter().map(|t| (*t).to_string()).collect(),
            serves,
        }
    }
}

/// A model bound to one role, with retry protection around every call.
pub struct Agent {
    id: String,
    profile: RoleProfile,
    config: ModelConfig,
    backend: Arc<dyn AgentBackend>,
    retry: RetryOrchestrator,
}

impl Agent {
    /// Build an agent from its config. Unknown roles and invalid values are
    /// rejected with a configuration error.
    pub fn new(config: ModelConfig, backend: Arc<dyn AgentBackend>) -> ConclaveResult<Self> {
        config.validate()?;
        let role = config.agent_role()?;
        let retry = RetryOrchestrator::new(config.retry_policy.clone().unwrap_or_default())
            .with_timeout(Duration::from_millis(config.timeout_ms));
        let id = format!("{}:{}", role, config.model_id);
        info!(agent = %id, backend = backend.model_id(), "Agent created");
        Ok(Self {
            id,
            profile: RoleProfile::for_role(role),
            config,
            backend,
            retry,
        })
    }

    /// Stable identity, `role:model_id`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Role fixed at construction.
    pub fn role(&self) -> AgentRole {
        self.profile.role
    }

    /// Tools and task kinds for this role.
    pub fn profile(&self) -> &RoleProfile {
        &self.profile
    }

    /// Per-1k token prices.
    pub fn pricing(&self) -> Pricing {
        self.config.pricing
    }

    /// Model configuration the agent was built from.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// A request of `kind` pre-filled with this agent's role and tools.
    pub fn request(&self, kind: TaskKind) -> AgentRequest {
        AgentRequest::new(self.profile.role, kind).with_tools(self.profile.tools.clone())
    }

    /// Validate `request` against this agent and call the backend with retries.
    pub async fn analyze(&self, request: &AgentRequest) -> ConclaveResult<AgentResponse> {
        if request.role != self.profile.role {
            return Err(ConclaveError::Validation(format!(
                "request for role {} sent to agent {}",
                request.role, self.id
            )));
        }
        if !self.profile.serves.contains(&request.task_kind) {
            return Err(ConclaveError::Validation(format!(
                "agent {} does not serve {} requests",
                self.id, request.task_kind
            )));
        }
        request.validate()?;
        self.retry.call(self.backend.as_ref(), request).await
    }
}
