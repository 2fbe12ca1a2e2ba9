use crate::{ConclaveError, ConclaveResult, Finding};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Role an agent is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Turns requirements into an architecture and gates final acceptance.
    Architect,
    /// Produces implementations for components.
    Developer,
    /// Evaluates implementations and approves or rejects them.
    Reviewer,
}

impl AgentRole {
    /// All roles, in workflow order.
    pub const ALL: [AgentRole; 3] = [AgentRole::Architect, AgentRole::Developer, AgentRole::Reviewer];
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Architect => write!(f, "architect"),
            AgentRole::Developer => write!(f, "developer"),
            AgentRole::Reviewer => write!(f, "reviewer"),
        }
    }
}

impl FromStr for AgentRole {
    type Err = ConclaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "architect" => Ok(AgentRole::Architect),
            "developer" => Ok(AgentRole::Developer),
            "reviewer" => Ok(AgentRole::Reviewer),
            other => Err(ConclaveError::Configuration(format!(
                "unknown agent role '{other}'"
            ))),
        }
    }
}

/// What the agent is being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Derive an architecture specification from requirements.
    Architecture,
    /// Implement (or revise) one component.
    Development,
    /// Review one component's implementation.
    Review,
    /// Final acceptance gate for an approved component.
    Acceptance,
    /// Independent analysis of an artifact, merged through consensus.
    Analysis,
}

impl TaskKind {
    /// The role that must serve this kind of request, if any is mandated.
    pub fn required_role(self) -> Option<AgentRole> {
        match self {
            TaskKind::Architecture | TaskKind::Acceptance => Some(AgentRole::Architect),
            TaskKind::Development => Some(AgentRole::Developer),
            TaskKind::Review => Some(AgentRole::Reviewer),
            TaskKind::Analysis => None,
        }
    }

    fn needs_component(self) -> bool {
        matches!(
            self,
            TaskKind::Development | TaskKind::Review | TaskKind::Acceptance
        )
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Architecture => write!(f, "architecture"),
            TaskKind::Development => write!(f, "development"),
            TaskKind::Review => write!(f, "review"),
            TaskKind::Acceptance => write!(f, "acceptance"),
            TaskKind::Analysis => write!(f, "analysis"),
        }
    }
}

/// Structured request handed to an agent's `analyze` capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Component this request concerns, if any.
    #[serde(default)]
    pub component_ref: Option<String>,
    /// Role expected to serve the request.
    pub role: AgentRole,
    /// Kind of work requested.
    pub task_kind: TaskKind,
    /// Free-form structured context (requirements, prior review, artifact...).
    #[serde(default)]
    pub context: serde_json::Value,
    /// Names of the tools the agent may call while serving the request.
    #[serde(default)]
    pub available_tool_names: Vec<String>,
}

impl AgentRequest {
    /// Creates a request with an empty context and no tools.
    pub fn new(role: AgentRole, task_kind: TaskKind) -> Self {
        Self {
            component_ref: None,
            role,
            task_kind,
            context: serde_json::Value::Null,
            available_tool_names: Vec::new(),
        }
    }

    /// Sets the component reference.
    pub fn for_component(mut self, component_ref: impl Into<String>) -> Self {
        self.component_ref = Some(component_ref.into());
        self
    }

    /// Sets the structured context.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Sets the tools available to the agent.
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tool_names = tools;
        self
    }

    /// Checks the role/kind pairing and the presence of a component reference.
    pub fn validate(&self) -> ConclaveResult<()> {
        if let Some(required) = self.task_kind.required_role() {
            if required != self.role {
                return Err(ConclaveError::Validation(format!(
                    "{} requests must be served by the {} role, not {}",
                    self.task_kind, required, self.role
                )));
            }
        }
        if self.task_kind.needs_component()
            && self
                .component_ref
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
        {
            return Err(ConclaveError::Validation(format!(
                "{} requests require a component reference",
                self.task_kind
            )));
        }
        Ok(())
    }
}

/// Token counts reported for one agent call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    /// Prompt tokens.
    pub input: u64,
    /// Completion tokens.
    pub output: u64,
}

impl TokenCount {
    /// Creates a token count.
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Input plus output.
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

impl std::ops::AddAssign for TokenCount {
    fn add_assign(&mut self, rhs: Self) {
        self.input += rhs.input;
        self.output += rhs.output;
    }
}

/// Structured response returned by an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Issues the agent reported.
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// One-paragraph summary.
    #[serde(default)]
    pub summary: String,
    /// Tokens consumed by the call.
    #[serde(default)]
    pub tokens_used: TokenCount,
    /// Task-kind specific payload (architecture, implementation, decision...).
    #[serde(default)]
    pub assessment: serde_json::Value,
}

impl AgentResponse {
    /// Decodes the assessment payload into a typed value.
    ///
    /// A payload that does not match `T` is a [`ConclaveError::Validation`].
    pub fn assessment_as<T: DeserializeOwned>(&self) -> ConclaveResult<T> {
        serde_json::from_value(self.assessment.clone()).map_err(|e| {
            ConclaveError::Validation(format!("malformed assessment payload: {e}"))
        })
    }
}
