use conclave_agent::{ModelConfig, Pricing, ScriptStep};
use conclave_core::AgentRole;
use conclave_orchestrator::{default_profiles, WorkflowConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of `conclave.toml`.
#[derive(Debug, Deserialize)]
pub struct ConclaveConfig {
    #[serde(default = "default_project_id")]
    pub project_id: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Git working tree for commits. No commits without it.
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Base model expanded into one profile per role.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    /// Explicit per-role agents; these win over the base model.
    #[serde(default)]
    pub agents: Vec<ModelConfig>,
}

fn default_project_id() -> String {
    "conclave".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl ConclaveConfig {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Ok(toml::from_str(&raw)?)
    }

    /// Environment overrides (after `.env` is loaded).
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("CONCLAVE_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// One model config per role, in architect/developer/reviewer order.
    pub fn resolve_agents(&self) -> anyhow::Result<Vec<ModelConfig>> {
        let profiles = self.model.as_ref().map(default_profiles).unwrap_or_default();
        let mut resolved = Vec::with_capacity(AgentRole::ALL.len());
        for role in AgentRole::ALL {
            let explicit = self
                .agents
                .iter()
                .find(|a| a.agent_role().ok() == Some(role));
            let fallback = profiles.iter().find(|p| p.agent_role().ok() == Some(role));
            match explicit.or(fallback) {
                Some(config) => {
                    config.validate()?;
                    resolved.push(config.clone());
                }
                None => anyhow::bail!(
                    "no model configured for role '{role}': add [model] or an [[agents]] entry"
                ),
            }
        }
        for agent in &self.agents {
            agent.agent_role()?;
        }
        Ok(resolved)
    }

    /// Per-role prices as resolved for the run.
    pub fn pricing_table(&self) -> anyhow::Result<Vec<(AgentRole, String, Pricing)>> {
        self.resolve_agents()?
            .into_iter()
            .map(|c| -> anyhow::Result<_> { Ok((c.agent_role()?, c.model_id.clone(), c.pricing)) })
            .collect()
    }
}

/// Replay script for `conclave run`: the steps each role's backend plays back.
#[derive(Debug, Default, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub architect: Vec<ScriptStep>,
    #[serde(default)]
    pub developer: Vec<ScriptStep>,
    #[serde(default)]
    pub reviewer: Vec<ScriptStep>,
}

impl ReplayScript {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read script '{}': {}", path.display(), e)
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn steps_for(&mut self, role: AgentRole) -> Vec<ScriptStep> {
        match role {
            AgentRole::Architect => std::mem::take(&mut self.architect),
            AgentRole::Developer => std::mem::take(&mut self.developer),
            AgentRole::Reviewer => std::mem::take(&mut self.reviewer),
        }
    }
}
