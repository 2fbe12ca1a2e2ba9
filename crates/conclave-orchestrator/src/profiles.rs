use conclave_agent::ModelConfig;
use conclave_core::AgentRole;

/// One model config per role, derived from `base`.
///
/// The architect gets more room to think, the developer and reviewer run
/// cooler. Everything else (model, timeout, retry, pricing) is inherited.
pub fn default_profiles(base: &ModelConfig) -> Vec<ModelConfig> {
    vec![
        architect_profile(base),
        developer_profile(base),
        reviewer_profile(base),
    ]
}

fn architect_profile(base: &ModelConfig) -> ModelConfig {
    let mut model = base.clone();
    model.role = AgentRole::Architect.to_string();
    model.temperature = 0.4;
    model.max_tokens = base.max_tokens.max(8192);
    model
}

fn developer_profile(base: &ModelConfig) -> ModelConfig {
    let mut model = base.clone();
    model.role = AgentRole::Developer.to_string();
    model.temperature = 0.2;
    model
}

fn reviewer_profile(base: &ModelConfig) -> ModelConfig {
    let mut model = base.clone();
    model.role = AgentRole::Reviewer.to_string();
    model.temperature = 0.1;
    model
}
