use crate::retry::RetryPolicy;
use conclave_core::{AgentRole, ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};

/// Per-1k-token prices for one role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Price per 1000 input tokens.
    pub input_price_per_1k: f64,
    /// Price per 1000 output tokens.
    pub output_price_per_1k: f64,
}

impl Pricing {
    /// Creates a price entry.
    pub fn new(input_price_per_1k: f64, output_price_per_1k: f64) -> Self {
        Self {
            input_price_per_1k,
            output_price_per_1k,
        }
    }

    /// Cost of the given token counts under this pricing.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_price_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_price_per_1k
    }
}

/// Configuration of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Role name; resolved once when the agent is built.
    pub role: String,
    /// Provider model identifier.
    pub model_id: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Output token ceiling per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound for a single remote call, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries for transient failures; none when absent.
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Token prices for cost accounting.
    #[serde(default)]
    pub pricing: Pricing,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_ms() -> u64 {
    120_000
}

impl ModelConfig {
    /// Creates a config with default tuning values.
    pub fn new(role: AgentRole, model_id: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            model_id: model_id.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_timeout_ms(),
            retry_policy: None,
            pricing: Pricing::default(),
        }
    }

    /// Resolves the configured role name.
    pub fn agent_role(&self) -> ConclaveResult<AgentRole> {
        self.role.parse()
    }

    /// Rejects empty model ids, unknown roles and nonsensical values.
    pub fn validate(&self) -> ConclaveResult<()> {
        self.agent_role()?;
        if self.model_id.trim().is_empty() {
            return Err(ConclaveError::Configuration(format!(
                "{} agent has an empty model_id",
                self.role
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ConclaveError::Configuration(format!(
                "{} agent timeout_ms must be positive",
                self.role
            )));
        }
        if self.pricing.input_price_per_1k < 0.0 || self.pricing.output_price_per_1k < 0.0 {
            return Err(ConclaveError::Configuration(format!(
                "{} agent has negative pricing",
                self.role
            )));
        }
        Ok(())
    }
}
