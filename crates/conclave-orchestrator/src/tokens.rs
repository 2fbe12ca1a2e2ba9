use conclave_agent::Pricing;
use conclave_core::{AgentRole, ConclaveError, ConclaveResult, TokenCount};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Workflow phase a token expense belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Architecture,
    Development,
    Review,
    Acceptance,
    Analysis,
}

/// Accumulated usage for one aggregation key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Recorded calls.
    pub calls: u64,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Cost in the pricing currency.
    pub cost: f64,
}

impl UsageTotals {
    fn add(&mut self, tokens: TokenCount, cost: f64) {
        self.calls += 1;
        self.input_tokens += tokens.input;
        self.output_tokens += tokens.output;
        self.cost += cost;
    }

    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Snapshot of everything the tracker has accumulated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenMetrics {
    /// Usage per agent role.
    pub by_role: BTreeMap<AgentRole, UsageTotals>,
    /// Usage per workflow phase.
    pub by_phase: BTreeMap<Phase, UsageTotals>,
    /// Usage per task.
    pub by_task: BTreeMap<Uuid, UsageTotals>,
    /// Usage over all calls.
    pub total: UsageTotals,
}

/// Accumulates token usage and cost by role, phase and task.
///
/// Pure aggregation: every [`record`](Self::record) is a handful of hash map
/// updates.
#[derive(Debug, Clone)]
pub struct TokenTracker {
    pricing: HashMap<AgentRole, Pricing>,
    by_role: HashMap<AgentRole, UsageTotals>,
    by_phase: HashMap<Phase, UsageTotals>,
    by_task: HashMap<Uuid, UsageTotals>,
    total: UsageTotals,
}

impl TokenTracker {
    /// Create a tracker. Every role must have a price entry.
    pub fn new(pricing: HashMap<AgentRole, Pricing>) -> ConclaveResult<Self> {
        for role in AgentRole::ALL {
            if !pricing.contains_key(&role) {
                return Err(ConclaveError::Configuration(format!(
                    "no pricing configured for role {role}"
                )));
            }
        }
        Ok(Self {
            pricing,
            by_role: HashMap::new(),
            by_phase: HashMap::new(),
            by_task: HashMap::new(),
            total: UsageTotals::default(),
        })
    }

    /// Record one call's usage. Returns its cost.
    pub fn record(
        &mut self,
        role: AgentRole,
        phase: Phase,
        task_id: Option<Uuid>,
        tokens: TokenCount,
    ) -> f64 {
        let cost = self
            .pricing
            .get(&role)
            .map(|p| p.cost(tokens.input, tokens.output))
            .unwrap_or(0.0);

        self.by_role.entry(role).or_default().add(tokens, cost);
        self.by_phase.entry(phase).or_default().add(tokens, cost);
        if let Some(id) = task_id {
            self.by_task.entry(id).or_default().add(tokens, cost);
        }
        self.total.add(tokens, cost);
        cost
    }

    /// Usage for one task, if anything was recorded against it.
    pub fn task_usage(&self, task_id: Uuid) -> Option<UsageTotals> {
        self.by_task.get(&task_id).copied()
    }

    /// Prices registered for `role`.
    pub fn pricing(&self, role: AgentRole) -> Option<Pricing> {
        self.pricing.get(&role).copied()
    }

    /// Snapshot of all aggregates.
    pub fn metrics(&self) -> TokenMetrics {
        TokenMetrics {
            by_role: self.by_role.iter().map(|(k, v)| (*k, *v)).collect(),
            by_phase: self.by_phase.iter().map(|(k, v)| (*k, *v)).collect(),
            by_task: self.by_task.iter().map(|(k, v)| (*k, *v)).collect(),
            total: self.total,
        }
    }
}
