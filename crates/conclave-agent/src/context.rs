use chrono::{DateTime, Utc};
use conclave_core::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Default per-agent capacity, in entries.
pub const DEFAULT_CONTEXT_CAPACITY: usize = 100;

/// Who produced a context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Something sent to the agent.
    Request,
    /// Something the agent answered.
    Response,
}

/// One entry in an agent's conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// What produced the entry.
    pub kind: EntryKind,
    /// Entry text.
    pub content: String,
    /// When the entry was pushed.
    pub timestamp: DateTime<Utc>,
}

/// Conversation state of a single agent.
#[derive(Debug)]
struct AgentContext {
    entries: Vec<ContextEntry>,
    capacity: usize,
    turn_open: bool,
}

impl AgentContext {
    fn truncate(&mut self) {
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
    }
}

/// Per-agent isolated conversation state.
///
/// Entries live only inside a turn: [`begin_turn`](Self::begin_turn) starts
/// from an empty context and [`end_turn`](Self::end_turn) clears it again, so
/// nothing leaks from one task or phase into the next. Opening a turn twice
/// or pushing outside a turn is rejected. Each context also has a hard
/// capacity; the oldest entries are evicted once it is exceeded.
#[derive(Debug)]
pub struct ContextManager {
    contexts: HashMap<String, AgentContext>,
    default_capacity: usize,
}

impl ContextManager {
    /// Manager with [`DEFAULT_CONTEXT_CAPACITY`] per context.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CONTEXT_CAPACITY)
    }

    /// Manager whose new contexts hold at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            contexts: HashMap::new(),
            default_capacity: capacity.max(1),
        }
    }

    /// Create an empty context for `agent_id`, replacing any existing one.
    pub fn create(&mut self, agent_id: &str) {
        self.contexts.insert(
            agent_id.to_string(),
            AgentContext {
                entries: Vec::new(),
                capacity: self.default_capacity,
                turn_open: false,
            },
        );
    }

    /// Start an agent's turn with a clean context.
    pub fn begin_turn(&mut self, agent_id: &str) -> ConclaveResult<()> {
        if !self.contexts.contains_key(agent_id) {
            self.create(agent_id);
        }
        let ctx = self.context_mut(agent_id)?;
        if ctx.turn_open {
            return Err(ConclaveError::Validation(format!(
                "agent '{agent_id}' already has an open turn"
            )));
        }
        ctx.entries.clear();
        ctx.turn_open = true;
        debug!(agent = agent_id, "Context turn opened");
        Ok(())
    }

    /// Append an entry to an agent's open turn.
    pub fn push(&mut self, agent_id: &str, kind: EntryKind, content: impl Into<String>) -> ConclaveResult<()> {
        let ctx = self.context_mut(agent_id)?;
        if !ctx.turn_open {
            return Err(ConclaveError::Validation(format!(
                "agent '{agent_id}' has no open turn"
            )));
        }
        ctx.entries.push(ContextEntry {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        });
        ctx.truncate();
        Ok(())
    }

    /// Close an agent's turn and drop everything it accumulated.
    ///
    /// Closing a turn that is not open is a no-op so error paths can always
    /// call this.
    pub fn end_turn(&mut self, agent_id: &str) {
        if let Some(ctx) = self.contexts.get_mut(agent_id) {
            ctx.entries.clear();
            ctx.turn_open = false;
            debug!(agent = agent_id, "Context turn closed");
        }
    }

    /// Drop an agent's entries without touching the turn state.
    pub fn clear(&mut self, agent_id: &str) {
        if let Some(ctx) = self.contexts.get_mut(agent_id) {
            ctx.entries.clear();
        }
    }

    /// Entries currently held for `agent_id`.
    pub fn messages(&self, agent_id: &str) -> &[ContextEntry] {
        self.contexts
            .get(agent_id)
            .map(|c| c.entries.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `agent_id` is inside a turn.
    pub fn is_turn_open(&self, agent_id: &str) -> bool {
        self.contexts.get(agent_id).is_some_and(|c| c.turn_open)
    }

    /// Rough token estimation (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self, agent_id: &str) -> usize {
        self.messages(agent_id)
            .iter()
            .map(|e| e.content.len() / 4)
            .sum()
    }

    fn context_mut(&mut self, agent_id: &str) -> ConclaveResult<&mut AgentContext> {
        self.contexts.get_mut(agent_id).ok_or_else(|| {
            ConclaveError::Validation(format!("no context exists for agent '{agent_id}'"))
        })
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}
