use super::AgentBackend;
use async_trait::async_trait;
use conclave_core::{AgentRequest, AgentResponse, ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::debug;

/// One step of a replay script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    /// Return this response.
    Respond(AgentResponse),
    /// Fail with an agent error carrying this message.
    Fail(String),
}

/// Backend that replays a fixed sequence of responses, one per call.
///
/// Used for offline replays of recorded sessions and in tests. Once the script
/// runs out every call fails with a non-retryable agent error.
pub struct ScriptedBackend {
    model_id: String,
    steps: Mutex<VecDeque<ScriptStep>>,
}

impl ScriptedBackend {
    /// Create a backend that will replay `steps` in order.
    pub fn new(model_id: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        Self {
            model_id: model_id.into(),
            steps: Mutex::new(steps.into()),
        }
    }

    /// Create a backend that only ever returns successful responses.
    pub fn from_responses(model_id: impl Into<String>, responses: Vec<AgentResponse>) -> Self {
        Self::new(
            model_id,
            responses.into_iter().map(ScriptStep::Respond).collect(),
        )
    }

    /// Append a step to the end of the script.
    pub async fn push(&self, step: ScriptStep) {
        self.steps.lock().await.push_back(step);
    }

    /// Number of steps not yet replayed.
    pub async fn remaining(&self) -> usize {
        self.steps.lock().await.len()
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn analyze(&self, request: &AgentRequest) -> ConclaveResult<AgentResponse> {
        let step = self.steps.lock().await.pop_front();
        debug!(
            model = %self.model_id,
            role = %request.role,
            kind = %request.task_kind,
            "Replaying scripted step"
        );
        match step {
            Some(ScriptStep::Respond(resp)) => Ok(resp),
            Some(ScriptStep::Fail(msg)) => Err(ConclaveError::Agent(msg)),
            None => Err(ConclaveError::Agent(format!(
                "script for '{}' exhausted",
                self.model_id
            ))),
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{AgentRole, TaskKind};

    fn request() -> AgentRequest {
        AgentRequest::new(AgentRole::Architect, TaskKind::Architecture)
    }

    #[tokio::test]
    async fn test_replays_in_order() {
        let backend = ScriptedBackend::new(
            "replay",
            vec![
                ScriptStep::Fail("rate limit".into()),
                ScriptStep::Respond(AgentResponse {
                    summary: "second".into(),
                    ..Default::default()
                }),
            ],
        );
        assert_eq!(backend.remaining().await, 2);
        assert!(backend.analyze(&request()).await.is_err());
        let ok = backend.analyze(&request()).await.unwrap();
        assert_eq!(ok.summary, "second");
        assert_eq!(backend.remaining().await, 0);
    }

    #[tokio::test]
    async fn test_exhausted_is_fatal() {
        let backend = ScriptedBackend::from_responses("replay", vec![]);
        let err = backend.analyze(&request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn test_step_json_shape() {
        let steps: Vec<ScriptStep> = serde_json::from_str(
            r#"[{"fail": "HTTP 429"}, {"respond": {"summary": "ok"}}]"#,
        )
        .unwrap();
        assert!(matches!(steps[0], ScriptStep::Fail(_)));
        assert!(matches!(steps[1], ScriptStep::Respond(_)));
    }
}
