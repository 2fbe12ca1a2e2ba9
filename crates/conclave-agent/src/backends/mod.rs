/// Replay backend for tests and recorded sessions.
pub mod scripted;

use async_trait::async_trait;
use conclave_core::{AgentRequest, AgentResponse, ConclaveResult};

/// The agent capability: given a structured request, return a structured
/// response or fail.
///
/// Implementations own the transport to a model provider. Failures should be
/// reported as [`conclave_core::ConclaveError::Agent`] with the provider's
/// message so the retry orchestrator can classify them; failures of
/// side-effecting tools invoked while serving the request must be reported as
/// [`conclave_core::ConclaveError::Tool`].
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Serve one request.
    async fn analyze(&self, request: &AgentRequest) -> ConclaveResult<AgentResponse>;

    /// Model identifier, used in logs and agent ids.
    fn model_id(&self) -> &str;
}
