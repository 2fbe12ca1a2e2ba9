use crate::config::{ConclaveConfig, ReplayScript};
use conclave_agent::{Agent, ScriptedBackend};
use conclave_core::AgentResponse;
use conclave_orchestrator::{
    ConsensusBuilder, ConsensusReport, Git2Committer, SourcedResponse, WorkflowAgents,
    WorkflowManager, WorkflowSummary,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Files written by `conclave run`.
pub const ARCHITECTURE_FILE: &str = "architecture.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const HISTORY_FILE: &str = "history.json";

/// Replay a recorded session through the full workflow and dump the
/// architecture, token metrics and history into `data_dir`.
pub async fn run(
    config: &ConclaveConfig,
    requirements: &Path,
    script: &Path,
) -> anyhow::Result<WorkflowSummary> {
    let requirements = tokio::fs::read_to_string(requirements).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read requirements '{}': {}",
            requirements.display(),
            e
        )
    })?;
    let mut script = ReplayScript::load(script).await?;

    let mut agents = Vec::new();
    for model in config.resolve_agents()? {
        let role = model.agent_role()?;
        let backend = Arc::new(ScriptedBackend::new(
            model.model_id.clone(),
            script.steps_for(role),
        ));
        agents.push(Agent::new(model, backend)?);
    }
    let [architect, developer, reviewer]: [Agent; 3] = agents
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected exactly three agents"))?;

    let mut manager = WorkflowManager::new(
        config.project_id.clone(),
        WorkflowAgents {
            architect,
            developer,
            reviewer,
        },
        config.workflow.clone(),
    )?;
    if let Some(repo) = &config.repo_path {
        manager = manager.with_git(Arc::new(Git2Committer::open(repo)?));
        info!(repo = %repo.display(), "Git commits enabled");
    }

    let outcome = manager.orchestrate_workflow(&requirements).await;

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let summary = manager.summary();
    write_json(&config.data_dir.join(HISTORY_FILE), &summary).await?;
    write_json(&config.data_dir.join(METRICS_FILE), &manager.get_token_metrics()).await?;

    let state = outcome?;
    if let Some(architecture) = &state.architecture {
        write_json(&config.data_dir.join(ARCHITECTURE_FILE), architecture).await?;
    }
    info!(
        data_dir = %config.data_dir.display(),
        completed = summary.completed,
        needs_revision = summary.needs_revision,
        "Run artifacts written"
    );
    Ok(summary)
}

/// Merge saved agent responses.
///
/// Each file holds either `{"source": ..., "response": {...}}` or a bare
/// response, in which case the file stem names the source.
pub async fn consensus(files: &[PathBuf]) -> anyhow::Result<ConsensusReport> {
    let mut responses = Vec::with_capacity(files.len());
    for path in files {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read '{}': {}", path.display(), e))?;
        let sourced = match serde_json::from_str::<SourcedResponse>(&raw) {
            Ok(sourced) => sourced,
            Err(_) => {
                let response: AgentResponse = serde_json::from_str(&raw)?;
                let source = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                SourcedResponse::new(source, response)
            }
        };
        responses.push(sourced);
    }
    let report = ConsensusBuilder::new().build(&responses)?;
    if !report.disagreement_hotspots.is_empty() {
        warn!(
            hotspots = report.disagreement_hotspots.len(),
            "Agents disagree on some findings"
        );
    }
    Ok(report)
}

/// Rows of the pricing table.
pub fn pricing(config: &ConclaveConfig) -> anyhow::Result<Vec<String>> {
    let mut rows = vec![format!(
        "{:<10} {:<24} {:>12} {:>12}",
        "role", "model", "input/1k", "output/1k"
    )];
    for (role, model, price) in config.pricing_table()? {
        rows.push(format!(
            "{:<10} {:<24} {:>12.4} {:>12.4}",
            role.to_string(),
            model,
            price.input_price_per_1k,
            price.output_price_per_1k
        ));
    }
    Ok(rows)
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to write '{}': {}", path.display(), e))
}
