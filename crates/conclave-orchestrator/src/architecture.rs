use crate::types::{ArchitectureSpec, Component};
use chrono::Utc;
use conclave_core::{AgentResponse, ConclaveError, ConclaveResult};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Assessment payload expected from an architecture request.
#[derive(Debug, Deserialize)]
struct ArchitecturePayload {
    #[serde(default)]
    description: String,
    components: Vec<Component>,
}

/// Parse the architect's response into a validated [`ArchitectureSpec`].
///
/// The assessment must look like
/// `{"description": "...", "components": [{"id": "...", "dependencies": [...]}, ...]}`.
/// When the description is empty the response summary is used instead.
pub fn parse_architecture(response: &AgentResponse) -> ConclaveResult<ArchitectureSpec> {
    let payload: ArchitecturePayload = response.assessment_as()?;
    validate_components(&payload.components)?;

    let description = if payload.description.trim().is_empty() {
        response.summary.clone()
    } else {
        payload.description
    };

    Ok(ArchitectureSpec {
        description,
        components: payload.components,
        tokens_used: response.tokens_used,
        created_at: Utc::now(),
    })
}

/// Check ids are present and unique and that dependencies form a DAG over
/// known components.
pub fn validate_components(components: &[Component]) -> ConclaveResult<()> {
    if components.is_empty() {
        return Err(ConclaveError::Validation(
            "architecture has no components".to_string(),
        ));
    }

    let mut ids = HashSet::new();
    for c in components {
        if c.id.trim().is_empty() {
            return Err(ConclaveError::Validation(
                "component with an empty id".to_string(),
            ));
        }
        if !ids.insert(c.id.as_str()) {
            return Err(ConclaveError::Validation(format!(
                "duplicate component id '{}'",
                c.id
            )));
        }
    }

    for c in components {
        for dep in &c.dependencies {
            if dep == &c.id {
                return Err(ConclaveError::Validation(format!(
                    "component '{}' depends on itself",
                    c.id
                )));
            }
            if !ids.contains(dep.as_str()) {
                return Err(ConclaveError::Validation(format!(
                    "component '{}' depends on unknown component '{}'",
                    c.id, dep
                )));
            }
        }
    }

    if has_cycle(components) {
        return Err(ConclaveError::Validation(
            "dependency cycle detected between components".to_string(),
        ));
    }
    Ok(())
}

/// Returns true if the component dependency graph contains a cycle.
fn has_cycle(components: &[Component]) -> bool {
    let by_id: HashMap<&str, &Component> =
        components.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut visited = HashMap::new();
    components
        .iter()
        .any(|c| dfs_cycle(c.id.as_str(), &by_id, &mut visited))
}

fn dfs_cycle<'a>(
    id: &'a str,
    by_id: &HashMap<&'a str, &'a Component>,
    visited: &mut HashMap<&'a str, u8>,
) -> bool {
    match visited.get(id) {
        Some(1) => return true,  // back edge = cycle
        Some(2) => return false, // already processed
        _ => {}
    }
    visited.insert(id, 1);
    if let Some(&component) = by_id.get(id) {
        for dep in &component.dependencies {
            if dfs_cycle(dep.as_str(), by_id, visited) {
                return true;
            }
        }
    }
    visited.insert(id, 2);
    false
}
