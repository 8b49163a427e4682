//! Splits the objective into dependency-ordered task components, once per task.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use taskpilot_core::error::ParseError;
use taskpilot_core::{ComponentType, TaskComponent};
use tracing::{debug, info, warn};

use crate::extract;
use crate::llm::OracleClient;
use crate::prompts::PromptKind;

pub struct TaskDecomposer {
    client: OracleClient,
}

impl TaskDecomposer {
    pub fn new(client: OracleClient) -> Self {
        Self { client }
    }

    /// Never fails: any oracle or parse trouble yields one `analysis`
    /// component covering the whole objective.
    pub async fn decompose(&self, objective: &str) -> Vec<TaskComponent> {
        let prompt = format!("Objective:\n{objective}");
        let text = match self
            .client
            .ask_structured(PromptKind::Decompose.system_prompt(), &prompt)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("Decomposition request failed, using a single component: {e}");
                return fallback(objective);
            }
        };

        match parse_components(&text) {
            Ok(components) => {
                info!(count = components.len(), "Objective decomposed");
                components
            }
            Err(e) => {
                debug!("{e}; using a single component");
                fallback(objective)
            }
        }
    }
}

pub fn fallback(objective: &str) -> Vec<TaskComponent> {
    vec![TaskComponent::new("c1", ComponentType::Analysis, objective)]
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    #[serde(default, alias = "component_id")]
    id: Option<serde_json::Value>,
    #[serde(default, rename = "type", alias = "component_type", alias = "kind")]
    kind: Option<String>,
    #[serde(default, alias = "desc", alias = "goal", alias = "task")]
    description: Option<String>,
    #[serde(default, alias = "is_optional")]
    optional: bool,
    #[serde(default, alias = "depends_on", alias = "dependsOn")]
    dependencies: Vec<serde_json::Value>,
    #[serde(default, alias = "requiredData", alias = "inputs")]
    required_data: Vec<String>,
    #[serde(default, alias = "producedData", alias = "outputs")]
    produced_data: Vec<String>,
}

/// Decode a component list from oracle text.
///
/// Accepts `{"components": [...]}` or a bare array. Entries that do not
/// decode, or have no description, are skipped; an empty result is an error.
pub fn parse_components(text: &str) -> Result<Vec<TaskComponent>, ParseError> {
    let json = extract::first_json(text).ok_or_else(|| ParseError::Decomposition("no JSON in response".into()))?;
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ParseError::Decomposition(e.to_string()))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("components").or_else(|| map.remove("tasks")) {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Err(ParseError::Decomposition("object has no component list".into())),
        },
        _ => return Err(ParseError::Decomposition("not a list".into())),
    };

    let raw: Vec<RawComponent> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .filter(|c: &RawComponent| c.description.as_deref().is_some_and(|d| !d.trim().is_empty()))
        .collect();
    if raw.is_empty() {
        return Err(ParseError::Decomposition("no usable components".into()));
    }

    Ok(order_by_dependencies(assign_ids(raw)))
}

fn id_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn assign_ids(raw: Vec<RawComponent>) -> Vec<TaskComponent> {
    let mut seen = HashSet::new();
    let mut by_raw_id: HashMap<String, String> = HashMap::new();
    let mut components = Vec::with_capacity(raw.len());
    let mut raw_deps = Vec::with_capacity(raw.len());

    for (index, item) in raw.into_iter().enumerate() {
        let base = item
            .id
            .as_ref()
            .and_then(id_text)
            .unwrap_or_else(|| format!("c{}", index + 1));
        let mut id = base.clone();
        let mut suffix = 2;
        while !seen.insert(id.clone()) {
            id = format!("{base}-{suffix}");
            suffix += 1;
        }
        by_raw_id.entry(base).or_insert_with(|| id.clone());

        let mut component = TaskComponent::new(
            id,
            parse_type(item.kind.as_deref().unwrap_or_default()),
            item.description.unwrap_or_default().trim(),
        );
        component.optional = item.optional;
        component.required_data = item.required_data;
        component.produced_data = item.produced_data;
        components.push(component);
        raw_deps.push(item.dependencies);
    }

    let ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
    for (component, deps) in components.iter_mut().zip(raw_deps) {
        let mut resolved = Vec::new();
        for dep in deps.iter().filter_map(id_text) {
            let target = by_raw_id.get(&dep).cloned().or_else(|| {
                // 1-based position, as oracles often number components
                dep.parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| ids.get(i).cloned())
            });
            match target {
                Some(t) if t != component.id && !resolved.contains(&t) => resolved.push(t),
                Some(_) => {}
                None => debug!(component = %component.id, dependency = %dep, "Dropping unknown dependency"),
            }
        }
        component.dependencies = resolved;
    }
    components
}

/// Stable topological order. When only cyclic components remain, the
/// earliest one loses its edges to unplaced components and is placed.
fn order_by_dependencies(mut pending: Vec<TaskComponent>) -> Vec<TaskComponent> {
    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|c| c.dependencies.iter().all(|d| placed.contains(d)));
        let index = match ready {
            Some(i) => i,
            None => {
                let breaking = &mut pending[0];
                warn!(component = %breaking.id, "Removing cyclic dependencies");
                breaking.dependencies.retain(|d| placed.contains(d));
                0
            }
        };
        let component = pending.remove(index);
        placed.insert(component.id.clone());
        ordered.push(component);
    }
    ordered
}

fn parse_type(name: &str) -> ComponentType {
    let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");
    match normalized.as_str() {
        "data_collection" | "collection" | "collect" | "gather" | "fetch" | "retrieval" | "input" => {
            ComponentType::DataCollection
        }
        "data_processing" | "processing" | "process" | "transform" | "transformation" | "computation" => {
            ComponentType::DataProcessing
        }
        "action_execution" | "action" | "execution" | "execute" => ComponentType::ActionExecution,
        "output" | "report" | "summary" | "presentation" | "response" | "delivery" => ComponentType::Output,
        _ => ComponentType::Analysis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedOracle;
    use std::sync::Arc;

    #[test]
    fn price_objective_decomposes_into_collection_then_analysis() {
        let text = r#"Here you go:
        {"components": [
            {"id": "c1", "type": "data_collection", "description": "Fetch latest price of X"},
            {"id": "c2", "type": "analysis", "description": "Summarize the trend", "dependencies": ["c1"]}
        ]}"#;
        let components = parse_components(text).unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].component_type, ComponentType::DataCollection);
        assert_eq!(components[1].component_type, ComponentType::Analysis);
        assert_eq!(components[1].dependencies, vec!["c1"]);
    }

    #[test]
    fn bare_array_with_synonyms_and_missing_ids() {
        let text = r#"[
            {"type": "Collection", "description": "get data"},
            {"type": "report", "description": "write it up", "depends_on": [1]},
            {"type": "mystery", "description": "think"}
        ]"#;
        let components = parse_components(text).unwrap();
        let ids: Vec<_> = components.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(components[0].component_type, ComponentType::DataCollection);
        assert_eq!(components[1].component_type, ComponentType::Output);
        assert_eq!(components[1].dependencies, vec!["c1"]);
        assert_eq!(components[2].component_type, ComponentType::Analysis);
    }

    #[test]
    fn dependencies_come_first() {
        let text = r#"[
            {"id": "report", "type": "output", "description": "report", "dependencies": ["fetch"]},
            {"id": "fetch", "type": "data_collection", "description": "fetch"}
        ]"#;
        let components = parse_components(text).unwrap();
        assert_eq!(components[0].id, "fetch");
        assert_eq!(components[1].id, "report");
    }

    #[test]
    fn cycles_and_unknown_dependencies_are_broken() {
        let text = r#"[
            {"id": "a", "type": "analysis", "description": "a", "dependencies": ["b", "ghost", "a"]},
            {"id": "b", "type": "analysis", "description": "b", "dependencies": ["a"]}
        ]"#;
        let components = parse_components(text).unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].id, "a");
        assert!(components[0].dependencies.is_empty());
        assert_eq!(components[1].dependencies, vec!["a"]);
    }

    #[test]
    fn duplicate_ids_are_suffixed() {
        let text = r#"[
            {"id": "x", "type": "analysis", "description": "one"},
            {"id": "x", "type": "analysis", "description": "two"}
        ]"#;
        let ids: Vec<_> = parse_components(text).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["x", "x-2"]);
    }

    #[test]
    fn malformed_output_is_a_parse_error() {
        assert!(parse_components("I cannot help with that").is_err());
        assert!(parse_components(r#"{"components": "none"}"#).is_err());
        assert!(parse_components(r#"[{"type": "analysis"}]"#).is_err());
    }

    #[tokio::test]
    async fn garbage_falls_back_to_single_component() {
        let oracle = Arc::new(ScriptedOracle::new().on(PromptKind::Decompose, "{{{ not json"));
        let decomposer = TaskDecomposer::new(OracleClient::new(oracle, "mock"));
        let components = decomposer.decompose("Do the thing").await;
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].component_type, ComponentType::Analysis);
        assert_eq!(components[0].description, "Do the thing");
    }

    #[tokio::test]
    async fn oracle_failure_falls_back_to_single_component() {
        let decomposer = TaskDecomposer::new(OracleClient::new(Arc::new(ScriptedOracle::new()), "mock"));
        assert_eq!(decomposer.decompose("anything").await.len(), 1);
    }
}
