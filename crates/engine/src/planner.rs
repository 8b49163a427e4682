//! Produces the next action plan.
//!
//! Oracle output is untrusted text. It is reduced to the first complete JSON
//! object, decoded field by field with common aliases, corrected for
//! transposed action/service names, and only then turned into an
//! [`ExecutionPlan`]. Anything that does not decode becomes a reasoning plan
//! carrying the raw text.

use std::fmt::Write as _;

use taskpilot_core::error::ParseError;
use taskpilot_core::{CapabilityService, ExecutionPlan, PlanKind, WorkflowState};
use tracing::{debug, info, warn};

use crate::aliases::ServiceAliases;
use crate::extract;
use crate::llm::OracleClient;
use crate::naming::{self, FieldCorrection};
use crate::prompts::PromptKind;

const ACTION_KEYS: &[&str] = &["action", "action_name", "actionName", "tool", "tool_name", "toolName"];
const SERVICE_KEYS: &[&str] = &["service", "server_name", "serverName", "capability", "service_name", "server"];
const KIND_KEYS: &[&str] = &["action_type", "actionType", "type", "kind"];
const PARAM_KEYS: &[&str] = &["parameters", "params", "args", "arguments"];
const EXPECTED_KEYS: &[&str] = &["expected_output", "expectedOutput", "expected"];
const REASONING_KEYS: &[&str] = &["reasoning", "rationale", "thought"];

/// Action label for reasoning plans that name none.
pub const REASONING_ACTION: &str = "reasoning";

pub struct Planner {
    client: OracleClient,
    aliases: ServiceAliases,
}

impl Planner {
    pub fn new(client: OracleClient) -> Self {
        Self {
            client,
            aliases: ServiceAliases::default(),
        }
    }

    /// Alias names count as known services for the field-swap correction.
    pub fn with_aliases(mut self, aliases: ServiceAliases) -> Self {
        self.aliases = aliases;
        self
    }

    /// Plan the next step. Always returns a plan.
    pub async fn plan(&self, state: &WorkflowState, services: &[CapabilityService], context: &str) -> ExecutionPlan {
        let prompt = planning_prompt(state, services, context);
        let text = match self
            .client
            .ask_structured(PromptKind::Plan.system_prompt(), &prompt)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(iteration = state.iterations, "Planning request failed: {e}");
                return ExecutionPlan::reasoning(
                    REASONING_ACTION,
                    format!("Planning was unavailable ({e}). Work directly towards: {}", state.current_objective),
                );
            }
        };

        let mut known: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        let aliases = self.aliases.aliases_of(&known);
        known.extend(aliases);
        match parse_plan(&text, &known) {
            Ok(plan) => {
                info!(
                    iteration = state.iterations,
                    action = %plan.action,
                    kind = plan.kind_name(),
                    service = plan.service().unwrap_or("-"),
                    "Planned next step"
                );
                plan
            }
            Err(e) => {
                debug!("{e}; routing raw text through reasoning");
                fallback_plan(&text)
            }
        }
    }
}

/// Reasoning plan over the raw oracle text.
pub fn fallback_plan(raw: &str) -> ExecutionPlan {
    ExecutionPlan::reasoning(REASONING_ACTION, raw.trim())
}

fn field<'a>(map: &'a serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> Option<&'a serde_json::Value> {
    keys.iter().find_map(|k| map.get(*k)).filter(|v| !v.is_null())
}

fn text_field(map: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> String {
    match field(map, keys) {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn params_field(map: &serde_json::Map<String, serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
    match field(map, PARAM_KEYS) {
        Some(serde_json::Value::Object(params)) => params.clone(),
        // some oracles double-encode the arguments
        Some(serde_json::Value::String(s)) => match serde_json::from_str(s) {
            Ok(serde_json::Value::Object(params)) => params,
            _ => serde_json::Map::new(),
        },
        _ => serde_json::Map::new(),
    }
}

/// Decode one plan from oracle text. `known_services` feeds the field-swap
/// correction, which an explicit reasoning kind bypasses.
pub fn parse_plan(text: &str, known_services: &[&str]) -> Result<ExecutionPlan, ParseError> {
    let json = extract::first_object(text).ok_or_else(|| ParseError::Plan("no JSON object in response".into()))?;
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| ParseError::Plan(e.to_string()))?;
    let map = value
        .as_object()
        .ok_or_else(|| ParseError::Plan("plan is not an object".into()))?;

    let mut action = text_field(map, ACTION_KEYS);
    let mut service = text_field(map, SERVICE_KEYS);
    let kind = text_field(map, KIND_KEYS).to_lowercase();
    let wants_reasoning = kind.contains("reason") || kind.contains("think");

    if !wants_reasoning
        && naming::correct_fields(&mut action, &mut service, known_services) != FieldCorrection::Unchanged
    {
        debug!(action = %action, service = %service, "Corrected plan name fields");
    }

    let wants_call = ["capability", "tool", "call", "mcp", "service"]
        .iter()
        .any(|k| kind.contains(k));

    let plan_kind = if wants_reasoning || service.is_empty() {
        if wants_call && service.is_empty() {
            debug!(action = %action, "Capability call without a service, downgrading to reasoning");
        }
        PlanKind::Reasoning
    } else {
        PlanKind::CapabilityCall { service }
    };

    if action.is_empty() {
        if matches!(plan_kind, PlanKind::CapabilityCall { .. }) {
            action = naming::DEFAULT_ACTION.to_string();
        } else {
            action = REASONING_ACTION.to_string();
        }
    }

    Ok(ExecutionPlan {
        action,
        kind: plan_kind,
        arguments: params_field(map),
        expected_output: text_field(map, EXPECTED_KEYS),
        reasoning: text_field(map, REASONING_KEYS),
    })
}

fn planning_prompt(state: &WorkflowState, services: &[CapabilityService], context: &str) -> String {
    let mut p = String::new();
    let _ = writeln!(p, "Original objective: {}", state.original_objective);
    if state.current_objective != state.original_objective {
        let _ = writeln!(p, "Current focus: {}", state.current_objective);
    }
    let _ = writeln!(p, "Iteration: {} of {}", state.iterations, state.max_iterations);

    match state.last_step() {
        Some(step) if step.success => {
            let _ = writeln!(p, "Last step: #{} {} succeeded", step.step_number, step.plan.action);
        }
        Some(step) => {
            let _ = writeln!(
                p,
                "Last step: #{} {} failed: {}",
                step.step_number,
                step.plan.action,
                step.error.as_deref().unwrap_or("unknown error")
            );
        }
        None => {
            let _ = writeln!(p, "Last step: none yet");
        }
    }

    let _ = writeln!(p, "\nCompleted components:");
    for c in state.components().iter().filter(|c| c.completed) {
        let _ = writeln!(p, "- {} [{}] {}", c.id, c.component_type, c.description);
    }
    let _ = writeln!(p, "Remaining components:");
    for c in state.remaining_components() {
        let optional = if c.optional { " (optional)" } else { "" };
        let deps = if c.dependencies.is_empty() {
            String::new()
        } else {
            format!(" after {}", c.dependencies.join(", "))
        };
        let _ = writeln!(p, "- {} [{}]{optional}{deps} {}", c.id, c.component_type, c.description);
    }

    if !state.failures().is_empty() {
        let _ = writeln!(p, "\nFailed actions:");
        for f in state.failures() {
            let _ = writeln!(
                p,
                "- {}: {} attempt(s), strategy {}, last error: {}",
                f.action, f.attempts, f.strategy, f.last_error
            );
        }
    }

    let _ = writeln!(p, "\nAvailable services:");
    if services.is_empty() {
        let _ = writeln!(p, "(none; use reasoning)");
    }
    for s in services {
        let _ = writeln!(p, "- {}: {}", s.name, s.description);
        for t in &s.tools {
            let _ = writeln!(p, "  - {}: {}", t.name, t.description);
        }
    }

    if !context.is_empty() {
        let _ = writeln!(p, "\nResults so far:\n{context}");
    }
    p
}
