//! Decides whether the task is done and what to focus on next.
//!
//! The oracle's verdict is advisory. [`may_complete`] is the policy the
//! engine applies before marking a task complete.

use std::fmt::Write as _;

use serde::Deserialize;
use taskpilot_core::WorkflowState;
use taskpilot_core::error::ParseError;
use tracing::{debug, warn};

use crate::extract;
use crate::llm::OracleClient;
use crate::prompts::PromptKind;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observation {
    pub is_complete: bool,
    pub next_objective: Option<String>,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub critical_gaps: Vec<String>,
}

impl Observation {
    /// Keep going, no change of focus.
    pub fn proceed() -> Self {
        Self::default()
    }
}

#[derive(Deserialize)]
struct RawObservation {
    #[serde(default, alias = "isComplete", alias = "complete")]
    is_complete: bool,
    #[serde(default, alias = "nextObjective")]
    next_objective: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "criticalGaps")]
    critical_gaps: Vec<String>,
}

pub fn parse_observation(text: &str) -> Result<Observation, ParseError> {
    let json = extract::first_object(text).ok_or_else(|| ParseError::Observation("no JSON object".into()))?;
    let raw: RawObservation = serde_json::from_str(json).map_err(|e| ParseError::Observation(e.to_string()))?;

    let confidence = raw.confidence.unwrap_or(0.0);
    let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) as f32 } else { 0.0 };

    Ok(Observation {
        is_complete: raw.is_complete,
        next_objective: raw
            .next_objective
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        confidence,
        critical_gaps: raw.critical_gaps,
    })
}

/// Completion policy. The oracle must judge the task complete, and the
/// state must permit it: either every non-optional component is done, or
/// a `manual_intervention` failure blocks progress and at least one step
/// has already succeeded. Component progress alone never ends a task.
pub fn may_complete(state: &WorkflowState, observation: &Observation) -> bool {
    if !observation.is_complete {
        return false;
    }
    state.required_components_done()
        || (state.has_manual_intervention() && state.successful_steps().next().is_some())
}

pub struct Observer {
    client: OracleClient,
}

impl Observer {
    pub fn new(client: OracleClient) -> Self {
        Self { client }
    }

    /// Never fails; trouble means "continue".
    pub async fn observe(&self, state: &WorkflowState, context: &str) -> Observation {
        let prompt = observation_prompt(state, context);
        let text = match self
            .client
            .ask_structured(PromptKind::Observe.system_prompt(), &prompt)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(iteration = state.iterations, "Observation request failed: {e}");
                return Observation::proceed();
            }
        };
        parse_observation(&text).unwrap_or_else(|e| {
            debug!("{e}; continuing");
            Observation::proceed()
        })
    }
}

fn observation_prompt(state: &WorkflowState, context: &str) -> String {
    let mut p = String::new();
    let _ = writeln!(p, "Objective: {}", state.original_objective);
    let _ = writeln!(p, "\nSteps:");
    for step in state.steps() {
        let outcome = if step.success {
            "ok".to_string()
        } else {
            format!("failed: {}", step.error.as_deref().unwrap_or("unknown error"))
        };
        let _ = writeln!(p, "- #{} {} ({}) {outcome}", step.step_number, step.plan.action, step.plan.kind_name());
    }
    let _ = writeln!(p, "\nComponents:");
    for c in state.components() {
        let mark = if c.completed { "x" } else { " " };
        let optional = if c.optional { " (optional)" } else { "" };
        let _ = writeln!(p, "- [{mark}] {} [{}]{optional} {}", c.id, c.component_type, c.description);
    }
    if !state.failures().is_empty() {
        let _ = writeln!(p, "\nFailures:");
        for f in state.failures() {
            let _ = writeln!(p, "- {}: {} attempt(s), strategy {}", f.action, f.attempts, f.strategy);
        }
    }
    if !context.is_empty() {
        let _ = writeln!(p, "\nResults:\n{context}");
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedOracle;
    use serde_json::json;
    use std::sync::Arc;
    use taskpilot_core::{ComponentType, ExecutionPlan, FailureStrategy, TaskComponent};

    fn two_component_state() -> WorkflowState {
        let mut s = WorkflowState::new("t", "u", "a", "fetch and post", 10);
        s.set_components(vec![
            TaskComponent::new("c1", ComponentType::DataCollection, "fetch"),
            TaskComponent::new("c2", ComponentType::ActionExecution, "post").depends_on("c1"),
        ]);
        s
    }

    #[test]
    fn parses_snake_and_camel_case() {
        let snake = parse_observation(r#"{"is_complete": true, "next_objective": "", "confidence": 0.9}"#).unwrap();
        assert!(snake.is_complete);
        assert_eq!(snake.next_objective, None);

        let camel = parse_observation(
            r#"Verdict: {"isComplete": false, "nextObjective": "post it", "criticalGaps": ["no token"]}"#,
        )
        .unwrap();
        assert!(!camel.is_complete);
        assert_eq!(camel.next_objective.as_deref(), Some("post it"));
        assert_eq!(camel.critical_gaps, vec!["no token"]);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(parse_observation(r#"{"confidence": 7}"#).unwrap().confidence, 1.0);
        assert_eq!(parse_observation(r#"{"confidence": -2}"#).unwrap().confidence, 0.0);
    }

    #[test]
    fn oracle_cannot_complete_with_required_work_left() {
        let s = two_component_state();
        let eager = Observation {
            is_complete: true,
            ..Default::default()
        };
        assert!(!may_complete(&s, &eager));
    }

    #[test]
    fn optional_leftovers_do_not_block() {
        let mut s = WorkflowState::new("t", "u", "a", "o", 10);
        s.set_components(vec![
            TaskComponent::new("c1", ComponentType::Analysis, "answer"),
            TaskComponent::new("c2", ComponentType::Output, "extra chart").optional(),
        ]);
        s.complete_component("c1", 1);
        let done = Observation {
            is_complete: true,
            ..Default::default()
        };
        assert!(may_complete(&s, &done));
    }

    #[test]
    fn finished_components_still_need_the_verdict() {
        let mut s = two_component_state();
        s.complete_component("c1", 1);
        s.complete_component("c2", 2);
        assert!(s.required_components_done());
        assert!(!may_complete(&s, &Observation::proceed()));
    }

    #[test]
    fn manual_intervention_with_partial_value_may_complete() {
        let mut s = two_component_state();
        s.set_current_plan(ExecutionPlan::capability_call("prices", "get_price", Default::default()));
        s.record_step(json!(42), true, None).unwrap();
        s.complete_component("c1", 1);
        s.record_failure("postMessage", "401 Unauthorized", 2).strategy = FailureStrategy::ManualIntervention;

        let done = Observation {
            is_complete: true,
            ..Default::default()
        };
        assert!(may_complete(&s, &done));
        assert!(!may_complete(&s, &Observation::proceed()));
    }

    #[test]
    fn manual_intervention_without_results_may_not_complete() {
        let mut s = two_component_state();
        s.record_failure("get_price", "403 Forbidden", 2).strategy = FailureStrategy::ManualIntervention;
        let done = Observation {
            is_complete: true,
            ..Default::default()
        };
        assert!(!may_complete(&s, &done));
    }

    #[tokio::test]
    async fn unparseable_verdict_means_continue() {
        let oracle = Arc::new(ScriptedOracle::new().on(PromptKind::Observe, "Looks good to me!"));
        let observer = Observer::new(OracleClient::new(oracle, "mock"));
        let obs = observer.observe(&two_component_state(), "").await;
        assert_eq!(obs, Observation::proceed());
    }
}
