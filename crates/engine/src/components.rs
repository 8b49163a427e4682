//! Best-effort progress tracking: which components did a step complete?
//!
//! This is approximate. A step completes a component when its action name
//! carries a keyword typical of the component's type ("get" for data
//! collection, "summar" for analysis...), or, failing any keyword match,
//! when the step's wording overlaps the component description. Action names
//! that follow no convention can be misattributed or missed; the observer
//! still has the last word on completion.

use std::collections::HashSet;

use taskpilot_core::{ComponentType, ExecutionStep, TaskComponent, WorkflowState};
use tracing::debug;

fn keywords(kind: ComponentType) -> &'static [&'static str] {
    match kind {
        ComponentType::DataCollection => &[
            "get", "fetch", "list", "search", "read", "query", "retrieve", "find", "download", "collect", "lookup",
        ],
        ComponentType::DataProcessing => &[
            "process", "transform", "convert", "parse", "filter", "calculat", "comput", "aggregat", "extract",
            "sort",
        ],
        ComponentType::ActionExecution => &[
            "send", "post", "create", "update", "delete", "write", "upload", "schedule", "execute", "run", "add",
            "notify",
        ],
        ComponentType::Analysis => &["analy", "summar", "evaluat", "compar", "assess", "review", "reason", "trend"],
        ComponentType::Output => &["summar", "report", "format", "present", "output", "respond", "compose", "answer"],
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 4)
        .map(str::to_lowercase)
        .collect()
}

fn keyword_match(component: &TaskComponent, action: &str) -> bool {
    keywords(component.component_type).iter().any(|k| action.contains(k))
}

fn overlap_match(component: &TaskComponent, step: &ExecutionStep) -> bool {
    let wording = format!("{} {} {}", step.plan.action, step.plan.expected_output, step.plan.reasoning);
    let step_tokens = tokens(&wording.replace('_', " "));
    tokens(&component.description)
        .iter()
        .any(|t| step_tokens.contains(t))
}

/// Mark components completed by `step_number`. Returns the ids completed.
///
/// Only successful steps count, and a component is only eligible once all
/// of its dependencies are complete. Keyword matches may chain within one
/// step (a "summarize" step can close both an analysis and a dependent
/// output component); the overlap fallback completes at most one.
pub fn update_progress(state: &mut WorkflowState, step_number: usize) -> Vec<String> {
    let Some(step) = state.step(step_number).filter(|s| s.success).cloned() else {
        return Vec::new();
    };
    let action = step.plan.action.to_lowercase();

    let mut completed = Vec::new();
    let candidates: Vec<TaskComponent> = state.remaining_components().cloned().collect();

    for component in &candidates {
        let ready = component
            .dependencies
            .iter()
            .all(|d| state.is_component_complete(d));
        if ready && keyword_match(component, &action) && state.complete_component(&component.id, step_number) {
            completed.push(component.id.clone());
        }
    }

    if completed.is_empty() {
        let eligible = candidates.iter().find(|c| {
            c.dependencies.iter().all(|d| state.is_component_complete(d)) && overlap_match(c, &step)
        });
        if let Some(component) = eligible {
            if state.complete_component(&component.id, step_number) {
                completed.push(component.id.clone());
            }
        }
    }

    if !completed.is_empty() {
        debug!(step = step_number, components = ?completed, "Components completed");
    }
    completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskpilot_core::ExecutionPlan;

    fn state() -> WorkflowState {
        let mut s = WorkflowState::new("t", "u", "a", "fetch latest price of X and summarize the trend", 10);
        s.set_components(vec![
            TaskComponent::new("c1", ComponentType::DataCollection, "Fetch latest price of X"),
            TaskComponent::new("c2", ComponentType::Analysis, "Summarize the price trend").depends_on("c1"),
        ]);
        s
    }

    fn run_step(s: &mut WorkflowState, plan: ExecutionPlan, ok: bool) -> Vec<String> {
        s.set_current_plan(plan);
        let n = s.record_step(json!("result"), ok, None).unwrap().step_number;
        update_progress(s, n)
    }

    #[test]
    fn fetch_then_summarize_completes_both() {
        let mut s = state();
        let fetched = run_step(&mut s, ExecutionPlan::capability_call("prices", "get_price", Default::default()), true);
        assert_eq!(fetched, vec!["c1"]);
        let summarized = run_step(&mut s, ExecutionPlan::reasoning("summarize_trend", ""), true);
        assert_eq!(summarized, vec!["c2"]);
        assert!(s.required_components_done());
        assert_eq!(s.components()[1].completing_steps, vec![2]);
    }

    #[test]
    fn dependencies_gate_completion() {
        let mut s = state();
        let done = run_step(&mut s, ExecutionPlan::reasoning("summarize_trend", ""), true);
        assert!(done.is_empty());
        assert!(!s.is_component_complete("c2"));
    }

    #[test]
    fn failed_steps_complete_nothing() {
        let mut s = state();
        let done = run_step(&mut s, ExecutionPlan::capability_call("prices", "get_price", Default::default()), false);
        assert!(done.is_empty());
    }

    #[test]
    fn description_overlap_is_the_fallback() {
        let mut s = WorkflowState::new("t", "u", "a", "o", 10);
        s.set_components(vec![TaskComponent::new(
            "c1",
            ComponentType::ActionExecution,
            "Invite the marketing team",
        )]);
        let done = run_step(&mut s, ExecutionPlan::reasoning("marketing_invitations", ""), true);
        assert_eq!(done, vec!["c1"]);
    }

    #[test]
    fn keyword_matches_chain_through_dependencies() {
        let mut s = WorkflowState::new("t", "u", "a", "o", 10);
        s.set_components(vec![
            TaskComponent::new("c1", ComponentType::Analysis, "analyze"),
            TaskComponent::new("c2", ComponentType::Output, "present").depends_on("c1"),
        ]);
        let done = run_step(&mut s, ExecutionPlan::reasoning("summarize", ""), true);
        assert_eq!(done, vec!["c1", "c2"]);
    }
}
