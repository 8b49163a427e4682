//! Workflow state: the single mutable value threaded through one task.
//!
//! The step log is an append-only arena: step `n` lives at index `n - 1`,
//! so lookup by step number is O(1) and numbers stay contiguous from 1.
//! The blackboard only grows (insert or overwrite, never remove), and the
//! completion flag is monotonic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

// ── Plans and steps ──

/// What kind of action a plan performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanKind {
    /// Answer with the oracle alone.
    Reasoning,
    /// Invoke a tool on an external capability service.
    CapabilityCall { service: String },
}

/// One validated action plan. Consumed by exactly one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Action name; for capability calls this is the requested tool name
    pub action: String,

    #[serde(flatten)]
    pub kind: PlanKind,

    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub expected_output: String,

    #[serde(default)]
    pub reasoning: String,
}

impl ExecutionPlan {
    pub fn reasoning(action: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            kind: PlanKind::Reasoning,
            arguments: serde_json::Map::new(),
            expected_output: String::new(),
            reasoning: reasoning.into(),
        }
    }

    pub fn capability_call(
        service: impl Into<String>,
        tool: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            action: tool.into(),
            kind: PlanKind::CapabilityCall {
                service: service.into(),
            },
            arguments,
            expected_output: String::new(),
            reasoning: String::new(),
        }
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = expected.into();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// The target service, present iff this is a capability call.
    pub fn service(&self) -> Option<&str> {
        match &self.kind {
            PlanKind::CapabilityCall { service } => Some(service),
            PlanKind::Reasoning => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            PlanKind::Reasoning => "reasoning",
            PlanKind::CapabilityCall { .. } => "capability_call",
        }
    }
}

/// A recorded step. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_number: usize,
    pub plan: ExecutionPlan,
    pub result: serde_json::Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionStep {
    /// The result rendered as prompt text.
    pub fn result_text(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

// ── Task components ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    DataCollection,
    DataProcessing,
    ActionExecution,
    Analysis,
    Output,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataCollection => "data_collection",
            Self::DataProcessing => "data_processing",
            Self::ActionExecution => "action_execution",
            Self::Analysis => "analysis",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trackable sub-goal of the objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskComponent {
    pub id: String,
    pub component_type: ComponentType,
    pub description: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completing_steps: Vec<usize>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_data: Vec<String>,
    #[serde(default)]
    pub produced_data: Vec<String>,
}

impl TaskComponent {
    pub fn new(id: impl Into<String>, component_type: ComponentType, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component_type,
            description: description.into(),
            optional: false,
            completed: false,
            completing_steps: Vec::new(),
            dependencies: Vec::new(),
            required_data: Vec::new(),
            produced_data: Vec::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

// ── Failures ──

/// Recovery strategy suggested for a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    Retry,
    Alternative,
    Skip,
    ManualIntervention,
}

impl FailureStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Alternative => "alternative",
            Self::Skip => "skip",
            Self::ManualIntervention => "manual_intervention",
        }
    }
}

impl std::fmt::Display for FailureStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure history of one action name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub action: String,
    pub last_error: String,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    pub strategy: FailureStrategy,
    pub max_retries: u32,
}

// ── Task outcome ──

/// Final status handed to the persistence sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    BudgetExhausted,
    Cancelled,
    Failed,
}

/// Step counts reported with the completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
    pub is_complete: bool,
}

// ── Workflow state ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub task_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub original_objective: String,
    pub current_objective: String,
    pub iterations: usize,
    pub max_iterations: usize,

    steps: Vec<ExecutionStep>,
    data: BTreeMap<String, serde_json::Value>,
    current_plan: Option<ExecutionPlan>,
    is_complete: bool,
    consecutive_failures: usize,
    errors: Vec<String>,
    components: Vec<TaskComponent>,
    completed_components: BTreeSet<String>,
    failures: Vec<FailureRecord>,
}

impl WorkflowState {
    pub fn new(
        task_id: impl Into<String>,
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        objective: impl Into<String>,
        max_iterations: usize,
    ) -> Self {
        let objective = objective.into();
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            current_objective: objective.clone(),
            original_objective: objective,
            iterations: 0,
            max_iterations,
            steps: Vec::new(),
            data: BTreeMap::new(),
            current_plan: None,
            is_complete: false,
            consecutive_failures: 0,
            errors: Vec::new(),
            components: Vec::new(),
            completed_components: BTreeSet::new(),
            failures: Vec::new(),
        }
    }

    // ── Plan and step log ──

    /// Replace the current plan.
    pub fn set_current_plan(&mut self, plan: ExecutionPlan) {
        self.current_plan = Some(plan);
    }

    pub fn current_plan(&self) -> Option<&ExecutionPlan> {
        self.current_plan.as_ref()
    }

    /// Append a step built from the current plan, consuming it.
    pub fn record_step(
        &mut self,
        result: serde_json::Value,
        success: bool,
        error: Option<String>,
    ) -> Result<&ExecutionStep> {
        let plan = self
            .current_plan
            .take()
            .ok_or_else(|| Error::Internal("no current plan to record".into()))?;
        let step_number = self.steps.len() + 1;

        if success {
            self.consecutive_failures = 0;
            self.data.insert(format!("step_{step_number}"), result.clone());
            self.data.insert(plan.action.clone(), result.clone());
        } else {
            self.consecutive_failures += 1;
        }

        self.steps.push(ExecutionStep {
            step_number,
            plan,
            result,
            success,
            error,
            timestamp: Utc::now(),
        });
        Ok(&self.steps[step_number - 1])
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    /// Look up a step by its 1-based number.
    pub fn step(&self, step_number: usize) -> Option<&ExecutionStep> {
        step_number.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    pub fn last_step(&self) -> Option<&ExecutionStep> {
        self.steps.last()
    }

    pub fn successful_steps(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.iter().filter(|s| s.success)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures
    }

    pub fn summary(&self) -> ExecutionSummary {
        let successful = self.steps.iter().filter(|s| s.success).count();
        ExecutionSummary {
            successful,
            failed: self.steps.len() - successful,
            total: self.steps.len(),
            is_complete: self.is_complete,
        }
    }

    // ── Blackboard ──

    pub fn data(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.data
    }

    // ── Completion ──

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Mark the task complete. There is no way back.
    pub fn mark_complete(&mut self) {
        self.is_complete = true;
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    // ── Components ──

    /// Install the decomposed components. Only the first call takes effect.
    pub fn set_components(&mut self, components: Vec<TaskComponent>) {
        if self.components.is_empty() {
            self.completed_components = components
                .iter()
                .filter(|c| c.completed)
                .map(|c| c.id.clone())
                .collect();
            self.components = components;
        }
    }

    pub fn components(&self) -> &[TaskComponent] {
        &self.components
    }

    /// Mark a component complete by the given step. Returns false if the
    /// id is unknown or the component was already complete.
    pub fn complete_component(&mut self, id: &str, step_number: usize) -> bool {
        let Some(component) = self.components.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        if component.completed {
            return false;
        }
        component.completed = true;
        component.completing_steps.push(step_number);
        self.completed_components.insert(id.to_string());
        true
    }

    pub fn is_component_complete(&self, id: &str) -> bool {
        self.completed_components.contains(id)
    }

    /// Whether every non-optional component is complete.
    pub fn required_components_done(&self) -> bool {
        self.components
            .iter()
            .filter(|c| !c.optional)
            .all(|c| c.completed)
    }

    pub fn remaining_components(&self) -> impl Iterator<Item = &TaskComponent> {
        self.components.iter().filter(|c| !c.completed)
    }

    // ── Failures ──

    /// Register a failure of `action`, creating or updating its record.
    /// The attempt count is incremented before the record is returned, so
    /// the caller can classify against it and set the strategy.
    pub fn record_failure(&mut self, action: &str, error: &str, max_retries: u32) -> &mut FailureRecord {
        let index = match self.failures.iter().position(|f| f.action == action) {
            Some(i) => i,
            None => {
                self.failures.push(FailureRecord {
                    action: action.to_string(),
                    last_error: String::new(),
                    attempts: 0,
                    last_attempt: Utc::now(),
                    strategy: FailureStrategy::Retry,
                    max_retries,
                });
                self.failures.len() - 1
            }
        };
        let record = &mut self.failures[index];
        record.attempts += 1;
        record.last_error = error.to_string();
        record.last_attempt = Utc::now();
        record
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn has_manual_intervention(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.strategy == FailureStrategy::ManualIntervention)
    }
}
