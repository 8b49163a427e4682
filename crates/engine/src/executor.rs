//! Carries out one plan and streams its output as step chunks.

use std::fmt::Write as _;
use std::time::Duration;

use taskpilot_core::error::StepError;
use taskpilot_core::{CapabilityService, ExecutionPlan, PlanKind, WorkflowState};
use tracing::{debug, info, warn};

use crate::emitter::{EventEmitter, chunk_text};
use crate::error::ExecuteError;
use crate::llm::OracleClient;
use crate::prompts::PromptKind;
use crate::resolver::ToolResolver;

pub struct Executor {
    client: OracleClient,
    resolver: ToolResolver,
    chunk_chars: usize,
    format_results: bool,
    tool_timeout: Duration,
}

impl Executor {
    pub fn new(client: OracleClient, resolver: ToolResolver) -> Self {
        Self {
            client,
            resolver,
            chunk_chars: 256,
            format_results: true,
            tool_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_chunk_chars(mut self, chars: usize) -> Self {
        self.chunk_chars = chars.max(1);
        self
    }

    pub fn with_format_results(mut self, enabled: bool) -> Self {
        self.format_results = enabled;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Execute `plan`, emitting raw and formatted chunks for the open step.
    /// `context` is the compacted prior-result context.
    pub async fn execute(
        &self,
        state: &WorkflowState,
        plan: &ExecutionPlan,
        services: &[CapabilityService],
        context: &str,
        emitter: &mut EventEmitter,
    ) -> Result<serde_json::Value, ExecuteError> {
        match &plan.kind {
            PlanKind::Reasoning => self.reason(state, plan, context, emitter).await,
            PlanKind::CapabilityCall { .. } => self.call(state, plan, services, emitter).await,
        }
    }

    async fn reason(
        &self,
        state: &WorkflowState,
        plan: &ExecutionPlan,
        context: &str,
        emitter: &mut EventEmitter,
    ) -> Result<serde_json::Value, ExecuteError> {
        let prompt = reasoning_prompt(state, plan, context);
        let mut stream = self
            .client
            .stream_text(PromptKind::Reason.system_prompt(), &prompt)
            .await
            .map_err(StepError::from)?;

        let mut answer = String::new();
        while let Some(chunk) = stream.recv().await {
            let chunk = chunk.map_err(StepError::from)?;
            if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                emitter.raw_chunk(&content).await?;
                answer.push_str(&content);
            }
            if chunk.done {
                break;
            }
        }

        debug!(action = %plan.action, chars = answer.len(), "Reasoning step finished");
        Ok(serde_json::Value::String(answer))
    }

    async fn call(
        &self,
        state: &WorkflowState,
        plan: &ExecutionPlan,
        services: &[CapabilityService],
        emitter: &mut EventEmitter,
    ) -> Result<serde_json::Value, ExecuteError> {
        let (call, connection) = self.resolver.resolve(&state.user_id, plan, services).await?;

        let arguments = serde_json::Value::Object(call.arguments.clone());
        let result = match tokio::time::timeout(self.tool_timeout, connection.call_tool(&call.tool, arguments)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(StepError::from(e).into()),
            Err(_) => {
                return Err(StepError::Invocation(format!(
                    "Tool {} timed out after {}s",
                    call.tool,
                    self.tool_timeout.as_secs()
                ))
                .into());
            }
        };
        info!(service = %call.service, tool = %call.tool, "Tool call succeeded");

        let raw = render(&result);
        for piece in chunk_text(&raw, self.chunk_chars) {
            emitter.raw_chunk(piece).await?;
        }

        if self.format_results && !raw.trim().is_empty() {
            self.format(plan, &call.tool, &raw, emitter).await?;
        }
        Ok(result)
    }

    /// Formatting is cosmetic: oracle trouble ends it quietly.
    async fn format(
        &self,
        plan: &ExecutionPlan,
        tool: &str,
        raw: &str,
        emitter: &mut EventEmitter,
    ) -> Result<(), ExecuteError> {
        let prompt = format!(
            "Tool: {tool}\nPurpose: {}\n\nResult:\n{raw}",
            if plan.expected_output.is_empty() { &plan.action } else { &plan.expected_output }
        );
        let mut stream = match self
            .client
            .stream_text(PromptKind::Format.system_prompt(), &prompt)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                debug!(tool, "Result formatting unavailable: {e}");
                return Ok(());
            }
        };
        while let Some(chunk) = stream.recv().await {
            match chunk {
                Ok(chunk) => {
                    if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                        emitter.formatted_chunk(&content).await?;
                    }
                    if chunk.done {
                        break;
                    }
                }
                Err(e) => {
                    warn!(tool, "Result formatting interrupted: {e}");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn reasoning_prompt(state: &WorkflowState, plan: &ExecutionPlan, context: &str) -> String {
    let mut p = String::new();
    let _ = writeln!(p, "Objective: {}", state.original_objective);
    if state.current_objective != state.original_objective {
        let _ = writeln!(p, "Current focus: {}", state.current_objective);
    }
    let _ = writeln!(p, "Step: {}", plan.action);
    if !plan.reasoning.is_empty() {
        let _ = writeln!(p, "Purpose: {}", plan.reasoning);
    }
    if !plan.expected_output.is_empty() {
        let _ = writeln!(p, "Expected output: {}", plan.expected_output);
    }
    if !plan.arguments.is_empty() {
        let _ = writeln!(p, "Inputs: {}", serde_json::Value::Object(plan.arguments.clone()));
    }
    if !context.is_empty() {
        let _ = writeln!(p, "\nResults so far:\n{context}");
    }
    p
}
