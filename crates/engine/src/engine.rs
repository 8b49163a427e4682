//! The control loop.
//!
//! ```text
//! decompose → loop { plan → resolve & execute → classify failure → record
//!                    → update components → observe } → summarize
//! ```
//!
//! One `WorkflowState` is owned by one `run`; exactly one plan is in flight
//! and step N+1 starts only after step N's terminal event. The loop stops
//! when the task is complete, the iteration budget is spent, the cancel
//! flag is set, too many steps fail in a row, or a connection cannot be
//! established. Only the last two are errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use taskpilot_config::EngineConfig;
use taskpilot_core::error::{ConnectionError, StepError};
use taskpilot_core::{
    CapabilityProtocol, CapabilityService, CredentialStore, ExecutionSummary, NullSink, PersistenceSink,
    ProgressSink, TaskStatus, WorkflowState,
};
use tracing::{debug, info, warn};

use crate::aliases::ServiceAliases;
use crate::classifier::FailureClassifier;
use crate::compactor::ContextCompactor;
use crate::components;
use crate::decomposer::TaskDecomposer;
use crate::emitter::EventEmitter;
use crate::error::{EngineError, ExecuteError};
use crate::executor::Executor;
use crate::llm::OracleClient;
use crate::observer::{self, Observer};
use crate::planner::Planner;
use crate::pool::ConnectionPool;
use crate::prompts::PromptKind;
use crate::resolver::ToolResolver;

/// One objective to run for one user.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub objective: String,
    /// Services the task may call, with whatever catalog is already known
    pub services: Vec<CapabilityService>,
    /// Checked at the top of every iteration
    pub cancel: Option<Arc<AtomicBool>>,
}

impl TaskRequest {
    pub fn new(user_id: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            agent_id: "taskpilot".into(),
            objective: objective.into(),
            services: Vec::new(),
            cancel: None,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_services(mut self, services: Vec<CapabilityService>) -> Self {
        self.services = services;
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// What a finished run hands back.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: String,
    pub status: TaskStatus,
    pub summary: String,
    pub execution: ExecutionSummary,
    pub state: WorkflowState,
}

/// Runs tasks. Cheap to share; the connection pool is shared by every run.
pub struct TaskEngine {
    client: OracleClient,
    protocol: Arc<dyn CapabilityProtocol>,
    credentials: Arc<dyn CredentialStore>,
    pool: Arc<ConnectionPool>,
    aliases: ServiceAliases,
    persistence: Arc<dyn PersistenceSink>,
    config: EngineConfig,
}

impl TaskEngine {
    pub fn new(
        client: OracleClient,
        protocol: Arc<dyn CapabilityProtocol>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            client,
            protocol,
            credentials,
            pool: Arc::new(ConnectionPool::new()),
            aliases: ServiceAliases::default(),
            persistence: Arc::new(NullSink),
            config: EngineConfig::default(),
        }
    }

    /// Share a connection pool with other engines.
    pub fn with_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_aliases(mut self, aliases: ServiceAliases) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.client = self
            .client
            .with_structured_temperature(config.planner_temperature);
        self.config = config;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    fn executor(&self) -> Executor {
        let resolver = ToolResolver::new(
            self.client.clone(),
            self.protocol.clone(),
            self.credentials.clone(),
            self.pool.clone(),
            self.aliases.clone(),
        );
        Executor::new(self.client.clone(), resolver)
            .with_chunk_chars(self.config.chunk_chars)
            .with_format_results(self.config.format_results)
            .with_tool_timeout(Duration::from_secs(self.config.tool_timeout_secs))
    }

    /// Run `request` to completion, streaming progress into `progress`.
    pub async fn run(&self, request: TaskRequest, progress: Arc<dyn ProgressSink>) -> Result<TaskReport, EngineError> {
        let cfg = &self.config;
        let mut state = WorkflowState::new(
            &request.task_id,
            &request.user_id,
            &request.agent_id,
            &request.objective,
            cfg.max_iterations,
        );
        let mut emitter = EventEmitter::new(progress);
        let compactor = ContextCompactor::new(cfg.context_budget_chars, cfg.preview_chars);
        let classifier = FailureClassifier::new(cfg.max_retries);
        let planner = Planner::new(self.client.clone()).with_aliases(self.aliases.clone());
        let executor = self.executor();
        let observer = Observer::new(self.client.clone());

        info!(task_id = %state.task_id, user = %state.user_id, "Task started");

        let components = TaskDecomposer::new(self.client.clone())
            .decompose(&request.objective)
            .await;
        state.set_components(components);
        emitter
            .task_started(&state.task_id, &state.original_objective, state.components().len())
            .await?;

        let status = loop {
            if state.is_complete() {
                break TaskStatus::Completed;
            }
            if request.cancelled() {
                info!(task_id = %state.task_id, "Task cancelled");
                break TaskStatus::Cancelled;
            }
            if state.iterations >= state.max_iterations {
                info!(task_id = %state.task_id, iterations = state.iterations, "Iteration budget exhausted");
                break TaskStatus::BudgetExhausted;
            }
            state.iterations += 1;

            let context = compactor.compact(state.steps());
            let plan = planner.plan(&state, &request.services, &context.text).await;
            let step_number = state.steps().len() + 1;
            state.set_current_plan(plan.clone());
            emitter.step_start(step_number, &plan).await?;

            let outcome = executor
                .execute(&state, &plan, &request.services, &context.text, &mut emitter)
                .await;

            match outcome {
                Ok(result) => {
                    state.record_step(result, true, None)?;
                    self.persist_step(&state, step_number).await;
                    emitter.step_complete(&plan.action).await?;
                    components::update_progress(&mut state, step_number);
                    debug!(task_id = %state.task_id, step = step_number, action = %plan.action, "Step succeeded");
                }
                Err(ExecuteError::Step(error)) => {
                    self.fail_step(&mut state, &mut emitter, &classifier, step_number, &plan.action, &error)
                        .await?;
                }
                Err(ExecuteError::Connection(error)) => {
                    return Err(self
                        .abort_on_connection(&mut state, &mut emitter, &plan.action, error)
                        .await);
                }
                Err(ExecuteError::Emitter(error)) => return Err(error.into()),
            }

            if state.consecutive_failures() >= cfg.max_consecutive_failures {
                let last_error = state.errors().last().cloned().unwrap_or_default();
                let error = EngineError::ConsecutiveFailures {
                    count: state.consecutive_failures(),
                    last_error,
                };
                warn!(task_id = %state.task_id, "{error}");
                emitter.task_failed(&state.task_id, &error.to_string()).await?;
                self.finalize(&state, TaskStatus::Failed, &error.to_string()).await;
                return Err(error);
            }

            let context = compactor.compact(state.steps());
            let observation = observer.observe(&state, &context.text).await;
            if observer::may_complete(&state, &observation) {
                info!(task_id = %state.task_id, confidence = observation.confidence, "Objective satisfied");
                state.mark_complete();
            } else {
                if observation.is_complete {
                    debug!(task_id = %state.task_id, "Completion suggested with required components open");
                } else if state.required_components_done() {
                    debug!(task_id = %state.task_id, "Required components done, oracle wants more");
                }
                if let Some(next) = observation.next_objective {
                    debug!(task_id = %state.task_id, next = %next, "Focus updated");
                    state.current_objective = next;
                }
            }
        };

        let summary = self.summarize(&state, status, &compactor, &mut emitter).await?;
        let execution = state.summary();
        emitter.completed(&state.task_id, execution).await?;
        self.finalize(&state, status, &summary).await;

        info!(
            task_id = %state.task_id,
            status = ?status,
            successful = execution.successful,
            failed = execution.failed,
            "Task finished"
        );
        Ok(TaskReport {
            task_id: state.task_id.clone(),
            status,
            summary,
            execution,
            state,
        })
    }

    async fn fail_step(
        &self,
        state: &mut WorkflowState,
        emitter: &mut EventEmitter,
        classifier: &FailureClassifier,
        step_number: usize,
        action: &str,
        error: &StepError,
    ) -> Result<(), EngineError> {
        let text = error.to_string();
        let record = state.record_failure(action, &text, self.config.max_retries);
        let strategy = classifier.classify(&text, record.attempts);
        record.strategy = strategy;
        let attempts = record.attempts;

        state.record_step(serde_json::Value::Null, false, Some(text.clone()))?;
        state.push_error(text.clone());
        self.persist_step(state, step_number).await;
        emitter.step_error(action, &text, Some(strategy)).await?;

        warn!(
            task_id = %state.task_id,
            step = step_number,
            action,
            attempts,
            strategy = %strategy,
            "Step failed: {text}"
        );
        Ok(())
    }

    /// Record the failed step, close the stream, and hand back the error.
    async fn abort_on_connection(
        &self,
        state: &mut WorkflowState,
        emitter: &mut EventEmitter,
        action: &str,
        error: ConnectionError,
    ) -> EngineError {
        let text = error.to_string();
        let step_number = state.steps().len() + 1;
        if let Err(e) = state.record_step(serde_json::Value::Null, false, Some(text.clone())) {
            return e.into();
        }
        state.push_error(text.clone());
        self.persist_step(state, step_number).await;

        warn!(task_id = %state.task_id, step = step_number, "Aborting task: {text}");
        if let Err(e) = emitter.step_error(action, &text, None).await {
            return e.into();
        }
        if let Err(e) = emitter.task_failed(&state.task_id, &text).await {
            return e.into();
        }
        self.finalize(state, TaskStatus::Failed, &text).await;
        error.into()
    }

    /// Stream a closing summary. Falls back to a local account of the steps.
    async fn summarize(
        &self,
        state: &WorkflowState,
        status: TaskStatus,
        compactor: &ContextCompactor,
        emitter: &mut EventEmitter,
    ) -> Result<String, EngineError> {
        let context = compactor.compact(state.steps());
        let prompt = format!(
            "Objective: {}\nOutcome: {:?}\n\nResults:\n{}\n\nErrors:\n{}",
            state.original_objective,
            status,
            context.text,
            state.errors().join("\n")
        );

        let mut summary = String::new();
        match self
            .client
            .stream_text(PromptKind::Summarize.system_prompt(), &prompt)
            .await
        {
            Ok(mut stream) => {
                while let Some(chunk) = stream.recv().await {
                    match chunk {
                        Ok(chunk) => {
                            if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                                emitter.summary_chunk(&content).await?;
                                summary.push_str(&content);
                            }
                            if chunk.done {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(task_id = %state.task_id, "Summary stream interrupted: {e}");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(task_id = %state.task_id, "Summary unavailable: {e}"),
        }

        if summary.trim().is_empty() {
            summary = local_summary(state, status);
            emitter.summary_chunk(&summary).await?;
        }
        Ok(summary)
    }

    async fn persist_step(&self, state: &WorkflowState, step_number: usize) {
        let Some(step) = state.step(step_number) else {
            return;
        };
        if let Err(e) = self.persistence.append_step(&state.task_id, step).await {
            warn!(task_id = %state.task_id, step = step_number, "Could not persist step: {e}");
        }
    }

    async fn finalize(&self, state: &WorkflowState, status: TaskStatus, message: &str) {
        let payload = serde_json::json!({
            "objective": state.original_objective,
            "message": message,
            "execution": state.summary(),
            "iterations": state.iterations,
            "components": state.components(),
            "failures": state.failures(),
            "data": state.data(),
        });
        if let Err(e) = self.persistence.finalize(&state.task_id, status, payload).await {
            warn!(task_id = %state.task_id, "Could not finalize task record: {e}");
        }
    }
}

fn local_summary(state: &WorkflowState, status: TaskStatus) -> String {
    let s = state.summary();
    let outcome = match status {
        TaskStatus::Completed => "completed",
        TaskStatus::BudgetExhausted => "stopped after reaching the iteration limit",
        TaskStatus::Cancelled => "was cancelled",
        TaskStatus::Failed => "failed",
    };
    let mut text = format!(
        "Task {outcome}: {} of {} step(s) succeeded.",
        s.successful, s.total
    );
    if let Some(last) = state.successful_steps().last() {
        text.push_str(&format!(" Last result ({}): {}", last.plan.action, last.result_text()));
    }
    text
}
