//! Ordered progress events for one task.
//!
//! The emitter is a small state machine over the progress sink. Per step it
//! only admits `step_start → raw_chunk* → formatted_chunk* → terminal`,
//! with exactly one terminal event, and step numbers must increase. The
//! task closes with either `completed` (after any summary chunks) or
//! `task_failed`. Calls out of that order return an [`EmitterError`] and
//! emit nothing.
//!
//! Sink failures never reach the control loop: a disconnected consumer is
//! logged once and later events are dropped.

use std::sync::Arc;

use taskpilot_core::{ExecutionPlan, ExecutionSummary, FailureStrategy, ProgressEvent, ProgressSink};
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitterError {
    #[error("Cannot emit {event} while {state}")]
    OutOfOrder { event: &'static str, state: &'static str },

    #[error("Step {next} does not follow step {last}")]
    StepNotMonotonic { last: usize, next: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    BetweenSteps,
    Raw { step: usize },
    Formatted { step: usize },
    Summarizing,
    Closed,
}

impl Phase {
    fn describe(&self) -> &'static str {
        match self {
            Self::NotStarted => "the task has not started",
            Self::BetweenSteps => "no step is open",
            Self::Raw { .. } => "a step is streaming raw output",
            Self::Formatted { .. } => "a step is streaming formatted output",
            Self::Summarizing => "the summary is streaming",
            Self::Closed => "the task is closed",
        }
    }

    fn open_step(&self) -> Option<usize> {
        match self {
            Self::Raw { step } | Self::Formatted { step } => Some(*step),
            _ => None,
        }
    }
}

pub struct EventEmitter {
    sink: Arc<dyn ProgressSink>,
    phase: Phase,
    last_step: usize,
    sink_lost: bool,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            phase: Phase::NotStarted,
            last_step: 0,
            sink_lost: false,
        }
    }

    /// The step currently open, if any.
    pub fn open_step(&self) -> Option<usize> {
        self.phase.open_step()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub async fn task_started(&mut self, task_id: &str, objective: &str, components: usize) -> Result<(), EmitterError> {
        self.expect(Phase::NotStarted == self.phase, "task_started")?;
        self.phase = Phase::BetweenSteps;
        self.send(ProgressEvent::TaskStarted {
            task_id: task_id.to_string(),
            objective: objective.to_string(),
            components,
        })
        .await;
        Ok(())
    }

    pub async fn step_start(&mut self, step: usize, plan: &ExecutionPlan) -> Result<(), EmitterError> {
        self.expect(self.phase == Phase::BetweenSteps, "step_start")?;
        if step <= self.last_step {
            return Err(EmitterError::StepNotMonotonic {
                last: self.last_step,
                next: step,
            });
        }
        self.last_step = step;
        self.phase = Phase::Raw { step };
        self.send(ProgressEvent::StepStart {
            step,
            action: plan.action.clone(),
            kind: plan.kind_name().to_string(),
            service: plan.service().map(str::to_string),
        })
        .await;
        Ok(())
    }

    pub async fn raw_chunk(&mut self, content: &str) -> Result<(), EmitterError> {
        let Phase::Raw { step } = self.phase else {
            return Err(self.out_of_order("raw_chunk"));
        };
        self.send(ProgressEvent::RawChunk {
            step,
            content: content.to_string(),
        })
        .await;
        Ok(())
    }

    pub async fn formatted_chunk(&mut self, content: &str) -> Result<(), EmitterError> {
        let step = self.open_step().ok_or_else(|| self.out_of_order("formatted_chunk"))?;
        self.phase = Phase::Formatted { step };
        self.send(ProgressEvent::FormattedChunk {
            step,
            content: content.to_string(),
        })
        .await;
        Ok(())
    }

    pub async fn step_complete(&mut self, action: &str) -> Result<(), EmitterError> {
        let step = self.open_step().ok_or_else(|| self.out_of_order("step_complete"))?;
        self.phase = Phase::BetweenSteps;
        self.send(ProgressEvent::StepComplete {
            step,
            action: action.to_string(),
        })
        .await;
        Ok(())
    }

    pub async fn step_error(
        &mut self,
        action: &str,
        error: &str,
        strategy: Option<FailureStrategy>,
    ) -> Result<(), EmitterError> {
        let step = self.open_step().ok_or_else(|| self.out_of_order("step_error"))?;
        self.phase = Phase::BetweenSteps;
        self.send(ProgressEvent::StepError {
            step,
            action: action.to_string(),
            error: error.to_string(),
            strategy,
        })
        .await;
        Ok(())
    }

    pub async fn summary_chunk(&mut self, content: &str) -> Result<(), EmitterError> {
        self.expect(
            matches!(self.phase, Phase::BetweenSteps | Phase::Summarizing),
            "summary_chunk",
        )?;
        self.phase = Phase::Summarizing;
        self.send(ProgressEvent::SummaryChunk {
            content: content.to_string(),
        })
        .await;
        Ok(())
    }

    pub async fn completed(&mut self, task_id: &str, summary: ExecutionSummary) -> Result<(), EmitterError> {
        self.expect(
            matches!(self.phase, Phase::BetweenSteps | Phase::Summarizing),
            "completed",
        )?;
        self.phase = Phase::Closed;
        self.send(ProgressEvent::Completed {
            task_id: task_id.to_string(),
            summary,
        })
        .await;
        Ok(())
    }

    pub async fn task_failed(&mut self, task_id: &str, error: &str) -> Result<(), EmitterError> {
        self.expect(
            matches!(
                self.phase,
                Phase::NotStarted | Phase::BetweenSteps | Phase::Summarizing
            ),
            "task_failed",
        )?;
        self.phase = Phase::Closed;
        self.send(ProgressEvent::TaskFailed {
            task_id: task_id.to_string(),
            error: error.to_string(),
        })
        .await;
        Ok(())
    }

    fn expect(&self, allowed: bool, event: &'static str) -> Result<(), EmitterError> {
        if allowed { Ok(()) } else { Err(self.out_of_order(event)) }
    }

    fn out_of_order(&self, event: &'static str) -> EmitterError {
        EmitterError::OutOfOrder {
            event,
            state: self.phase.describe(),
        }
    }

    async fn send(&mut self, event: ProgressEvent) {
        if self.sink_lost {
            return;
        }
        trace!(event = event.event_type(), step = ?event.step(), "Emitting progress event");
        if let Err(e) = self.sink.emit(event).await {
            warn!("Progress sink failed, dropping further events: {e}");
            self.sink_lost = true;
        }
    }
}

/// Split `text` into pieces of at most `size` characters.
pub fn chunk_text(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let cut = rest.char_indices().nth(size).map_or(rest.len(), |(i, _)| i);
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    chunks
}
