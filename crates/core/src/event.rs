//! Progress events streamed to the consumer of a running task.
//!
//! Per step the order is fixed: `step_start`, zero or more `raw_chunk`,
//! zero or more `formatted_chunk`, then exactly one of `step_complete` or
//! `step_error`. A task ends with summary chunks and one `completed`, or
//! with one `task_failed`.

use serde::{Deserialize, Serialize};

use crate::state::{ExecutionSummary, FailureStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The task was accepted and decomposed.
    TaskStarted {
        task_id: String,
        objective: String,
        components: usize,
    },

    /// A plan is about to execute.
    StepStart {
        step: usize,
        action: String,
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service: Option<String>,
    },

    /// Unformatted output, as produced.
    RawChunk { step: usize, content: String },

    /// Oracle-formatted rendering of the step output.
    FormattedChunk { step: usize, content: String },

    /// The step succeeded.
    StepComplete { step: usize, action: String },

    /// The step failed.
    StepError {
        step: usize,
        action: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strategy: Option<FailureStrategy>,
    },

    /// Part of the final summary text.
    SummaryChunk { content: String },

    /// The task finished.
    Completed {
        task_id: String,
        summary: ExecutionSummary,
    },

    /// The task was aborted.
    TaskFailed { task_id: String, error: String },
}

impl ProgressEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task_started",
            Self::StepStart { .. } => "step_start",
            Self::RawChunk { .. } => "raw_chunk",
            Self::FormattedChunk { .. } => "formatted_chunk",
            Self::StepComplete { .. } => "step_complete",
            Self::StepError { .. } => "step_error",
            Self::SummaryChunk { .. } => "summary_chunk",
            Self::Completed { .. } => "completed",
            Self::TaskFailed { .. } => "task_failed",
        }
    }

    /// The step this event belongs to, if any.
    pub fn step(&self) -> Option<usize> {
        match self {
            Self::StepStart { step, .. }
            | Self::RawChunk { step, .. }
            | Self::FormattedChunk { step, .. }
            | Self::StepComplete { step, .. }
            | Self::StepError { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether this event closes a step.
    pub fn is_step_terminal(&self) -> bool {
        matches!(self, Self::StepComplete { .. } | Self::StepError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_raw_chunk() {
        let event = ProgressEvent::RawChunk {
            step: 2,
            content: "price: 42".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"raw_chunk""#));
        assert!(json.contains(r#""step":2"#));
    }

    #[test]
    fn event_serialization_step_error_strategy() {
        let event = ProgressEvent::StepError {
            step: 1,
            action: "post".into(),
            error: "401".into(),
            strategy: Some(FailureStrategy::ManualIntervention),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""strategy":"manual_intervention""#));
        assert!(event.is_step_terminal());
    }

    #[test]
    fn event_serialization_completed() {
        let event = ProgressEvent::Completed {
            task_id: "t".into(),
            summary: ExecutionSummary {
                successful: 2,
                failed: 1,
                total: 3,
                is_complete: true,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"completed""#));
        assert!(json.contains(r#""successful":2"#));
        assert_eq!(event.step(), None);
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"formatted_chunk","step":4,"content":"hi"}"#;
        let event: ProgressEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type(), "formatted_chunk");
        assert_eq!(event.step(), Some(4));
    }
}
