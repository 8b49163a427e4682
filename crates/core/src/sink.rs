//! Output collaborators: the persistence sink and the progress sink.
//!
//! Both are write-only from the engine's point of view. The engine logs
//! and ignores their failures; a broken consumer never stops a task.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SinkError;
use crate::event::ProgressEvent;
use crate::state::{ExecutionStep, TaskStatus};

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn append_step(&self, task_id: &str, step: &ExecutionStep) -> Result<(), SinkError>;

    async fn finalize(
        &self,
        task_id: &str,
        status: TaskStatus,
        payload: serde_json::Value,
    ) -> Result<(), SinkError>;
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent) -> Result<(), SinkError>;
}

#[async_trait]
impl ProgressSink for mpsc::Sender<ProgressEvent> {
    async fn emit(&self, event: ProgressEvent) -> Result<(), SinkError> {
        self.send(event).await.map_err(|_| SinkError::Disconnected)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl PersistenceSink for NullSink {
    async fn append_step(&self, _task_id: &str, _step: &ExecutionStep) -> Result<(), SinkError> {
        Ok(())
    }

    async fn finalize(&self, _task_id: &str, _status: TaskStatus, _payload: serde_json::Value) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _event: ProgressEvent) -> Result<(), SinkError> {
        Ok(())
    }
}
