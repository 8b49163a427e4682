//! The TaskPilot control loop.
//!
//! A task runs as a **Decompose → Plan → Execute → Observe** cycle:
//!
//! 1. **Decompose** the objective into typed components with dependencies
//! 2. **Plan** one step: a reasoning step or a capability call
//! 3. **Resolve** the call against the service's live tool catalog
//! 4. **Execute** it, streaming raw and formatted output
//! 5. **Classify** failures into a recovery strategy the planner sees
//! 6. **Observe** whether the objective is met and where to focus next
//!
//! The loop ends on completion, budget exhaustion, cancellation, a run of
//! consecutive failures, or a connection that cannot be established. A
//! summary is streamed on every non-error exit.

pub mod aliases;
pub mod classifier;
pub mod compactor;
pub mod components;
pub mod decomposer;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod executor;
pub mod extract;
pub mod llm;
pub mod naming;
pub mod observer;
pub mod planner;
pub mod pool;
pub mod prompts;
pub mod resolver;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use aliases::ServiceAliases;
pub use classifier::{FailureClassifier, classify};
pub use compactor::{CompactedContext, ContextCompactor};
pub use emitter::{EmitterError, EventEmitter};
pub use engine::{TaskEngine, TaskReport, TaskRequest};
pub use error::{EngineError, ExecuteError};
pub use llm::OracleClient;
pub use observer::Observation;
pub use pool::ConnectionPool;
pub use resolver::{Resolution, ResolvedCall, ToolResolver};
