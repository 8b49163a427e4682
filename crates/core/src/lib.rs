//! # TaskPilot Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! TaskPilot execution engine. This crate has **no framework
//! dependencies**; it defines the model every other crate implements
//! against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the reasoning oracle, the
//! capability protocol, the credential store, and the persistence and
//! progress sinks. Implementations live in their respective crates, and
//! tests substitute scripted stand-ins.

pub mod capability;
pub mod credential;
pub mod error;
pub mod event;
pub mod message;
pub mod oracle;
pub mod sink;
pub mod state;

// Re-export key types at crate root for ergonomics
pub use capability::{CapabilityConnection, CapabilityProtocol, CapabilityService, ToolDescriptor};
pub use credential::{Credential, CredentialStore};
pub use error::{Error, Result};
pub use event::ProgressEvent;
pub use message::{Message, Role};
pub use oracle::{Oracle, OracleChunk, OracleRequest, OracleResponse, OracleStream};
pub use sink::{NullSink, PersistenceSink, ProgressSink};
pub use state::{
    ComponentType, ExecutionPlan, ExecutionStep, ExecutionSummary, FailureRecord, FailureStrategy,
    PlanKind, TaskComponent, TaskStatus, WorkflowState,
};
