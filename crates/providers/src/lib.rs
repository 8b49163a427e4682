//! Oracle implementations for TaskPilot.
//!
//! All oracles implement the `taskpilot_core::Oracle` trait.
//! `build_from_config` selects one from configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatOracle;
pub use router::{build_from_config, model_for};
