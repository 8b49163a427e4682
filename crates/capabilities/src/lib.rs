//! Capability collaborators for TaskPilot.
//!
//! - [`HttpCapabilityProtocol`] talks JSON-RPC 2.0 over HTTP to services
//!   configured under `[[services]]`.
//! - [`StaticCredentialStore`] serves credentials configured under
//!   `[[credentials]]`.

pub mod credentials;
pub mod http;
pub mod rpc;

pub use credentials::StaticCredentialStore;
pub use http::{HttpCapabilityProtocol, HttpConnection};
