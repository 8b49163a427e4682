//! Capability traits, the abstraction over external tool services.
//!
//! A capability service exposes a catalog of named tools. The engine
//! connects to a service on behalf of one user, lists its live catalog and
//! invokes tools from it. Catalogs are authoritative only at call time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{CapabilityError, ConnectionError};

/// A tool as advertised by a capability service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name, exactly as the service expects it
    pub name: String,

    /// Description of what the tool does
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's arguments
    #[serde(default = "empty_schema", rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_schema(),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// A capability service the engine may use for a task.
///
/// `config` lists the service's declared configuration slots. Slots with
/// `None` are filled from the user's stored credentials when connecting.
/// `tools` is the last known catalog, shown to the planner; it may be stale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityService {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub config: BTreeMap<String, Option<String>>,

    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

impl CapabilityService {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_slot(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// Names of declared configuration slots that have no value yet.
    pub fn unset_slots(&self) -> impl Iterator<Item = &str> {
        self.config
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
    }
}

/// A live connection to one capability service, bound to one user.
#[async_trait]
pub trait CapabilityConnection: Send + Sync {
    /// The canonical service name this connection talks to.
    fn service(&self) -> &str;

    /// Fetch the live tool catalog.
    async fn list_tools(&self) -> std::result::Result<Vec<ToolDescriptor>, CapabilityError>;

    /// Invoke a tool by exact catalog name.
    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, CapabilityError>;
}

/// Establishes connections to capability services.
///
/// `config` is the service's fully resolved configuration: declared values
/// merged with credential data for the requesting user.
#[async_trait]
pub trait CapabilityProtocol: Send + Sync {
    async fn connect(
        &self,
        user: &str,
        service: &CapabilityService,
        config: &BTreeMap<String, String>,
    ) -> std::result::Result<Arc<dyn CapabilityConnection>, ConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_uses_wire_field_names() {
        let json = r#"{"name":"postMessage","description":"Post","inputSchema":{"type":"object"}}"#;
        let tool: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "postMessage");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn descriptor_schema_defaults_to_empty_object() {
        let tool: ToolDescriptor = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.description.is_empty());
    }

    #[test]
    fn unset_slots_only_lists_missing_values() {
        let service = CapabilityService::new("slack", "Team chat")
            .with_slot("workspace", Some("acme".into()))
            .with_slot("bot_token", None);
        let unset: Vec<_> = service.unset_slots().collect();
        assert_eq!(unset, vec!["bot_token"]);
    }
}
