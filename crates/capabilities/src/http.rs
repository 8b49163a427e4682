//! Capability services spoken to as JSON-RPC 2.0 over HTTP POST.
//!
//! `connect` sends `initialize` with the resolved configuration; the
//! returned connection then issues `tools/list` and `tools/call` against
//! the same endpoint, tagged with the user it was opened for.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use taskpilot_config::ServiceConfig;
use taskpilot_core::capability::{CapabilityConnection, CapabilityProtocol, CapabilityService, ToolDescriptor};
use taskpilot_core::error::{CapabilityError, ConnectionError};
use tracing::{debug, info, warn};

use crate::rpc::{CallResult, RpcRequest, RpcResponse, ToolsPage};

const PROTOCOL_VERSION: &str = "2025-03-26";

/// Upper bound on `tools/list` pages followed for one catalog.
const MAX_CATALOG_PAGES: usize = 20;

/// Connects to services by name, using a configured endpoint per service.
pub struct HttpCapabilityProtocol {
    endpoints: HashMap<String, String>,
    client: reqwest::Client,
}

impl HttpCapabilityProtocol {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoints: HashMap::new(),
            client,
        }
    }

    /// Register the endpoint for a service. Names are matched case-insensitively.
    pub fn with_endpoint(mut self, service: impl AsRef<str>, endpoint: impl Into<String>) -> Self {
        self.endpoints
            .insert(service.as_ref().to_lowercase(), endpoint.into());
        self
    }

    pub fn from_services(services: &[ServiceConfig]) -> Self {
        services
            .iter()
            .fold(Self::new(), |p, s| p.with_endpoint(&s.name, &s.endpoint))
    }
}

impl Default for HttpCapabilityProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityProtocol for HttpCapabilityProtocol {
    async fn connect(
        &self,
        user: &str,
        service: &CapabilityService,
        config: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn CapabilityConnection>, ConnectionError> {
        let endpoint = self
            .endpoints
            .get(&service.name.to_lowercase())
            .ok_or_else(|| ConnectionError::UnknownService(service.name.clone()))?;

        let connection = HttpConnection {
            service: service.name.clone(),
            endpoint: endpoint.clone(),
            user: user.to_string(),
            client: self.client.clone(),
        };

        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": { "name": "taskpilot", "version": env!("CARGO_PKG_VERSION") },
            "configuration": config,
        });

        connection
            .rpc("initialize", Some(params))
            .await
            .map_err(|e| ConnectionError::EstablishFailed {
                service: service.name.clone(),
                reason: e.to_string(),
            })?;

        info!(service = %service.name, user, endpoint = %endpoint, "Capability service connected");
        Ok(Arc::new(connection))
    }
}

/// A live connection to one service for one user.
pub struct HttpConnection {
    service: String,
    endpoint: String,
    user: String,
    client: reqwest::Client,
}

impl HttpConnection {
    async fn rpc(&self, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value, CapabilityError> {
        let request = RpcRequest::new(method, params);
        debug!(service = %self.service, method, id = %request.id, "Sending capability request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-TaskPilot-User", &self.user)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Transport(format!("request timed out: {e}"))
                } else {
                    CapabilityError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(service = %self.service, method, status = status.as_u16(), "Capability service returned error status");
            return Err(CapabilityError::Transport(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;

        if let Some(error) = envelope.error {
            return Err(CapabilityError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        envelope
            .result
            .ok_or_else(|| CapabilityError::Malformed(format!("{method} response has no result")))
    }
}

#[async_trait]
impl CapabilityConnection for HttpConnection {
    fn service(&self) -> &str {
        &self.service
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CapabilityError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_CATALOG_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let result = self.rpc("tools/list", params).await?;
            let page: ToolsPage =
                serde_json::from_value(result).map_err(|e| CapabilityError::Malformed(e.to_string()))?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(service = %self.service, count = tools.len(), "Fetched tool catalog");
        Ok(tools)
    }

    async fn call_tool(&self, tool: &str, arguments: serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
        let result = self
            .rpc("tools/call", Some(serde_json::json!({ "name": tool, "arguments": arguments })))
            .await?;
        let call: CallResult =
            serde_json::from_value(result).map_err(|e| CapabilityError::Malformed(e.to_string()))?;

        if call.is_error {
            return Err(CapabilityError::ToolFailed {
                tool: tool.to_string(),
                message: call.text(),
            });
        }

        Ok(match call.structured_content {
            Some(structured) => structured,
            None => serde_json::Value::String(call.text()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0", "id": "1", "result": result
        }))
    }

    async fn connected(server: &MockServer) -> Arc<dyn CapabilityConnection> {
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "initialize"})))
            .respond_with(ok(serde_json::json!({"serverInfo": {"name": "chat"}})))
            .mount(server)
            .await;

        let protocol = HttpCapabilityProtocol::new().with_endpoint("Chat", server.uri());
        let service = CapabilityService::new("chat", "Team chat");
        protocol
            .connect("alice", &service, &BTreeMap::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn initialize_sends_resolved_configuration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-TaskPilot-User", "alice"))
            .and(body_partial_json(serde_json::json!({
                "method": "initialize",
                "params": {"configuration": {"bot_token": "xoxb-1"}}
            })))
            .respond_with(ok(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let protocol = HttpCapabilityProtocol::new().with_endpoint("chat", server.uri());
        let config = BTreeMap::from([("bot_token".to_string(), "xoxb-1".to_string())]);
        let conn = protocol
            .connect("alice", &CapabilityService::new("chat", ""), &config)
            .await
            .unwrap();
        assert_eq!(conn.service(), "chat");
    }

    #[tokio::test]
    async fn unknown_service_is_a_connection_error() {
        let protocol = HttpCapabilityProtocol::new();
        let err = protocol
            .connect("alice", &CapabilityService::new("nope", ""), &BTreeMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::UnknownService(_)));
    }

    #[tokio::test]
    async fn failed_initialize_is_a_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let protocol = HttpCapabilityProtocol::new().with_endpoint("chat", server.uri());
        let err = protocol
            .connect("alice", &CapabilityService::new("chat", ""), &BTreeMap::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::EstablishFailed { ref reason, .. } if reason.contains("503")));
    }

    #[tokio::test]
    async fn list_tools_follows_cursor() {
        let server = MockServer::start().await;
        let conn = connected(&server).await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "tools/list", "params": {"cursor": "p2"}})))
            .respond_with(ok(serde_json::json!({
                "tools": [{"name": "listChannels", "description": "List channels"}]
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "tools/list"})))
            .respond_with(ok(serde_json::json!({
                "tools": [{"name": "postMessage", "description": "Post", "inputSchema": {"type": "object"}}],
                "nextCursor": "p2"
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let tools = conn.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["postMessage", "listChannels"]);
    }

    #[tokio::test]
    async fn call_tool_returns_text_content() {
        let server = MockServer::start().await;
        let conn = connected(&server).await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "method": "tools/call",
                "params": {"name": "postMessage", "arguments": {"channel": "general"}}
            })))
            .respond_with(ok(serde_json::json!({
                "content": [{"type": "text", "text": "posted"}]
            })))
            .mount(&server)
            .await;

        let result = conn
            .call_tool("postMessage", serde_json::json!({"channel": "general"}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("posted"));
    }

    #[tokio::test]
    async fn tool_reported_error_is_tool_failed() {
        let server = MockServer::start().await;
        let conn = connected(&server).await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "tools/call"})))
            .respond_with(ok(serde_json::json!({
                "content": [{"type": "text", "text": "message exceeds 280 characters"}],
                "isError": true
            })))
            .mount(&server)
            .await;

        let err = conn.call_tool("post", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::ToolFailed { ref message, .. } if message.contains("280")));
    }

    #[tokio::test]
    async fn rpc_error_object_is_protocol_error() {
        let server = MockServer::start().await;
        let conn = connected(&server).await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"method": "tools/call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": "1",
                "error": {"code": -32602, "message": "Unknown tool"}
            })))
            .mount(&server)
            .await;

        let err = conn.call_tool("nope", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Protocol { code: -32602, .. }));
    }
}
