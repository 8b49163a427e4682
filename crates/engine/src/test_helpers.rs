//! Scripted collaborators shared by the engine's tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskpilot_core::error::{CapabilityError, ConnectionError, OracleError, SinkError};
use taskpilot_core::{
    CapabilityConnection, CapabilityProtocol, CapabilityService, Credential, CredentialStore, ExecutionStep, Oracle,
    OracleChunk, OracleRequest, OracleResponse, OracleStream, PersistenceSink, ProgressEvent, ProgressSink, Role,
    TaskStatus, ToolDescriptor,
};
use tokio::sync::mpsc;

use crate::prompts::PromptKind;

// ── Oracle ──

/// An oracle answering from per-prompt-kind scripts.
///
/// Each call pops the next scripted reply for its kind; the last reply
/// sticks once the queue is down to one. A kind with nothing scripted
/// answers `NotConfigured`. `stream` splits the reply into word chunks.
#[derive(Default)]
pub struct ScriptedOracle {
    scripts: Mutex<HashMap<PromptKind, VecDeque<Result<String, OracleError>>>>,
    requests: Mutex<Vec<(Option<PromptKind>, OracleRequest)>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `kind`.
    pub fn on(self, kind: PromptKind, reply: impl Into<String>) -> Self {
        self.push(kind, Ok(reply.into()));
        self
    }

    /// Queue a failure for `kind`.
    pub fn fail(self, kind: PromptKind, error: OracleError) -> Self {
        self.push(kind, Err(error));
        self
    }

    fn push(&self, kind: PromptKind, reply: Result<String, OracleError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self, kind: PromptKind) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == Some(kind))
            .count()
    }

    /// User message of the most recent request of `kind`.
    pub fn last_prompt(&self, kind: PromptKind) -> Option<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| *k == Some(kind))
            .and_then(|(_, r)| r.messages.iter().find(|m| m.role == Role::User))
            .map(|m| m.content.clone())
    }

    fn reply(&self, request: OracleRequest) -> Result<String, OracleError> {
        let kind = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| PromptKind::of(&m.content));
        self.requests.lock().unwrap().push((kind, request));

        let Some(kind) = kind else {
            return Err(OracleError::NotConfigured("unrecognized prompt".into()));
        };
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.entry(kind).or_default();
        match queue.len() {
            0 => Err(OracleError::NotConfigured(format!("no script for {kind:?}"))),
            1 => queue[0].clone(),
            _ => queue.pop_front().unwrap(),
        }
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        let model = request.model.clone();
        Ok(OracleResponse {
            content: self.reply(request)?,
            usage: None,
            model,
        })
    }

    async fn stream(&self, request: OracleRequest) -> Result<OracleStream, OracleError> {
        let text = self.reply(request)?;
        let pieces: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();
        let (tx, rx) = mpsc::channel(pieces.len() + 1);
        for piece in pieces {
            let _ = tx
                .send(Ok(OracleChunk {
                    content: Some(piece),
                    done: false,
                    usage: None,
                }))
                .await;
        }
        let _ = tx
            .send(Ok(OracleChunk {
                content: None,
                done: true,
                usage: None,
            }))
            .await;
        Ok(rx)
    }
}

// ── Capability services ──

type Reply = Result<serde_json::Value, CapabilityError>;

/// An in-memory service connection with a fixed catalog.
pub struct MockConnection {
    service: String,
    catalog: Vec<ToolDescriptor>,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    delay: Option<Duration>,
}

impl MockConnection {
    pub fn new(service: &str, catalog: Vec<ToolDescriptor>) -> Self {
        Self {
            service: service.to_string(),
            catalog,
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Queue a reply for `tool`; the last one sticks.
    pub fn with_response(self, tool: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.catalog.iter().map(|t| t.name.clone()).collect()
    }
}

#[async_trait]
impl CapabilityConnection for MockConnection {
    fn service(&self) -> &str {
        &self.service
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, CapabilityError> {
        Ok(self.catalog.clone())
    }

    async fn call_tool(&self, tool: &str, arguments: serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
        self.calls.lock().unwrap().push((tool.to_string(), arguments));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.catalog.iter().any(|t| t.name == tool) {
            return Err(CapabilityError::Protocol {
                code: -32602,
                message: format!("Unknown tool: {tool}"),
            });
        }
        let mut replies = self.replies.lock().unwrap();
        let Some(queue) = replies.get_mut(tool) else {
            return Ok(serde_json::json!("ok"));
        };
        match queue.len() {
            0 => Ok(serde_json::json!("ok")),
            1 => queue[0].clone(),
            _ => queue.pop_front().unwrap(),
        }
    }
}

/// Hands out registered connections by service name.
#[derive(Default)]
pub struct MockProtocol {
    connections: HashMap<String, Arc<MockConnection>>,
    failure: Option<ConnectionError>,
    connects: AtomicUsize,
    configs: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl MockProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(self, connection: MockConnection) -> Self {
        self.with_shared(Arc::new(connection))
    }

    pub fn with_shared(mut self, connection: Arc<MockConnection>) -> Self {
        self.connections.insert(connection.service.to_lowercase(), connection);
        self
    }

    /// Every connect attempt fails with `error`.
    pub fn failing(mut self, error: ConnectionError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn configs(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.configs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityProtocol for MockProtocol {
    async fn connect(
        &self,
        _user: &str,
        service: &CapabilityService,
        config: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn CapabilityConnection>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.configs
            .lock()
            .unwrap()
            .push((service.name.clone(), config.clone()));
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let connection: Arc<dyn CapabilityConnection> = self
            .connections
            .get(&service.name.to_lowercase())
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownService(service.name.clone()))?;
        Ok(connection)
    }
}

/// Credentials keyed by (user, lower-cased service).
#[derive(Default)]
pub struct MemoryCredentials {
    entries: HashMap<(String, String), Credential>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, user: &str, service: &str, credential: Credential) -> Self {
        self.entries
            .insert((user.to_string(), service.to_lowercase()), credential);
        self
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn get_credential(&self, user: &str, service: &str) -> Option<Credential> {
        self.entries
            .get(&(user.to_string(), service.to_lowercase()))
            .cloned()
    }
}

// ── Sinks ──

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(ProgressEvent::event_type)
            .collect()
    }

    pub fn raw_text(&self, step: usize) -> String {
        self.collect(|e| match e {
            ProgressEvent::RawChunk { step: s, content } if *s == step => Some(content.clone()),
            _ => None,
        })
    }

    pub fn formatted_text(&self, step: usize) -> String {
        self.collect(|e| match e {
            ProgressEvent::FormattedChunk { step: s, content } if *s == step => Some(content.clone()),
            _ => None,
        })
    }

    pub fn summary_text(&self) -> String {
        self.collect(|e| match e {
            ProgressEvent::SummaryChunk { content } => Some(content.clone()),
            _ => None,
        })
    }

    fn collect(&self, pick: impl Fn(&ProgressEvent) -> Option<String>) -> String {
        self.events.lock().unwrap().iter().filter_map(pick).collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn emit(&self, event: ProgressEvent) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPersistence {
    steps: Mutex<Vec<(String, usize, bool)>>,
    finals: Mutex<Vec<(String, TaskStatus, serde_json::Value)>>,
}

impl RecordingPersistence {
    /// (task id, step number, success) per appended step.
    pub fn steps(&self) -> Vec<(String, usize, bool)> {
        self.steps.lock().unwrap().clone()
    }

    pub fn finals(&self) -> Vec<(String, TaskStatus, serde_json::Value)> {
        self.finals.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceSink for RecordingPersistence {
    async fn append_step(&self, task_id: &str, step: &ExecutionStep) -> Result<(), SinkError> {
        self.steps
            .lock()
            .unwrap()
            .push((task_id.to_string(), step.step_number, step.success));
        Ok(())
    }

    async fn finalize(&self, task_id: &str, status: TaskStatus, payload: serde_json::Value) -> Result<(), SinkError> {
        self.finals
            .lock()
            .unwrap()
            .push((task_id.to_string(), status, payload));
        Ok(())
    }
}
