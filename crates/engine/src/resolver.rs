//! Turns a capability-call plan into a call the live service will accept.
//!
//! The pipeline runs in a fixed order, each stage a separate method:
//!
//! 1. [`ToolResolver::normalize`]: requested service → available service
//! 2. [`ToolResolver::ensure_connection`]: pooled connection, credentials injected
//! 3. [`ToolResolver::fetch_catalog`]: the live tool catalog, the source of truth
//! 4. [`ToolResolver::convert_parameters`]: arguments reshaped to the intended schema
//! 5. [`match_tool`] then [`ToolResolver::reselect`]: a tool name from that catalog
//!
//! Whatever [`ToolResolver::resolve`] returns names a tool present in the
//! catalog fetched during the same call.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use taskpilot_core::error::{ConnectionError, StepError};
use taskpilot_core::{
    CapabilityConnection, CapabilityProtocol, CapabilityService, Credential, CredentialStore, ExecutionPlan,
    ToolDescriptor,
};
use tracing::{debug, info, warn};

use crate::aliases::ServiceAliases;
use crate::error::ExecuteError;
use crate::extract;
use crate::llm::OracleClient;
use crate::naming;
use crate::pool::ConnectionPool;
use crate::prompts::PromptKind;

type Arguments = serde_json::Map<String, serde_json::Value>;

/// How the final tool name was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Exact,
    Substring,
    Reselected,
}

/// A call ready to send.
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    pub service: String,
    pub tool: String,
    pub arguments: Arguments,
    pub resolution: Resolution,
}

/// Exact name first, then the first catalog entry (in catalog order)
/// whose name contains, or is contained in, the request, ignoring case.
pub fn match_tool(requested: &str, catalog: &[ToolDescriptor]) -> Option<(String, Resolution)> {
    if let Some(tool) = catalog.iter().find(|t| t.name == requested) {
        return Some((tool.name.clone(), Resolution::Exact));
    }
    let wanted = requested.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    catalog
        .iter()
        .find(|t| {
            let name = t.name.to_lowercase();
            !name.is_empty() && (name.contains(&wanted) || wanted.contains(&name))
        })
        .map(|t| (t.name.clone(), Resolution::Substring))
}

/// Configuration handed to `connect`: declared values stay, unset slots
/// are filled from the credential. Credential keys match slots ignoring case.
pub fn resolve_config(service: &CapabilityService, credential: &Credential) -> BTreeMap<String, String> {
    let mut config = BTreeMap::new();
    for (slot, value) in &service.config {
        let resolved = match value {
            Some(v) => Some(v.clone()),
            None => credential.data.get(slot).cloned().or_else(|| {
                credential
                    .data
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(slot))
                    .map(|(_, v)| v.clone())
            }),
        };
        match resolved {
            Some(v) => {
                config.insert(slot.clone(), v);
            }
            None => debug!(service = %service.name, slot = %slot, "Configuration slot left unset"),
        }
    }
    config
}

#[derive(Clone)]
pub struct ToolResolver {
    client: OracleClient,
    protocol: Arc<dyn CapabilityProtocol>,
    credentials: Arc<dyn CredentialStore>,
    pool: Arc<ConnectionPool>,
    aliases: ServiceAliases,
}

impl ToolResolver {
    pub fn new(
        client: OracleClient,
        protocol: Arc<dyn CapabilityProtocol>,
        credentials: Arc<dyn CredentialStore>,
        pool: Arc<ConnectionPool>,
        aliases: ServiceAliases,
    ) -> Self {
        Self {
            client,
            protocol,
            credentials,
            pool,
            aliases,
        }
    }

    /// Run the full pipeline for `plan` on behalf of `user`.
    pub async fn resolve(
        &self,
        user: &str,
        plan: &ExecutionPlan,
        services: &[CapabilityService],
    ) -> Result<(ResolvedCall, Arc<dyn CapabilityConnection>), ExecuteError> {
        let requested = plan.service().unwrap_or_default();
        let service = self.normalize(requested, services)?;
        let connection = self.ensure_connection(user, service).await?;
        let catalog = self.fetch_catalog(connection.as_ref()).await?;

        if catalog.is_empty() {
            return Err(StepError::ToolResolution {
                service: service.name.clone(),
                requested: plan.action.clone(),
            }
            .into());
        }

        let arguments = self
            .convert_parameters(&plan.action, &plan.arguments, &catalog)
            .await;

        // the placeholder action names no tool; let the oracle pick one
        let matched = if plan.action == naming::DEFAULT_ACTION {
            None
        } else {
            match_tool(&plan.action, &catalog)
        };
        let call = match matched {
            Some((tool, resolution)) => ResolvedCall {
                service: service.name.clone(),
                tool,
                arguments,
                resolution,
            },
            None => {
                let (tool, arguments) = self
                    .reselect(&service.name, &plan.action, &arguments, &catalog)
                    .await?;
                ResolvedCall {
                    service: service.name.clone(),
                    tool,
                    arguments,
                    resolution: Resolution::Reselected,
                }
            }
        };

        info!(
            service = %call.service,
            requested = %plan.action,
            tool = %call.tool,
            resolution = ?call.resolution,
            "Tool resolved"
        );
        Ok((call, connection))
    }

    /// Stage 1: the available service `requested` refers to.
    pub fn normalize<'a>(
        &self,
        requested: &str,
        services: &'a [CapabilityService],
    ) -> Result<&'a CapabilityService, StepError> {
        let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
        let name = self.aliases.normalize(requested, &names);
        services
            .iter()
            .find(|s| s.name == name)
            .ok_or(StepError::UnknownService(name))
    }

    /// Stage 2: pooled connection for (user, service).
    pub async fn ensure_connection(
        &self,
        user: &str,
        service: &CapabilityService,
    ) -> Result<Arc<dyn CapabilityConnection>, ConnectionError> {
        if let Some(connection) = self.pool.get(user, &service.name).await {
            return Ok(connection);
        }
        self.pool
            .get_or_connect(user, &service.name, || async {
                let credential = self
                    .credentials
                    .get_credential(user, &service.name)
                    .await
                    .ok_or_else(|| ConnectionError::CredentialsMissing {
                        user: user.to_string(),
                        service: service.name.clone(),
                    })?;
                if !credential.verified {
                    return Err(ConnectionError::CredentialsUnverified {
                        user: user.to_string(),
                        service: service.name.clone(),
                    });
                }
                let config = resolve_config(service, &credential);
                self.protocol.connect(user, service, &config).await
            })
            .await
    }

    /// Stage 3: the live catalog.
    pub async fn fetch_catalog(&self, connection: &dyn CapabilityConnection) -> Result<Vec<ToolDescriptor>, StepError> {
        let catalog = connection.list_tools().await?;
        debug!(service = connection.service(), tools = catalog.len(), "Fetched live catalog");
        Ok(catalog)
    }

    /// Stage 4: reshape `arguments` for the tool `requested` most likely
    /// means. Falls back to the original arguments on any trouble.
    pub async fn convert_parameters(&self, requested: &str, arguments: &Arguments, catalog: &[ToolDescriptor]) -> Arguments {
        if catalog.is_empty() {
            return arguments.clone();
        }
        let prompt = format!(
            "Requested tool: {requested}\nArguments: {}\n\nCatalog:\n{}",
            serde_json::Value::Object(arguments.clone()),
            describe_catalog(catalog)
        );
        let text = match self
            .client
            .ask_structured(PromptKind::ConvertParams.system_prompt(), &prompt)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(tool = requested, "Parameter conversion failed, keeping arguments: {e}");
                return arguments.clone();
            }
        };

        match extract::first_object(&text).map(serde_json::from_str::<serde_json::Value>) {
            Some(Ok(serde_json::Value::Object(mut converted))) => {
                // unwrap {"arguments": {...}} if the oracle wrapped it
                if converted.len() == 1 {
                    if let Some(serde_json::Value::Object(inner)) =
                        converted.get("arguments").or_else(|| converted.get("parameters")).cloned()
                    {
                        converted = inner;
                    }
                }
                converted
            }
            _ => {
                debug!(tool = requested, "Conversion output did not decode, keeping arguments");
                arguments.clone()
            }
        }
    }

    /// Stage 5b: ask the oracle to pick a catalog tool. A name outside the
    /// catalog is a resolution failure.
    pub async fn reselect(
        &self,
        service: &str,
        requested: &str,
        arguments: &Arguments,
        catalog: &[ToolDescriptor],
    ) -> Result<(String, Arguments), StepError> {
        let unresolved = || StepError::ToolResolution {
            service: service.to_string(),
            requested: requested.to_string(),
        };

        let prompt = format!(
            "Service: {service}\nRequested tool: {requested}\nArguments: {}\n\nCatalog:\n{}",
            serde_json::Value::Object(arguments.clone()),
            describe_catalog(catalog)
        );
        let text = self
            .client
            .ask_structured(PromptKind::Reselect.system_prompt(), &prompt)
            .await
            .map_err(|e| {
                warn!(service, requested, "Tool reselection failed: {e}");
                unresolved()
            })?;

        let choice: serde_json::Value = extract::first_object(&text)
            .and_then(|json| serde_json::from_str(json).ok())
            .ok_or_else(unresolved)?;
        let chosen = ["tool", "name", "tool_name", "action"]
            .iter()
            .find_map(|k| choice.get(*k).and_then(|v| v.as_str()))
            .ok_or_else(unresolved)?;

        let tool = catalog
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(chosen.trim()))
            .ok_or_else(|| {
                warn!(service, requested, chosen, "Reselected tool is not in the catalog");
                unresolved()
            })?;

        let adapted = ["arguments", "parameters", "args"]
            .iter()
            .find_map(|k| choice.get(*k).and_then(|v| v.as_object()).cloned())
            .unwrap_or_else(|| arguments.clone());

        Ok((tool.name.clone(), adapted))
    }
}

fn describe_catalog(catalog: &[ToolDescriptor]) -> String {
    let mut out = String::new();
    for tool in catalog {
        let _ = writeln!(out, "- {}: {}\n  schema: {}", tool.name, tool.description, tool.input_schema);
    }
    out
}
