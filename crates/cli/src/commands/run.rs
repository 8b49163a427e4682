//! `taskpilot run` — Execute one objective.
//!
//! Progress events are printed to stdout as JSON lines; the final report
//! goes to stderr. Ctrl-C asks the engine to stop before the next step.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use taskpilot_capabilities::{HttpCapabilityProtocol, StaticCredentialStore};
use taskpilot_config::AppConfig;
use taskpilot_core::ProgressEvent;
use taskpilot_engine::{OracleClient, ServiceAliases, TaskEngine, TaskRequest};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

pub async fn run(
    objective: String,
    user: String,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &config_path {
        Some(path) => AppConfig::load_with_overrides(path),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set TASKPILOT_API_KEY (or OPENROUTER_API_KEY / OPENAI_API_KEY),");
        eprintln!("  or add api_key to {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let oracle = taskpilot_providers::build_from_config(&config)?;
    let client = OracleClient::new(oracle, taskpilot_providers::model_for(&config))
        .with_temperature(config.default_temperature)
        .with_max_tokens(config.default_max_tokens);

    let engine = TaskEngine::new(
        client,
        Arc::new(HttpCapabilityProtocol::from_services(&config.services)),
        Arc::new(StaticCredentialStore::from_config(&config.credentials)),
    )
    .with_aliases(ServiceAliases::default().with_extra(&config.aliases))
    .with_config(config.engine.clone());

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Cancelling after the current step...");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let (tx, rx) = mpsc::channel::<ProgressEvent>(256);
    let printer = tokio::spawn(async move {
        let mut events = ReceiverStream::new(rx);
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Could not serialize {} event: {e}", event.event_type()),
            }
        }
    });

    let request = TaskRequest::new(user, objective)
        .with_services(config.capability_services())
        .with_cancel_flag(cancel);
    let task_id = request.task_id.clone();
    let outcome = engine.run(request, Arc::new(tx)).await;

    // The engine drops its sender on return, which ends the printer
    if let Err(e) = printer.await {
        warn!("Event printer stopped: {e}");
    }

    let report = outcome?;
    eprintln!();
    eprintln!("  Task:      {task_id}");
    eprintln!("  Status:    {:?}", report.status);
    eprintln!(
        "  Steps:     {} ok, {} failed ({} iterations)",
        report.execution.successful, report.execution.failed, report.state.iterations
    );
    eprintln!();
    eprintln!("{}", report.summary);
    Ok(())
}
