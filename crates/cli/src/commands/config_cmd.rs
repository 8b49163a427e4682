//! `taskpilot config` — Print defaults or validate a config file.

use std::path::PathBuf;

use taskpilot_config::AppConfig;

pub fn run(validate: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = validate else {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    };

    println!("Validating {}...", path.display());
    if !path.exists() {
        return Err(format!("{} does not exist", path.display()).into());
    }
    let config = AppConfig::load_from(&path).map_err(|e| format!("Config error: {e}"))?;

    let mut warnings = Vec::new();
    if config.api_key.is_none() && config.default_provider != "ollama" {
        warnings.push("No API key in file (TASKPILOT_API_KEY will be consulted at run time)".to_string());
    }
    for service in &config.services {
        if service.endpoint.is_empty() {
            warnings.push(format!("Service '{}' has no endpoint", service.name));
        }
        let credentialed = config
            .credentials
            .iter()
            .any(|c| c.service.eq_ignore_ascii_case(&service.name));
        if !credentialed {
            warnings.push(format!("Service '{}' has no [[credentials]] entry", service.name));
        }
    }

    println!("   Config parsed successfully");
    for w in &warnings {
        println!("   warning: {w}");
    }
    println!();
    println!("   Provider:        {}", config.default_provider);
    println!("   Model:           {}", config.default_model);
    println!("   Max iterations:  {}", config.engine.max_iterations);
    println!("   Services:        {}", config.services.len());
    println!("   Credentials:     {}", config.credentials.len());
    Ok(())
}
