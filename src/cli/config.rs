//! Config check command handler.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};

use archguard::config::validate::{validate_config, validate_values, DiagnosticLevel};
use archguard::config::Config;
use archguard::security::ValidationPolicy;

use super::ConfigAction;

/// Validate configuration file.
pub(crate) fn cmd_config(action: ConfigAction, path: Option<&PathBuf>) -> Result<ExitCode> {
    match action {
        ConfigAction::Check => {
            let config_path = path.cloned().unwrap_or_else(Config::path);
            println!("Config file: {}", config_path.display());

            let mut diagnostics = Vec::new();
            if config_path.exists() {
                let content = std::fs::read_to_string(&config_path)
                    .context("Failed to read config file")?;
                let raw: serde_json::Value = match serde_json::from_str(&content) {
                    Ok(v) => v,
                    Err(e) => {
                        println!("[ERROR] Invalid JSON: {}", e);
                        return Ok(ExitCode::FAILURE);
                    }
                };
                diagnostics.extend(validate_config(&raw));
            } else {
                println!("[OK] No config file found (using defaults)");
            }

            let config = match Config::load_from_path(&config_path) {
                Ok(config) => config,
                Err(e) => {
                    println!("[ERROR] {}", e);
                    return Ok(ExitCode::FAILURE);
                }
            };
            diagnostics.extend(validate_values(&config));

            for diag in &diagnostics {
                println!("{}", diag);
            }

            let mut errors = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Error)
                .count();
            let warnings = diagnostics
                .iter()
                .filter(|d| d.level == DiagnosticLevel::Warn)
                .count();

            match ValidationPolicy::from_config(&config) {
                Ok(_) => println!("[OK] Policy builds"),
                Err(e) => {
                    println!("[ERROR] {}", e);
                    errors += 1;
                }
            }

            if errors == 0 && warnings == 0 {
                println!("\nConfiguration looks good!");
            } else {
                println!("\nFound {} error(s), {} warning(s)", errors, warnings);
            }
            Ok(if errors == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
