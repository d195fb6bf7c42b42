//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{CoreSettings, ProcessorType};
use serde::Serialize;
use tracing::info;

use config_loader::ConfigLoader;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    load_rule_count: usize,
    processor_count: usize,
    enabled_processor_count: usize,
    barrier_count: usize,
    transformation_count: usize,
    consent_enabled: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match ConfigLoader::load_from_path(&args.config) {
        Ok(settings) => {
            let warnings = collect_warnings(&settings);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(summarize(&settings)),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

fn summarize(settings: &CoreSettings) -> ConfigSummary {
    ConfigSummary {
        version: format!("{:?}", settings.version),
        load_rule_count: settings.load_rules.len(),
        processor_count: settings.processors.len(),
        enabled_processor_count: settings.processors.iter().filter(|p| p.enabled).count(),
        barrier_count: settings.barriers.len(),
        transformation_count: settings.transformations.len(),
        consent_enabled: settings.consent.is_some(),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(settings: &CoreSettings) -> Vec<String> {
    let mut warnings: Vec<String> = ConfigLoader::warnings(settings)
        .iter()
        .map(ToString::to_string)
        .collect();

    if settings.processors.iter().all(|p| !p.enabled) {
        warnings.push("No enabled processors - tracked events will be dropped".to_string());
    }

    let external = settings
        .processors
        .iter()
        .filter(|p| p.processor_type == ProcessorType::External)
        .count();
    if external > 0 {
        warnings.push(format!(
            "{external} external processor(s) must be registered by the host application"
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Load rules: {}", summary.load_rule_count);
            println!(
                "  Processors: {} ({} enabled)",
                summary.processor_count, summary.enabled_processor_count
            );
            println!("  Barriers: {}", summary.barrier_count);
            println!("  Transformations: {}", summary.transformation_count);
            println!("  Consent: {}", if summary.consent_enabled { "on" } else { "off" });
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
