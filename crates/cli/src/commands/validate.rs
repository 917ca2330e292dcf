//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{OutputKind, PipelineConfig};
use serde::Serialize;
use tracing::info;

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
    cache_resource_count: usize,
    output_count: usize,
    cache_outputs: usize,
    redis_outputs: usize,
    stdout_outputs: usize,
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

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(summarize(&config)),
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

fn summarize(config: &PipelineConfig) -> ConfigSummary {
    let count = |type_name: &str| {
        config
            .outputs
            .iter()
            .filter(|o| o.kind.type_name() == type_name)
            .count()
    };
    ConfigSummary {
        cache_resource_count: config.cache_resources.len(),
        output_count: config.outputs.len(),
        cache_outputs: count("cache"),
        redis_outputs: count("redis"),
        stdout_outputs: count("stdout"),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &PipelineConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    for resource in &config.cache_resources {
        let used = config.outputs.iter().any(|o| {
            matches!(&o.kind, OutputKind::Cache(cache) if cache.target == resource.label)
        });
        if !used {
            warnings.push(format!(
                "Cache resource '{}' is not used by any output",
                resource.label
            ));
        }
    }

    for output in &config.outputs {
        match &output.kind {
            OutputKind::Stdout(_) if output.max_in_flight > 1 => warnings.push(format!(
                "Output '{}': stdout always runs a single writer, max_in_flight ignored",
                output.name
            )),
            OutputKind::Redis(redis) if redis.retries == 0 => warnings.push(format!(
                "Output '{}': retries = 0, failed messages are not retried",
                output.name
            )),
            _ => {}
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Cache resources: {}", summary.cache_resource_count);
            println!("  Outputs: {}", summary.output_count);
            println!("    cache: {}", summary.cache_outputs);
            println!("    redis: {}", summary.redis_outputs);
            println!("    stdout: {}", summary.stdout_outputs);
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
