//! Configuration validation
//!
//! Semantic checks beyond what serde enforces. Stops at the first error.

use std::collections::HashSet;

use contracts::{ContractError, OutputConfig, OutputKind, PipelineConfig, RedisOutputConfig};
use interpolation::{ArgsMapping, InterpolatedField};

/// Validate a pipeline configuration
pub fn validate(config: &PipelineConfig) -> Result<(), ContractError> {
    validate_outputs_present(config)?;
    validate_unique_output_names(config)?;
    validate_unique_cache_labels(config)?;
    for output in &config.outputs {
        validate_output(config, output)?;
    }
    Ok(())
}

fn validate_outputs_present(config: &PipelineConfig) -> Result<(), ContractError> {
    if config.outputs.is_empty() {
        return Err(ContractError::config_validation(
            "outputs",
            "at least one output is required",
        ));
    }
    Ok(())
}

fn validate_unique_output_names(config: &PipelineConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, output) in config.outputs.iter().enumerate() {
        if output.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("outputs[{idx}].name"),
                "output name cannot be empty",
            ));
        }
        if !seen.insert(output.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("outputs[name={}]", output.name),
                "duplicate output name",
            ));
        }
    }
    Ok(())
}

fn validate_unique_cache_labels(config: &PipelineConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for resource in &config.cache_resources {
        if !seen.insert(resource.label.as_str()) {
            return Err(ContractError::config_validation(
                format!("cache_resources[label={}]", resource.label),
                "duplicate cache label",
            ));
        }
    }
    Ok(())
}

fn validate_output(config: &PipelineConfig, output: &OutputConfig) -> Result<(), ContractError> {
    let path = format!("outputs[name={}]", output.name);

    if output.max_in_flight == 0 {
        return Err(ContractError::config_validation(
            format!("{path}.max_in_flight"),
            "max_in_flight must be >= 1",
        ));
    }

    match &output.kind {
        OutputKind::Cache(cache) => {
            let declared = config
                .cache_resources
                .iter()
                .any(|r| r.label == cache.target);
            if !declared {
                return Err(ContractError::config_validation(
                    format!("{path}.target"),
                    format!("cache resource '{}' is not declared", cache.target),
                ));
            }
            check_template(&path, "key", &cache.key)?;
            check_template(&path, "ttl", &cache.ttl)
        }
        OutputKind::Redis(redis) => validate_redis(&path, redis),
        OutputKind::Stdout(stdout) => stdout
            .parsed_codec()
            .map(|_| ())
            .map_err(|e| ContractError::config_validation(format!("{path}.codec"), e.to_string())),
    }
}

fn validate_redis(path: &str, redis: &RedisOutputConfig) -> Result<(), ContractError> {
    if redis.url.trim().is_empty() {
        return Err(ContractError::config_validation(
            format!("{path}.url"),
            "url cannot be empty",
        ));
    }

    match (&redis.operator, redis.command.is_empty()) {
        (Some(_), false) => Err(ContractError::config_validation(
            path,
            "operator and command are mutually exclusive",
        )),
        (None, true) => Err(ContractError::config_validation(
            path,
            "one of operator or command is required",
        )),
        (Some(operator), true) => {
            let key = redis.key.as_deref().unwrap_or_default();
            if key.is_empty() {
                return Err(ContractError::config_validation(
                    format!("{path}.key"),
                    format!("operator '{}' requires a key", operator.as_str()),
                ));
            }
            check_template(path, "key", key)
        }
        (None, false) => {
            check_template(path, "command", &redis.command)?;
            if !redis.args_mapping.trim().is_empty() {
                ArgsMapping::compile(&redis.args_mapping).map_err(|e| {
                    ContractError::config_validation(format!("{path}.args_mapping"), e.to_string())
                })?;
            }
            Ok(())
        }
    }
}

fn check_template(path: &str, field: &str, template: &str) -> Result<(), ContractError> {
    InterpolatedField::compile(template)
        .map(|_| ())
        .map_err(|e| ContractError::config_validation(format!("{path}.{field}"), e.to_string()))
}
