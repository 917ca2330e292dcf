//! Configuration parsing
//!
//! TOML (primary) and JSON.

use contracts::{ContractError, PipelineConfig};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<PipelineConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<PipelineConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<PipelineConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CacheKind, OperatorKind, OutputKind};
    use std::time::Duration;

    #[test]
    fn test_parse_toml_outputs() {
        let content = r#"
[[cache_resources]]
label = "foo"
type = "memory"
default_ttl = "60s"

[[outputs]]
name = "items"
type = "cache"
target = "foo"
key = '${!json("id")}'
write_timeout = "2s"

[[outputs]]
name = "sets"
type = "redis"
url = "redis://localhost:6379"
operator = "sadd"
key = '${!meta("set_key")}'
retries = 5
retry_period = "1s"
max_in_flight = 4
"#;
        let config = parse_toml(content).unwrap();
        assert_eq!(
            config.cache_resources[0].kind,
            CacheKind::Memory {
                default_ttl: Some(Duration::from_secs(60))
            }
        );
        assert_eq!(config.outputs.len(), 2);
        assert_eq!(config.outputs[0].write_timeout, Some(Duration::from_secs(2)));

        let sets = &config.outputs[1];
        assert_eq!(sets.max_in_flight, 4);
        let OutputKind::Redis(redis) = &sets.kind else {
            panic!("expected redis output");
        };
        assert_eq!(redis.operator, Some(OperatorKind::Sadd));
        assert_eq!(redis.retries, 5);
        assert_eq!(redis.retry_period, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "outputs": [{ "name": "console", "type": "stdout" }]
        }"#;
        let config = parse_json(content).unwrap();
        assert!(config.cache_resources.is_empty());
        let OutputKind::Stdout(stdout) = &config.outputs[0].kind else {
            panic!("expected stdout output");
        };
        assert_eq!(stdout.codec, "lines");
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_toml("invalid toml [[[").unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));

        let unknown_type = r#"
[[outputs]]
name = "x"
type = "kafka"
"#;
        assert!(parse_toml(unknown_type).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
