//! PipelineConfig - Config Loader output
//!
//! Cache resources and output connectors.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::ContractError;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Named cache resources
    #[serde(default)]
    pub cache_resources: Vec<CacheResourceConfig>,

    /// Output connectors
    pub outputs: Vec<OutputConfig>,
}

/// Cache resource declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheResourceConfig {
    /// Resource label, referenced by `target`
    pub label: String,

    /// Backend
    #[serde(flatten)]
    pub kind: CacheKind,
}

/// Cache backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheKind {
    /// In-process map
    Memory {
        #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
        default_ttl: Option<Duration>,
    },
    /// Redis server
    Redis {
        url: String,
        #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
        default_ttl: Option<Duration>,
    },
}

/// Output connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output name
    pub name: String,

    /// Number of independent writer instances
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Per-write deadline
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub write_timeout: Option<Duration>,

    /// How long to wait for in-flight writes on shutdown
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Connector kind
    #[serde(flatten)]
    pub kind: OutputKind,
}

fn default_max_in_flight() -> usize {
    1
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Output connector kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputKind {
    /// Store each message in a cache resource
    Cache(CacheOutputConfig),
    /// Run a command against Redis per message
    Redis(RedisOutputConfig),
    /// Write messages to stdout
    Stdout(StdoutOutputConfig),
}

impl OutputKind {
    /// Short type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Cache(_) => "cache",
            Self::Redis(_) => "redis",
            Self::Stdout(_) => "stdout",
        }
    }
}

/// Cache output parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOutputConfig {
    /// Cache resource label
    pub target: String,

    /// Key template
    pub key: String,

    /// TTL template (empty = cache default)
    #[serde(default)]
    pub ttl: String,
}

/// Redis command output parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisOutputConfig {
    /// Connection URL
    pub url: String,

    /// Command template (generic command mode)
    #[serde(default)]
    pub command: String,

    /// Arguments mapping (generic command mode)
    #[serde(default)]
    pub args_mapping: String,

    /// Fixed operator (operator mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<OperatorKind>,

    /// Key template (operator mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Maximum retries per command
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay between retries
    #[serde(default = "default_retry_period", with = "humantime_serde")]
    pub retry_period: Duration,
}

fn default_retries() -> u32 {
    3
}

fn default_retry_period() -> Duration {
    Duration::from_millis(500)
}

/// Fixed operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorKind {
    /// All keys matching the pattern in `key`
    Keys,
    /// Set cardinality
    Scard,
    /// Add the message to a set
    Sadd,
    /// Increment by the message content
    Incrby,
}

impl OperatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keys => "keys",
            Self::Scard => "scard",
            Self::Sadd => "sadd",
            Self::Incrby => "incrby",
        }
    }
}

/// Stdout output parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdoutOutputConfig {
    /// Framing codec: `lines`, `delim:<sep>` or `all-bytes`
    #[serde(default = "default_codec")]
    pub codec: String,
}

impl Default for StdoutOutputConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
        }
    }
}

fn default_codec() -> String {
    "lines".to_string()
}

impl StdoutOutputConfig {
    /// Parsed codec
    pub fn parsed_codec(&self) -> Result<Codec, ContractError> {
        self.codec.parse()
    }
}

/// Message framing on a byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    /// Each message followed by `\n`; a multi-message batch ends with an
    /// extra empty line
    Lines,
    /// Each message followed by the delimiter; a multi-message batch ends
    /// with an extra delimiter
    Delim(Vec<u8>),
    /// Raw bytes, no framing
    AllBytes,
}

impl FromStr for Codec {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lines" => Ok(Self::Lines),
            "all-bytes" => Ok(Self::AllBytes),
            _ => match s.strip_prefix("delim:") {
                Some("") => Err(ContractError::config_validation(
                    "codec",
                    "delimiter must not be empty",
                )),
                Some(delim) => Ok(Self::Delim(delim.as_bytes().to_vec())),
                None => Err(ContractError::config_validation(
                    "codec",
                    format!("unknown codec '{s}'"),
                )),
            },
        }
    }
}
