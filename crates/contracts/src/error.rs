//! Layered error definitions
//!
//! Categorized by source: config / resolution / external / lifecycle

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// Template or mapping failed to compile
    #[error("invalid template '{template}': {message}")]
    InvalidTemplate { template: String, message: String },

    /// Named resource missing from the registry
    #[error("{kind} resource '{name}' was not found")]
    ResourceNotFound { kind: String, name: String },

    // ===== Resolution Errors =====
    /// Interpolation produced an unusable value
    #[error("resolution error: {message}")]
    Resolution { message: String },

    // ===== External Errors =====
    /// External store call failed (eligible for retry)
    #[error("'{target}' call failed: {message}")]
    External { target: String, message: String },

    /// All retry attempts used up
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ContractError>,
    },

    // ===== Lifecycle Errors =====
    /// Context cancelled mid-write or mid-retry
    #[error("operation cancelled")]
    Cancelled,

    /// Deadline elapsed
    #[error("{operation} timed out after {waited_ms}ms")]
    Timeout { operation: String, waited_ms: u64 },

    /// Write attempted while not connected
    #[error("sink '{sink_name}' is not connected")]
    NotConnected { sink_name: String },

    /// Sink already closing or closed
    #[error("sink '{sink_name}' is closed")]
    Closed { sink_name: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create invalid template error
    pub fn invalid_template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Create resource not found error
    pub fn resource_not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create resolution error
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    /// Create external call error
    pub fn external(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create timeout error
    pub fn timeout(operation: impl Into<String>, waited: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            waited_ms: waited.as_millis() as u64,
        }
    }

    /// Transient failures the retry policy may try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::External { .. } | Self::Io(_))
    }

    /// Cancellation or deadline, never retried
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ContractError::external("redis", "connection reset").is_retryable());
        assert!(ContractError::Io(std::io::Error::other("broken pipe")).is_retryable());
        assert!(!ContractError::resolution("bad args").is_retryable());
        assert!(!ContractError::Cancelled.is_retryable());
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = ContractError::RetriesExhausted {
            attempts: 4,
            source: Box::new(ContractError::external("redis", "timeout")),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("timeout"));
    }
}
