//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Output creation error
    #[error("failed to create output '{name}': {message}")]
    OutputCreation { name: String, message: String },

    /// Output queue closed; its workers have stopped
    #[error("output '{name}' is shut down")]
    QueueClosed { name: String },

    /// Writer or resource error (from contract)
    #[error("output error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create an output creation error
    pub fn output_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutputCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
