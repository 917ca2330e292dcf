//! External store contracts
//!
//! The narrow RPC surface the sinks consume: a key/value cache and a
//! command-oriented store. Both are async and cancelled by dropping the future.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use crate::ContractError;

/// A value to store together with its optional TTL
#[derive(Debug, Clone, PartialEq)]
pub struct TtlItem {
    pub value: Bytes,
    pub ttl: Option<Duration>,
}

/// Key/value cache
///
/// Implementations that do not support per-key TTLs fall back to their own
/// default TTL.
pub trait Cache: Send + Sync {
    /// Get a value
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, ContractError>> + Send;

    /// Set a single value
    fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), ContractError>> + Send;

    /// Set many values in one call
    fn set_multi(
        &self,
        items: HashMap<String, TtlItem>,
    ) -> impl Future<Output = Result<(), ContractError>> + Send;
}

/// A single positional command argument
#[derive(Debug, Clone, PartialEq)]
pub enum CommandArg {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
}

impl fmt::Display for CommandArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
        }
    }
}

impl From<&str> for CommandArg {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for CommandArg {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for CommandArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Bytes> for CommandArg {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

/// Command name plus ordered arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub args: Vec<CommandArg>,
}

impl Command {
    /// Create a command with no arguments
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<CommandArg>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Command-oriented store client
pub trait CommandClient: Send + Sync {
    /// Establish the connection. Safe to call again after a failure.
    fn connect(&self) -> impl Future<Output = Result<(), ContractError>> + Send;

    /// Execute a command, returning its structured result
    fn execute(&self, command: &Command)
        -> impl Future<Output = Result<Value, ContractError>> + Send;

    /// Release the underlying connection
    fn close(&self) -> impl Future<Output = Result<(), ContractError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        let cmd = Command::new("INCRBY").arg("ash").arg(10_i64);
        assert_eq!(cmd.to_string(), "INCRBY ash 10");
        assert_eq!(cmd.args.len(), 2);
    }
}
