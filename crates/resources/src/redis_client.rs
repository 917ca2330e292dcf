//! Redis command client
//!
//! The URL is validated when the client is opened; the connection itself is
//! established by `connect`, which may be retried.

use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::{Command, CommandArg, CommandClient, ContractError};
use serde_json::{Map, Number, Value};
use tracing::{debug, instrument};

use crate::redact_url;

/// `CommandClient` over a Redis connection manager
pub struct RedisCommandClient {
    url: String,
    client: redis::Client,
    connection: Mutex<Option<redis::aio::ConnectionManager>>,
}

impl std::fmt::Debug for RedisCommandClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCommandClient")
            .field("url", &redact_url(&self.url))
            .finish()
    }
}

impl RedisCommandClient {
    /// Validate the URL without connecting
    pub fn open(url: &str) -> Result<Self, ContractError> {
        let client = redis::Client::open(url).map_err(|e| {
            ContractError::config_validation("url", format!("invalid redis url: {e}"))
        })?;
        Ok(Self {
            url: url.to_string(),
            client,
            connection: Mutex::new(None),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<redis::aio::ConnectionManager>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connection(&self) -> Result<redis::aio::ConnectionManager, ContractError> {
        self.slot().clone().ok_or_else(|| ContractError::NotConnected {
            sink_name: "redis".to_string(),
        })
    }
}

impl CommandClient for RedisCommandClient {
    #[instrument(name = "redis_client_connect", skip(self), fields(url = %redact_url(&self.url)))]
    async fn connect(&self) -> Result<(), ContractError> {
        if self.slot().is_some() {
            return Ok(());
        }
        let manager = redis::aio::ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| ContractError::external("redis", format!("failed to connect: {e}")))?;
        *self.slot() = Some(manager);
        debug!("Redis command client connected");
        Ok(())
    }

    async fn execute(&self, command: &Command) -> Result<Value, ContractError> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd(&command.name);
        for arg in &command.args {
            match arg {
                CommandArg::Int(v) => cmd.arg(*v),
                CommandArg::Float(v) => cmd.arg(*v),
                CommandArg::Str(v) => cmd.arg(v.as_str()),
                CommandArg::Bytes(v) => cmd.arg(v.as_ref()),
            };
        }
        let reply: redis::Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| ContractError::external("redis", format!("{} failed: {e}", command.name)))?;
        Ok(to_json(reply))
    }

    async fn close(&self) -> Result<(), ContractError> {
        self.slot().take();
        debug!("Redis command client closed");
        Ok(())
    }
}

/// Convert a Redis reply into a structured value
pub fn to_json(reply: redis::Value) -> Value {
    match reply {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(v) => Value::from(v),
        redis::Value::BulkString(bytes) => {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::SimpleString(s) => Value::String(s),
        redis::Value::Okay => Value::String("OK".to_string()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        redis::Value::Map(pairs) => {
            let map: Map<String, Value> = pairs
                .into_iter()
                .map(|(k, v)| {
                    let key = match to_json(k) {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, to_json(v))
                })
                .collect();
            Value::Object(map)
        }
        redis::Value::Double(v) => Number::from_f64(v).map_or(Value::Null, Value::Number),
        redis::Value::Boolean(v) => Value::Bool(v),
        redis::Value::VerbatimString { text, .. } => Value::String(text),
        other => Value::String(format!("{other:?}")),
    }
}
