//! Redis cache provider
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use contracts::{Cache, ContractError, TtlItem};
use tracing::debug;

use crate::redact_url;

/// Redis-backed cache
#[derive(Clone)]
pub struct RedisCache {
    connection_manager: redis::aio::ConnectionManager,
    default_ttl: Option<Duration>,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection_manager", &"ConnectionManager")
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl RedisCache {
    /// Connect to the server at `url`
    pub async fn connect(url: &str, default_ttl: Option<Duration>) -> Result<Self, ContractError> {
        let client = redis::Client::open(url).map_err(|e| {
            ContractError::config_validation("url", format!("invalid redis url: {e}"))
        })?;

        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| ContractError::external("redis", format!("failed to connect: {e}")))?;

        debug!(url = %redact_url(url), "Redis cache connected");

        Ok(Self {
            connection_manager,
            default_ttl,
        })
    }

    fn set_cmd(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl.or(self.default_ttl) {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        cmd
    }
}

fn backend_error(op: &str, e: redis::RedisError) -> ContractError {
    ContractError::external("redis", format!("{op} failed: {e}"))
}

impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ContractError> {
        let mut conn = self.connection_manager.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("GET", e))?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), ContractError> {
        let mut conn = self.connection_manager.clone();
        self.set_cmd(key, &value, ttl)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend_error("SET", e))?;
        debug!(key = key, "Cache SET");
        Ok(())
    }

    async fn set_multi(&self, items: HashMap<String, TtlItem>) -> Result<(), ContractError> {
        let mut conn = self.connection_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, item) in &items {
            pipe.add_command(self.set_cmd(key, &item.value, item.ttl))
                .ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| backend_error("SET (pipeline)", e))?;
        debug!(count = items.len(), "Cache SET multi");
        Ok(())
    }
}
