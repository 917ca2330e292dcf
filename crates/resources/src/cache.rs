//! Cache resource kinds

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use contracts::{Cache, CacheKind, ContractError, TtlItem};

use crate::{MemoryCache, RedisCache};

/// Closed set of cache backends a registry can hold
#[derive(Debug)]
pub enum CacheResource {
    Memory(MemoryCache),
    Redis(RedisCache),
}

impl CacheResource {
    /// Build a cache from its configuration, connecting if remote
    pub async fn from_config(kind: &CacheKind) -> Result<Self, ContractError> {
        match kind {
            CacheKind::Memory { default_ttl } => Ok(Self::Memory(MemoryCache::new(*default_ttl))),
            CacheKind::Redis { url, default_ttl } => {
                Ok(Self::Redis(RedisCache::connect(url, *default_ttl).await?))
            }
        }
    }

    /// Backend name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }
}

impl Cache for CacheResource {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ContractError> {
        match self {
            Self::Memory(cache) => cache.get(key).await,
            Self::Redis(cache) => cache.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), ContractError> {
        match self {
            Self::Memory(cache) => cache.set(key, value, ttl).await,
            Self::Redis(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn set_multi(&self, items: HashMap<String, TtlItem>) -> Result<(), ContractError> {
        match self {
            Self::Memory(cache) => cache.set_multi(items).await,
            Self::Redis(cache) => cache.set_multi(items).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_from_config() {
        let cache = CacheResource::from_config(&CacheKind::Memory { default_ttl: None })
            .await
            .unwrap();
        assert_eq!(cache.kind(), "memory");
        cache.set("k", Bytes::from("v"), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_redis_from_config_bad_url() {
        let err = CacheResource::from_config(&CacheKind::Redis {
            url: "nope".to_string(),
            default_ttl: None,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ContractError::ConfigValidation { .. }));
    }
}
