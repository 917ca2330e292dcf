//! ResourceRegistry - label -> shared resource handle

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{CacheResourceConfig, ContractError};
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::CacheResource;

/// Registry of named resources
///
/// Writers look handles up on every call and never keep the returned `Arc`
/// past it, so `insert` can rotate a resource while outputs are running.
#[derive(Debug)]
pub struct ResourceRegistry<C> {
    resources: RwLock<HashMap<String, Arc<C>>>,
}

impl<C> Default for ResourceRegistry<C> {
    fn default() -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
        }
    }
}

impl<C> ResourceRegistry<C> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource, returning the handle it replaced
    pub async fn insert(&self, label: impl Into<String>, resource: C) -> Option<Arc<C>> {
        self.resources
            .write()
            .await
            .insert(label.into(), Arc::new(resource))
    }

    /// Remove a resource
    pub async fn remove(&self, label: &str) -> Option<Arc<C>> {
        self.resources.write().await.remove(label)
    }

    /// Whether a resource exists under `label`
    pub async fn probe(&self, label: &str) -> bool {
        self.resources.read().await.contains_key(label)
    }

    /// Look up a resource
    pub async fn access(&self, label: &str) -> Option<Arc<C>> {
        self.resources.read().await.get(label).cloned()
    }

    /// Registered labels, sorted
    pub async fn labels(&self) -> Vec<String> {
        let mut labels: Vec<_> = self.resources.read().await.keys().cloned().collect();
        labels.sort();
        labels
    }
}

impl ResourceRegistry<CacheResource> {
    /// Build every configured cache resource
    #[instrument(name = "registry_from_configs", skip(configs), fields(count = configs.len()))]
    pub async fn from_configs(configs: &[CacheResourceConfig]) -> Result<Self, ContractError> {
        let registry = Self::new();
        for config in configs {
            let cache = CacheResource::from_config(&config.kind).await?;
            info!(label = %config.label, kind = cache.kind(), "Cache resource registered");
            registry.insert(config.label.clone(), cache).await;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::CacheKind;

    #[tokio::test]
    async fn test_insert_access_probe() {
        let registry = ResourceRegistry::new();
        assert!(!registry.probe("a").await);
        assert!(registry.insert("a", 1_u32).await.is_none());
        assert!(registry.probe("a").await);
        assert_eq!(*registry.access("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_handle_alive() {
        let registry = ResourceRegistry::new();
        registry.insert("a", 1_u32).await;
        let held = registry.access("a").await.unwrap();

        let old = registry.insert("a", 2_u32).await.unwrap();
        assert_eq!(*old, 1);
        assert_eq!(*held, 1);
        assert_eq!(*registry.access("a").await.unwrap(), 2);

        registry.remove("a").await;
        assert!(registry.access("a").await.is_none());
    }

    #[tokio::test]
    async fn test_from_configs() {
        let configs = vec![
            CacheResourceConfig {
                label: "foo".to_string(),
                kind: CacheKind::Memory { default_ttl: None },
            },
            CacheResourceConfig {
                label: "bar".to_string(),
                kind: CacheKind::Memory { default_ttl: None },
            },
        ];
        let registry = ResourceRegistry::from_configs(&configs).await.unwrap();
        assert_eq!(registry.labels().await, vec!["bar", "foo"]);
    }
}
