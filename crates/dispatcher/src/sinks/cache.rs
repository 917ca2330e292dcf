//! CacheWriter - stores each message in a named cache resource

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    Batch, BatchWriter, Cache, CacheOutputConfig, ContractError, FailureGranularity, TtlItem,
};
use interpolation::InterpolatedField;
use resources::ResourceRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::dispatch::{BatchAction, BatchDispatcher};

/// Writer that sets one cache key per message
///
/// A batch of one uses `set`; larger batches use a single `set_multi`. Any
/// failure, including an unparsable TTL, fails the whole batch.
pub struct CacheWriter<C> {
    name: String,
    target: String,
    key: InterpolatedField,
    ttl: InterpolatedField,
    registry: Arc<ResourceRegistry<C>>,
    dispatcher: BatchDispatcher,
}

impl<C: Cache> CacheWriter<C> {
    /// Compile templates and check that the target resource exists
    ///
    /// # Errors
    /// `InvalidTemplate` or `ResourceNotFound`
    pub async fn new(
        name: impl Into<String>,
        config: &CacheOutputConfig,
        registry: Arc<ResourceRegistry<C>>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let key = InterpolatedField::compile(&config.key)?;
        let ttl = InterpolatedField::compile(&config.ttl)?;
        if !registry.probe(&config.target).await {
            return Err(ContractError::resource_not_found("cache", &config.target));
        }

        Ok(Self {
            dispatcher: BatchDispatcher::new(&name),
            name,
            target: config.target.clone(),
            key,
            ttl,
            registry,
        })
    }

    fn resolve_ttl(&self, index: usize, batch: &Batch) -> Result<Option<Duration>, ContractError> {
        let raw = self.ttl.resolve_string(index, batch);
        if raw.is_empty() {
            return Ok(None);
        }
        humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ContractError::resolution(format!("ttl field: {e}")))
    }
}

impl<C: Cache> BatchAction for CacheWriter<C> {
    async fn apply_batch(
        &self,
        batch: &Batch,
        _cancel: &CancellationToken,
    ) -> Result<(), ContractError> {
        let cache = self
            .registry
            .access(&self.target)
            .await
            .ok_or_else(|| ContractError::resource_not_found("cache", &self.target))?;

        if batch.len() == 1 {
            let ttl = self.resolve_ttl(0, batch)?;
            let key = self.key.resolve_string(0, batch);
            let value = batch
                .get(0)
                .map(|m| m.as_bytes().clone())
                .unwrap_or_default();
            return cache.set(&key, value, ttl).await;
        }

        let mut items = HashMap::with_capacity(batch.len());
        for (index, message) in batch.iter().enumerate() {
            let ttl = self.resolve_ttl(index, batch)?;
            items.insert(
                self.key.resolve_string(index, batch),
                TtlItem {
                    value: message.as_bytes().clone(),
                    ttl,
                },
            );
        }
        cache.set_multi(items).await
    }
}

impl<C: Cache> BatchWriter for CacheWriter<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn granularity(&self) -> FailureGranularity {
        FailureGranularity::PerBatch
    }

    async fn connect(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, target = %self.target, "Writing messages to cache");
        Ok(())
    }

    #[instrument(
        name = "cache_writer_write",
        skip(self, batch, cancel),
        fields(sink = %self.name, size = batch.len())
    )]
    async fn write(
        &mut self,
        batch: Batch,
        cancel: &CancellationToken,
    ) -> Result<Batch, ContractError> {
        if batch.is_empty() {
            return Ok(batch);
        }
        let batch = self.dispatcher.dispatch_batch(&*self, batch, cancel).await?;
        debug!(sink = %self.name, "Batch cached");
        Ok(batch)
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}
