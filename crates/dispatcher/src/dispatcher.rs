//! Dispatcher - builds outputs from configuration and fans batches out to them

use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{Batch, OutputConfig, OutputKind};
use resources::{CacheResource, RedisCommandClient, ResourceRegistry};
use tracing::{debug, info, instrument, warn};

use crate::error::DispatcherError;
use crate::handle::{HandleOptions, OutputHandle};
use crate::metrics::MetricsSnapshot;
use crate::retry::RetryPolicy;
use crate::shell::AsyncWriter;
use crate::sinks::{CacheWriter, CommandProcessor, StreamWriter};

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    outputs: Vec<OutputConfig>,
    registry: Arc<ResourceRegistry<CacheResource>>,
    queue_capacity: usize,
    write_timeout: Option<Duration>,
    connect_retry: RetryPolicy,
}

impl DispatcherBuilder {
    pub fn new(outputs: Vec<OutputConfig>, registry: Arc<ResourceRegistry<CacheResource>>) -> Self {
        let defaults = HandleOptions::default();
        Self {
            outputs,
            registry,
            queue_capacity: defaults.queue_capacity,
            write_timeout: None,
            connect_retry: defaults.connect_retry,
        }
    }

    /// Pending batches per output
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Write deadline applied to outputs that do not set their own
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn connect_retry(mut self, retry: RetryPolicy) -> Self {
        self.connect_retry = retry;
        self
    }

    /// Build and start every output
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(output_count = self.outputs.len())
    )]
    pub async fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut handles = Vec::with_capacity(self.outputs.len());
        for config in &self.outputs {
            let options = HandleOptions {
                queue_capacity: self.queue_capacity,
                write_timeout: config.write_timeout.or(self.write_timeout),
                shutdown_timeout: config.shutdown_timeout,
                connect_retry: self.connect_retry,
            };
            handles.push(create_output(config, &self.registry, options).await?);
        }
        info!(outputs = handles.len(), "Dispatcher started");
        Ok(Dispatcher { handles })
    }
}

/// Create an OutputHandle from configuration
#[instrument(
    name = "dispatcher_create_output",
    skip(config, registry, options),
    fields(output = %config.name, output_type = config.kind.type_name())
)]
pub async fn create_output(
    config: &OutputConfig,
    registry: &Arc<ResourceRegistry<CacheResource>>,
    options: HandleOptions,
) -> Result<OutputHandle, DispatcherError> {
    let name = config.name.as_str();
    let creation = |e: contracts::ContractError| DispatcherError::output_creation(name, e.to_string());
    let instances = config.max_in_flight.max(1);

    match &config.kind {
        OutputKind::Cache(cache) => {
            let mut shells = Vec::with_capacity(instances);
            for _ in 0..instances {
                let writer = CacheWriter::new(name, cache, Arc::clone(registry))
                    .await
                    .map_err(creation)?;
                shells.push(AsyncWriter::new(writer));
            }
            Ok(OutputHandle::spawn(name, shells, options))
        }
        OutputKind::Redis(redis) => {
            let shells = (0..instances)
                .map(|_| {
                    let client = Arc::new(RedisCommandClient::open(&redis.url)?);
                    CommandProcessor::new(name, redis, client).map(AsyncWriter::new)
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(creation)?;
            Ok(OutputHandle::spawn(name, shells, options))
        }
        OutputKind::Stdout(stdout) => {
            let codec = stdout.parsed_codec().map_err(creation)?;
            if instances > 1 {
                warn!(output = %name, max_in_flight = instances, "stdout output runs a single writer");
            }
            let mut shell = AsyncWriter::new(StreamWriter::stdout(name, codec));
            shell.set_no_cancel();
            Ok(OutputHandle::spawn(name, vec![shell], options))
        }
    }
}

/// Result of writing one batch to one output
#[derive(Debug)]
pub struct DispatchOutcome {
    pub output: String,
    pub result: Result<Batch, DispatcherError>,
    pub latency: Duration,
}

/// Fans every batch out to all outputs
pub struct Dispatcher {
    handles: Vec<OutputHandle>,
}

impl Dispatcher {
    /// Create a dispatcher with custom output handles (for testing)
    pub fn with_handles(handles: Vec<OutputHandle>) -> Self {
        Self { handles }
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.handles.iter().map(OutputHandle::name).collect()
    }

    pub fn handle(&self, name: &str) -> Option<&OutputHandle> {
        self.handles.iter().find(|h| h.name() == name)
    }

    /// Get metrics for all outputs
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Write `batch` to every output and wait for all results
    ///
    /// Outputs run concurrently; results come back in output order.
    #[instrument(name = "dispatcher_dispatch", skip(self, batch), fields(size = batch.len()))]
    pub async fn dispatch(&self, batch: &Batch) -> Vec<DispatchOutcome> {
        let started = Instant::now();
        let mut pending = Vec::with_capacity(self.handles.len());
        for handle in &self.handles {
            pending.push((handle.name(), handle.submit(batch.clone()).await));
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for (output, submitted) in pending {
            let result = match submitted {
                Ok(write) => write.wait().await.map_err(DispatcherError::from),
                Err(e) => Err(e),
            };
            outcomes.push(DispatchOutcome {
                output: output.to_string(),
                result,
                latency: started.elapsed(),
            });
        }
        debug!(outputs = outcomes.len(), "Batch dispatched");
        outcomes
    }

    /// Drain and close every output
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown(self) {
        for handle in self.handles {
            handle.shutdown().await;
        }
        info!("Dispatcher shutdown complete");
    }
}

/// Convenience function to create a dispatcher from output configs
pub async fn create_dispatcher(
    outputs: Vec<OutputConfig>,
    registry: Arc<ResourceRegistry<CacheResource>>,
) -> Result<Dispatcher, DispatcherError> {
    DispatcherBuilder::new(outputs, registry).build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        Cache, CacheKind, CacheOutputConfig, Message, RedisOutputConfig, StdoutOutputConfig,
    };
    use resources::MemoryCache;

    fn output(name: &str, kind: OutputKind) -> OutputConfig {
        OutputConfig {
            name: name.to_string(),
            max_in_flight: 1,
            write_timeout: None,
            shutdown_timeout: Duration::from_secs(5),
            kind,
        }
    }

    async fn registry() -> Arc<ResourceRegistry<CacheResource>> {
        let registry = Arc::new(ResourceRegistry::new());
        registry
            .insert("foo", CacheResource::Memory(MemoryCache::new(None)))
            .await;
        registry
    }

    #[tokio::test]
    async fn test_dispatch_to_cache_outputs() {
        let registry = registry().await;
        let configs = vec![
            output(
                "by_id",
                OutputKind::Cache(CacheOutputConfig {
                    target: "foo".to_string(),
                    key: r#"${!json("id")}"#.to_string(),
                    ttl: String::new(),
                }),
            ),
            OutputConfig {
                max_in_flight: 3,
                ..output(
                    "by_name",
                    OutputKind::Cache(CacheOutputConfig {
                        target: "foo".to_string(),
                        key: r#"name-${!json("name")}"#.to_string(),
                        ttl: "1h".to_string(),
                    }),
                )
            },
        ];
        let dispatcher = create_dispatcher(configs, Arc::clone(&registry))
            .await
            .unwrap();
        assert_eq!(dispatcher.output_names(), vec!["by_id", "by_name"]);
        assert_eq!(dispatcher.handle("by_name").unwrap().max_in_flight(), 3);

        let batch = Batch::new(vec![
            Message::new(r#"{"id":"a","name":"ash"}"#),
            Message::new(r#"{"id":"b","name":"brock"}"#),
        ]);
        let outcomes = dispatcher.dispatch(&batch).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));

        let cache = registry.access("foo").await.unwrap();
        assert!(cache.get("a").await.unwrap().is_some());
        assert!(cache.get("name-brock").await.unwrap().is_some());

        let metrics = dispatcher.metrics();
        assert_eq!(metrics[0].1.batches_written, 1);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_creation_errors() {
        let registry = registry().await;

        let missing_target = output(
            "x",
            OutputKind::Cache(CacheOutputConfig {
                target: "nope".to_string(),
                key: "k".to_string(),
                ttl: String::new(),
            }),
        );
        let bad_url = output(
            "y",
            OutputKind::Redis(RedisOutputConfig {
                url: "not a url".to_string(),
                command: "PING".to_string(),
                args_mapping: String::new(),
                operator: None,
                key: None,
                retries: 3,
                retry_period: Duration::from_millis(500),
            }),
        );
        let bad_codec = output(
            "z",
            OutputKind::Stdout(StdoutOutputConfig {
                codec: "csv".to_string(),
            }),
        );

        for config in [missing_target, bad_url, bad_codec] {
            let err = create_output(&config, &registry, HandleOptions::default())
                .await
                .err()
                .unwrap();
            assert!(
                matches!(&err, DispatcherError::OutputCreation { name, .. } if *name == config.name),
                "unexpected error {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_registry_from_config_feeds_outputs() {
        let registry = Arc::new(
            ResourceRegistry::from_configs(&[contracts::CacheResourceConfig {
                label: "foo".to_string(),
                kind: CacheKind::Memory { default_ttl: None },
            }])
            .await
            .unwrap(),
        );
        let config = output(
            "items",
            OutputKind::Cache(CacheOutputConfig {
                target: "foo".to_string(),
                key: "${!content()}".to_string(),
                ttl: String::new(),
            }),
        );
        let handle = create_output(&config, &registry, HandleOptions::default())
            .await
            .unwrap();
        handle.write(Batch::new(vec![Message::new("v")])).await.unwrap();
        handle.shutdown().await;

        let cache = registry.access("foo").await.unwrap();
        assert_eq!(cache.get("v").await.unwrap().unwrap().as_ref(), b"v");
    }
}
