//! # Integration Tests
//!
//! End-to-end tests across crates.
//!
//! Covers:
//! - Contract surface checks
//! - Config -> registry -> outputs -> batches, with in-memory backends
//! - Result accounting through the stats aggregator

#[cfg(test)]
mod contract_tests {
    use contracts::{ContractError, FailureGranularity, OperatorKind};

    #[test]
    fn test_contracts_compile() {
        assert_eq!(OperatorKind::Incrby.as_str(), "incrby");
        assert_ne!(FailureGranularity::PerBatch, FailureGranularity::PerItem);
        assert!(ContractError::external("redis", "down").is_retryable());
        assert!(ContractError::Cancelled.is_cancellation());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{Batch, Cache, ContractError, Message, OutputKind, PipelineConfig};
    use dispatcher::{
        create_dispatcher, AsyncWriter, CommandProcessor, Dispatcher, DispatcherError,
        HandleOptions, OutputHandle,
    };
    use observability::DispatchStatsAggregator;
    use resources::{CacheResource, MemoryCache, MockCommandClient, MockCommandConfig, ResourceRegistry};

    const PIPELINE: &str = r#"
[[cache_resources]]
label = "foo"
type = "memory"

[[outputs]]
name = "items"
type = "cache"
target = "foo"
key = '${!json("id")}'
ttl = '${!meta("ttl")}'

[[outputs]]
name = "totals"
type = "redis"
url = "redis://localhost:6379"
command = "incrby"
args_mapping = "root = [this.name, this.friends_visited]"
retries = 0
"#;

    fn load() -> PipelineConfig {
        ConfigLoader::load_from_str(PIPELINE, ConfigFormat::Toml).unwrap()
    }

    fn visit(id: &str, name: &str, friends: i64, ttl: &str) -> Message {
        Message::new(format!(
            r#"{{"id":"{id}","name":"{name}","friends_visited":{friends}}}"#
        ))
        .with_metadata("ttl", ttl)
    }

    fn text(batch: &Batch, index: usize) -> String {
        String::from_utf8_lossy(batch.get(index).unwrap().as_bytes()).into_owned()
    }

    /// Cache outputs from config plus a command output over the mock client
    async fn build(
        config: &PipelineConfig,
        client: &Arc<MockCommandClient>,
    ) -> (Dispatcher, Arc<ResourceRegistry<CacheResource>>) {
        let registry = Arc::new(
            ResourceRegistry::from_configs(&config.cache_resources)
                .await
                .unwrap(),
        );

        let mut handles = Vec::new();
        for output in &config.outputs {
            let handle = match &output.kind {
                OutputKind::Redis(redis) => {
                    let processor =
                        CommandProcessor::new(&output.name, redis, Arc::clone(client)).unwrap();
                    OutputHandle::spawn(
                        &output.name,
                        vec![AsyncWriter::new(processor)],
                        HandleOptions::default(),
                    )
                }
                _ => dispatcher::create_output(output, &registry, HandleOptions::default())
                    .await
                    .unwrap(),
            };
            handles.push(handle);
        }
        (Dispatcher::with_handles(handles), registry)
    }

    /// Config -> registry -> outputs -> batches
    #[tokio::test]
    async fn test_e2e_mixed_outputs() {
        let config = load();
        let client = Arc::new(MockCommandClient::new());
        let (dispatcher, registry) = build(&config, &client).await;

        let first = Batch::new(vec![visit("v1", "ash", 10, "1h")]);
        let second = Batch::new(vec![visit("v2", "ash", -2, "1h")]);

        let mut stats = DispatchStatsAggregator::new();
        for batch in [&first, &second] {
            for outcome in dispatcher.dispatch(batch).await {
                let result = outcome.result.unwrap();
                stats.record_written(&outcome.output, result.len(), result.errored_indices().len(), 1.0);
            }
        }

        assert_eq!(client.get_string("ash").as_deref(), Some("8"));
        assert_eq!(client.history(), vec!["incrby ash 10", "incrby ash -2"]);

        let cache = registry.access("foo").await.unwrap();
        assert!(cache.get("v1").await.unwrap().is_some());
        assert!(cache.get("v2").await.unwrap().is_some());

        let summary = stats.summary();
        assert_eq!(summary.total.batches_written, 4);
        assert_eq!(summary.total.items_failed, 0);

        dispatcher.shutdown().await;
        assert_eq!(client.close_calls(), 1);
    }

    /// One bad message fails alone on a per-item output, the whole batch on a per-batch output
    #[tokio::test]
    async fn test_e2e_failure_granularity() {
        let config = load();
        let client = Arc::new(MockCommandClient::new());
        let (dispatcher, registry) = build(&config, &client).await;

        let batch = Batch::new(vec![
            visit("a", "ash", 1, "1h"),
            Message::new(r#"{"id":"b","friends_visited":2}"#).with_metadata("ttl", "soon"),
            visit("c", "misty", 3, "1h"),
        ]);
        let outcomes = dispatcher.dispatch(&batch).await;

        let items = outcomes.iter().find(|o| o.output == "items").unwrap();
        assert!(matches!(
            &items.result,
            Err(DispatcherError::Contract(ContractError::Resolution { .. }))
        ));
        let cache = registry.access("foo").await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());

        let totals = outcomes.iter().find(|o| o.output == "totals").unwrap();
        let out = totals.result.as_ref().unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.errored_indices(), vec![1]);
        assert_eq!(text(out, 0), "1");
        assert_eq!(text(out, 2), "3");

        let metrics = dispatcher.handle("totals").unwrap().metrics().snapshot();
        assert_eq!(metrics.items_failed, 1);
        assert_eq!(metrics.batches_written, 1);

        dispatcher.shutdown().await;
    }

    /// The cache writer looks its target up on every batch
    #[tokio::test]
    async fn test_e2e_registry_rotation() {
        let config = load();
        let registry = Arc::new(
            ResourceRegistry::from_configs(&config.cache_resources)
                .await
                .unwrap(),
        );
        let dispatcher = create_dispatcher(config.outputs[..1].to_vec(), Arc::clone(&registry))
            .await
            .unwrap();

        dispatcher
            .dispatch(&Batch::new(vec![visit("before", "ash", 1, "")]))
            .await;
        let old = registry
            .insert("foo", CacheResource::Memory(MemoryCache::new(None)))
            .await
            .unwrap();
        dispatcher
            .dispatch(&Batch::new(vec![visit("after", "ash", 1, "")]))
            .await;

        let current = registry.access("foo").await.unwrap();
        assert!(old.get("before").await.unwrap().is_some());
        assert!(old.get("after").await.unwrap().is_none());
        assert!(current.get("after").await.unwrap().is_some());

        registry.remove("foo").await;
        let outcomes = dispatcher
            .dispatch(&Batch::new(vec![visit("gone", "ash", 1, "")]))
            .await;
        assert!(matches!(
            &outcomes[0].result,
            Err(DispatcherError::Contract(ContractError::ResourceNotFound { .. }))
        ));

        dispatcher.shutdown().await;
    }

    /// Item TTLs resolved from metadata expire entries
    #[tokio::test]
    async fn test_e2e_ttl_expiry() {
        let config = load();
        let registry = Arc::new(
            ResourceRegistry::from_configs(&config.cache_resources)
                .await
                .unwrap(),
        );
        let dispatcher = create_dispatcher(config.outputs[..1].to_vec(), Arc::clone(&registry))
            .await
            .unwrap();

        let batch = Batch::new(vec![visit("short", "a", 0, "100ms"), visit("long", "b", 0, "1h")]);
        let outcomes = dispatcher.dispatch(&batch).await;
        assert!(outcomes[0].result.is_ok());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let cache = registry.access("foo").await.unwrap();
        assert!(cache.get("short").await.unwrap().is_none());
        assert!(cache.get("long").await.unwrap().is_some());

        dispatcher.shutdown().await;
    }

    /// Transient failures are retried by the command output
    #[tokio::test(start_paused = true)]
    async fn test_e2e_command_retries() {
        let mut config = load();
        if let OutputKind::Redis(redis) = &mut config.outputs[1].kind {
            redis.retries = 2;
        }
        let client = Arc::new(MockCommandClient::with_config(MockCommandConfig {
            transient_failures: 2,
            ..Default::default()
        }));
        let (dispatcher, _registry) = build(&config, &client).await;

        let outcomes = dispatcher
            .dispatch(&Batch::new(vec![visit("r", "brock", 5, "1h")]))
            .await;
        let totals = outcomes.iter().find(|o| o.output == "totals").unwrap();
        assert!(totals.result.as_ref().unwrap().errored_indices().is_empty());
        assert_eq!(client.execute_calls(), 3);
        assert_eq!(client.get_string("brock").as_deref(), Some("5"));

        dispatcher.shutdown().await;
    }
}
