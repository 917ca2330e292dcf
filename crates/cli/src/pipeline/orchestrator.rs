//! Pipeline orchestrator - builds resources and outputs, then feeds them batches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{Batch, PipelineConfig};
use dispatcher::{Dispatcher, DispatcherBuilder};
use resources::ResourceRegistry;
use tokio::io::AsyncBufRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BatchReader, PipelineStats};

/// Run settings that come from the command line
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Message source path, `-` for stdin
    pub input: String,

    /// Messages per batch
    pub batch_size: usize,

    /// Pending batches per output
    pub queue_capacity: usize,

    /// Write deadline for outputs that do not set one
    pub write_timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, options: PipelineOptions) -> Self {
        Self { config, options }
    }

    /// Run until the input ends or `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineStats> {
        if let Some(port) = self.options.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let reader = BatchReader::open(&self.options.input, self.options.batch_size)
            .await
            .context("Failed to open input")?;
        info!(input = %self.options.input, batch_size = self.options.batch_size, "Reading messages");

        self.run_with_reader(reader, shutdown).await
    }

    /// Run against an already opened message source
    pub async fn run_with_reader<R: AsyncBufRead + Unpin>(
        self,
        mut reader: BatchReader<R>,
        shutdown: CancellationToken,
    ) -> Result<PipelineStats> {
        let start_time = Instant::now();

        let registry = ResourceRegistry::from_configs(&self.config.cache_resources)
            .await
            .context("Failed to create cache resources")?;
        info!(resources = registry.labels().await.len(), "Cache resources ready");

        let dispatcher = DispatcherBuilder::new(self.config.outputs.clone(), Arc::new(registry))
            .queue_capacity(self.options.queue_capacity)
            .write_timeout(self.options.write_timeout)
            .build()
            .await
            .context("Failed to create outputs")?;

        let mut stats = PipelineStats {
            active_outputs: dispatcher.output_names().len(),
            ..Default::default()
        };

        let read_result = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    warn!("Shutdown requested, draining outputs");
                    break Ok(());
                }
                next = reader.next_batch() => next,
            };
            match next {
                Ok(Some(batch)) => dispatch(&dispatcher, batch, &mut stats).await,
                Ok(None) => {
                    debug!("Input exhausted");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        if let Some(rest) = reader.take_pending() {
            dispatch(&dispatcher, rest, &mut stats).await;
        }

        info!("Shutting down outputs...");
        dispatcher.shutdown().await;
        read_result.context("Failed to read input")?;

        stats.duration = start_time.elapsed();
        info!(
            batches = stats.batches_read,
            messages = stats.messages_read,
            duration_secs = stats.duration.as_secs_f64(),
            "Pipeline shutdown complete"
        );
        Ok(stats)
    }
}

async fn dispatch(dispatcher: &Dispatcher, batch: Batch, stats: &mut PipelineStats) {
    stats.batches_read += 1;
    stats.messages_read += batch.len() as u64;
    for outcome in dispatcher.dispatch(&batch).await {
        stats.record_outcome(&outcome);
    }
}
