//! OutputHandle - runs `max_in_flight` shells behind one bounded queue

use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{Batch, BatchWriter, ContractError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::metrics::SinkMetrics;
use crate::retry::RetryPolicy;
use crate::shell::{AsyncWriter, ShellState};

/// Worker settings shared by every shell of an output
#[derive(Debug, Clone, Copy)]
pub struct HandleOptions {
    /// Pending batches accepted before `submit` waits
    pub queue_capacity: usize,
    /// Deadline for one batch write
    pub write_timeout: Option<Duration>,
    /// How long each shell may take to close on shutdown
    pub shutdown_timeout: Duration,
    /// Retries when a shell fails to connect
    pub connect_retry: RetryPolicy,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            write_timeout: None,
            shutdown_timeout: Duration::from_secs(5),
            connect_retry: RetryPolicy::new(3, Duration::from_secs(1)),
        }
    }
}

struct Job {
    batch: Batch,
    ack: oneshot::Sender<Result<Batch, ContractError>>,
}

/// Result of a submitted batch, resolved once a worker has written it
pub struct PendingWrite {
    name: String,
    rx: oneshot::Receiver<Result<Batch, ContractError>>,
}

impl PendingWrite {
    /// Wait for the write to finish
    pub async fn wait(self) -> Result<Batch, ContractError> {
        self.rx.await.unwrap_or_else(|_| {
            Err(ContractError::Closed {
                sink_name: self.name,
            })
        })
    }
}

/// Handle to a running output
pub struct OutputHandle {
    name: String,
    tx: async_channel::Sender<Job>,
    metrics: Arc<SinkMetrics>,
    workers: Vec<JoinHandle<()>>,
}

impl OutputHandle {
    /// Spawn one worker per shell
    ///
    /// Every shell pulls from the same queue, so up to `shells.len()`
    /// batches are in flight at once.
    pub fn spawn<W>(name: impl Into<String>, shells: Vec<AsyncWriter<W>>, options: HandleOptions) -> Self
    where
        W: BatchWriter + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = async_channel::bounded(options.queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let workers = shells
            .into_iter()
            .enumerate()
            .map(|(worker_id, shell)| {
                let rx = rx.clone();
                let metrics = Arc::clone(&metrics);
                let name = name.clone();
                tokio::spawn(async move {
                    output_worker(shell, rx, metrics, name, worker_id, options).await;
                })
            })
            .collect();

        Self {
            name,
            tx,
            metrics,
            workers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Number of worker shells
    pub fn max_in_flight(&self) -> usize {
        self.workers.len()
    }

    /// Queue a batch, waiting while the queue is full
    ///
    /// # Errors
    /// `QueueClosed` when every worker has stopped
    pub async fn submit(&self, batch: Batch) -> Result<PendingWrite, DispatcherError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Job { batch, ack })
            .await
            .map_err(|_| DispatcherError::QueueClosed {
                name: self.name.clone(),
            })?;
        self.metrics.set_queue_len(self.tx.len());
        Ok(PendingWrite {
            name: self.name.clone(),
            rx,
        })
    }

    /// Queue a batch and wait for its result
    pub async fn write(&self, batch: Batch) -> Result<Batch, DispatcherError> {
        Ok(self.submit(batch).await?.wait().await?)
    }

    /// Stop accepting batches, drain the queue, and close every shell
    #[instrument(name = "output_handle_shutdown", skip(self), fields(output = %self.name))]
    pub async fn shutdown(self) {
        self.tx.close();
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(output = %self.name, error = ?e, "Worker task panicked");
            }
        }
        debug!(output = %self.name, "OutputHandle shutdown complete");
    }
}

async fn ensure_connected<W: BatchWriter + Send + 'static>(
    shell: &AsyncWriter<W>,
    retry: &RetryPolicy,
    metrics: &SinkMetrics,
) -> Result<(), ContractError> {
    if shell.state() == ShellState::Connected {
        return Ok(());
    }
    let never = tokio_util::sync::CancellationToken::new();
    retry
        .execute(shell.name(), &never, || async {
            let result = shell.connect().await;
            if result.is_err() {
                metrics.inc_connect_failures();
            }
            result
        })
        .await
}

/// Worker task: connect lazily, write batches, close on shutdown
#[instrument(
    name = "output_worker_loop",
    skip(shell, rx, metrics, options),
    fields(output = %name, worker = worker_id)
)]
async fn output_worker<W: BatchWriter + Send + 'static>(
    shell: AsyncWriter<W>,
    rx: async_channel::Receiver<Job>,
    metrics: Arc<SinkMetrics>,
    name: String,
    worker_id: usize,
    options: HandleOptions,
) {
    debug!(output = %name, worker = worker_id, "Output worker started");

    while let Ok(job) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        if let Err(e) = ensure_connected(&shell, &options.connect_retry, &metrics).await {
            error!(output = %name, error = %e, "Output failed to connect");
            metrics.inc_batches_failed();
            observability::record_batch_failed(&name);
            let _ = job.ack.send(Err(e));
            continue;
        }

        let size = job.batch.len();
        let started = Instant::now();
        let result = shell.write(job.batch, options.write_timeout).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(batch) => {
                let failed = batch.errored_indices().len() as u64;
                metrics.inc_batches_written();
                metrics.add_items_failed(failed);
                observability::record_batch_written(&name, size);
                for _ in 0..failed {
                    observability::record_item_failed(&name);
                }
                observability::record_write_latency_ms(&name, latency_ms);
            }
            Err(e) if e.is_cancellation() => {
                metrics.inc_cancelled();
                observability::record_cancelled(&name);
                warn!(output = %name, error = %e, "Write cancelled");
            }
            Err(e) => {
                metrics.inc_batches_failed();
                observability::record_batch_failed(&name);
                error!(output = %name, size, error = %e, "Write failed");
            }
        }

        // Receiver may have given up on the result
        let _ = job.ack.send(result);
    }

    shell.close_async();
    match shell.wait_for_close(options.shutdown_timeout).await {
        Ok(()) => info!(output = %name, worker = worker_id, "Output closed"),
        Err(e) => warn!(output = %name, worker = worker_id, error = %e, "Output did not close in time"),
    }
}
