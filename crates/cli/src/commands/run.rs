//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineOptions};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        cache_resources = config.cache_resources.len(),
        outputs = config.outputs.len(),
        "Configuration loaded"
    );

    let options = PipelineOptions {
        input: args.input.clone(),
        batch_size: usize::try_from(args.batch_size).unwrap_or(usize::MAX),
        queue_capacity: args.queue_capacity,
        write_timeout: (args.write_timeout_ms > 0)
            .then(|| Duration::from_millis(args.write_timeout_ms)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            warn!("Received shutdown signal, stopping pipeline...");
            shutdown.cancel();
        }
    });

    info!("Starting pipeline...");
    let result = Pipeline::new(config, options).run(shutdown).await;
    signal_task.abort();

    let stats = result.context("Pipeline execution failed")?;
    info!(
        batches = stats.batches_read,
        messages = stats.messages_read,
        duration_secs = stats.duration.as_secs_f64(),
        rate = format!("{:.2}", stats.messages_per_sec()),
        "Pipeline completed"
    );
    stats.print_summary();

    info!("sinkline finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
