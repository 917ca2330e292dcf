//! Pipeline statistics.

use std::time::Duration;

use contracts::Message;
use dispatcher::{DispatchOutcome, DispatcherError};
use observability::DispatchStatsAggregator;
use tracing::{error, warn};

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Batches read from the input
    pub batches_read: u64,

    /// Messages read from the input
    pub messages_read: u64,

    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Number of configured outputs
    pub active_outputs: usize,

    /// Per-output write results
    pub dispatch: DispatchStatsAggregator,
}

impl PipelineStats {
    /// Messages read per second
    pub fn messages_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.messages_read as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Record one output's result for one batch, logging its failures
    pub fn record_outcome(&mut self, outcome: &DispatchOutcome) {
        let latency_ms = outcome.latency.as_secs_f64() * 1000.0;
        match &outcome.result {
            Ok(batch) => {
                let failed = batch.errored_indices();
                for index in &failed {
                    if let Some(err) = batch.get(*index).and_then(Message::error) {
                        warn!(output = %outcome.output, index, error = %err, "Message failed");
                    }
                }
                self.dispatch
                    .record_written(&outcome.output, batch.len(), failed.len(), latency_ms);
            }
            Err(e) => {
                let cancelled =
                    matches!(e, DispatcherError::Contract(inner) if inner.is_cancellation());
                error!(output = %outcome.output, error = %e, cancelled, "Batch failed");
                self.dispatch.record_failed(&outcome.output, cancelled);
            }
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Pipeline Statistics ===\n");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Batches read: {}", self.batches_read);
        println!("Messages read: {}", self.messages_read);
        println!("Messages/sec: {:.2}", self.messages_per_sec());
        println!("Outputs: {}", self.active_outputs);
        println!("\n{}", self.dispatch.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Batch, ContractError};

    fn outcome(result: Result<Batch, DispatcherError>) -> DispatchOutcome {
        DispatchOutcome {
            output: "items".to_string(),
            result,
            latency: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_record_outcomes() {
        let mut stats = PipelineStats::default();

        let mut batch = Batch::new(vec![Message::new("a"), Message::new("b")]);
        batch
            .get_mut(1)
            .unwrap()
            .set_error(ContractError::external("redis", "boom"));
        stats.record_outcome(&outcome(Ok(batch)));
        stats.record_outcome(&outcome(Err(DispatcherError::Contract(ContractError::Cancelled))));
        stats.record_outcome(&outcome(Err(DispatcherError::QueueClosed {
            name: "items".to_string(),
        })));

        let counts = stats.dispatch.counts("items");
        assert_eq!(counts.batches_written, 1);
        assert_eq!(counts.items_written, 1);
        assert_eq!(counts.items_failed, 1);
        assert_eq!(counts.batches_cancelled, 1);
        assert_eq!(counts.batches_failed, 1);
    }

    #[test]
    fn test_messages_per_sec() {
        let stats = PipelineStats {
            messages_read: 50,
            duration: Duration::from_secs(2),
            ..Default::default()
        };
        assert!((stats.messages_per_sec() - 25.0).abs() < f64::EPSILON);
        assert_eq!(PipelineStats::default().messages_per_sec(), 0.0);
    }
}
