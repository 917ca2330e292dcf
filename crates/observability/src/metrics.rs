//! Dispatch metrics
//!
//! Prometheus counters and histograms for output writes, plus an in-memory
//! aggregator for end-of-run summaries.

use std::collections::BTreeMap;

use metrics::{counter, histogram};

/// Record a batch accepted by an output
pub fn record_batch_written(output: &str, items: usize) {
    counter!("sinkline_batches_written_total", "output" => output.to_string()).increment(1);
    counter!("sinkline_items_written_total", "output" => output.to_string())
        .increment(items as u64);
}

/// Record a batch that failed as a unit
pub fn record_batch_failed(output: &str) {
    counter!("sinkline_batches_failed_total", "output" => output.to_string()).increment(1);
}

/// Record a single message that carries an item error
pub fn record_item_failed(output: &str) {
    counter!("sinkline_items_failed_total", "output" => output.to_string()).increment(1);
}

/// Record a retried attempt of an external call
pub fn record_retry_attempt(label: &str, attempt: u32) {
    counter!("sinkline_retry_attempts_total", "label" => label.to_string()).increment(1);
    histogram!("sinkline_retry_attempt", "label" => label.to_string()).record(f64::from(attempt));
}

/// Record end-to-end latency of one batch write
pub fn record_write_latency_ms(output: &str, latency_ms: f64) {
    histogram!("sinkline_write_latency_ms", "output" => output.to_string()).record(latency_ms);
}

/// Record a write that was cancelled or timed out
pub fn record_cancelled(output: &str) {
    counter!("sinkline_writes_cancelled_total", "output" => output.to_string()).increment(1);
}

/// Counters for one output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputCounts {
    pub batches_written: u64,
    pub batches_failed: u64,
    pub batches_cancelled: u64,
    pub items_written: u64,
    pub items_failed: u64,
}

/// Dispatch statistics aggregated in memory
#[derive(Debug, Clone, Default)]
pub struct DispatchStatsAggregator {
    outputs: BTreeMap<String, OutputCounts>,
    latency_stats: RunningStats,
}

impl DispatchStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch of `items` messages returned, `failed_items` of them with item errors
    pub fn record_written(&mut self, output: &str, items: usize, failed_items: usize, latency_ms: f64) {
        let counts = self.outputs.entry(output.to_string()).or_default();
        counts.batches_written += 1;
        counts.items_written += (items - failed_items.min(items)) as u64;
        counts.items_failed += failed_items as u64;
        self.latency_stats.push(latency_ms);
    }

    /// A batch failed as a unit
    pub fn record_failed(&mut self, output: &str, cancelled: bool) {
        let counts = self.outputs.entry(output.to_string()).or_default();
        if cancelled {
            counts.batches_cancelled += 1;
        } else {
            counts.batches_failed += 1;
        }
    }

    /// Counters for one output
    pub fn counts(&self, output: &str) -> OutputCounts {
        self.outputs.get(output).copied().unwrap_or_default()
    }

    pub fn summary(&self) -> DispatchSummary {
        let total = self
            .outputs
            .values()
            .fold(OutputCounts::default(), |mut acc, c| {
                acc.batches_written += c.batches_written;
                acc.batches_failed += c.batches_failed;
                acc.batches_cancelled += c.batches_cancelled;
                acc.items_written += c.items_written;
                acc.items_failed += c.items_failed;
                acc
            });
        let attempted = total.batches_written + total.batches_failed + total.batches_cancelled;

        DispatchSummary {
            total,
            batch_failure_rate: if attempted > 0 {
                (total.batches_failed + total.batches_cancelled) as f64 / attempted as f64 * 100.0
            } else {
                0.0
            },
            write_latency_ms: StatsSummary::from(&self.latency_stats),
            outputs: self.outputs.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Summary printed at the end of a run
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub total: OutputCounts,
    pub batch_failure_rate: f64,
    pub write_latency_ms: StatsSummary,
    pub outputs: BTreeMap<String, OutputCounts>,
}

impl std::fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Summary ===")?;
        writeln!(
            f,
            "Batches: {} written, {} failed, {} cancelled ({:.2}% unsuccessful)",
            self.total.batches_written,
            self.total.batches_failed,
            self.total.batches_cancelled,
            self.batch_failure_rate
        )?;
        writeln!(
            f,
            "Items: {} written, {} with errors",
            self.total.items_written, self.total.items_failed
        )?;
        writeln!(f, "Write latency (ms): {}", self.write_latency_ms)?;

        if !self.outputs.is_empty() {
            writeln!(f, "Per output:")?;
            for (name, c) in &self.outputs {
                writeln!(
                    f,
                    "  {}: batches {}/{}/{} items {}/{}",
                    name,
                    c.batches_written,
                    c.batches_failed,
                    c.batches_cancelled,
                    c.items_written,
                    c.items_failed
                )?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
