//! BatchWriter trait - connector lifecycle interface
//!
//! Defines the contract every sink connector honors: connect, write batches,
//! close.

use tokio_util::sync::CancellationToken;

use crate::{Batch, ContractError};

/// How a writer reports failures within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureGranularity {
    /// Any failure fails the whole batch; no item errors are attached
    PerBatch,
    /// Failures are attached to individual messages; the batch always returns
    PerItem,
}

/// Batch output trait
///
/// All sink connectors must implement this trait.
#[trait_variant::make(BatchWriter: Send)]
pub trait LocalBatchWriter {
    /// Writer name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Failure granularity of this writer
    fn granularity(&self) -> FailureGranularity;

    /// Establish the connection. May be called again after a failed attempt.
    async fn connect(&mut self) -> Result<(), ContractError>;

    /// Write a batch
    ///
    /// Returns the batch with the same length as the input. Per-item writers
    /// attach item errors to failed messages; per-batch writers return `Err`.
    ///
    /// # Errors
    /// Whole-batch failure, including `Cancelled` once `cancel` fires
    async fn write(
        &mut self,
        batch: Batch,
        cancel: &CancellationToken,
    ) -> Result<Batch, ContractError>;

    /// Close writer
    async fn close(&mut self) -> Result<(), ContractError>;
}
