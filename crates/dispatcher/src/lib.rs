//! # Dispatcher
//!
//! Batched output dispatch.
//!
//! Responsibilities:
//! - Apply sink actions across a batch with per-item or per-batch isolation
//! - Retry transient external failures with a cancellable delay
//! - Wrap each writer in a connect/write/close lifecycle shell
//! - Run `max_in_flight` shells per output behind one bounded queue

pub mod dispatch;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod retry;
pub mod shell;
pub mod sinks;

pub use contracts::{Batch, BatchWriter, Codec, FailureGranularity};
pub use dispatch::{BatchAction, BatchDispatcher, ItemAction};
pub use dispatcher::{
    create_dispatcher, create_output, DispatchOutcome, Dispatcher, DispatcherBuilder,
};
pub use error::DispatcherError;
pub use handle::{HandleOptions, OutputHandle, PendingWrite};
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use retry::{RetryPolicy, RetryState};
pub use shell::{AsyncWriter, ShellState};
pub use sinks::{CacheWriter, CommandProcessor, StreamWriter};
