//! BatchDispatcher - applies a sink action across a batch
//!
//! Two isolation modes:
//! - per item: the action runs once per message, in order, and failures are
//!   attached to the failing message
//! - per batch: the action runs once for the whole batch and any failure
//!   fails the batch

use contracts::{Batch, ContractError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Action applied to one message
#[trait_variant::make(ItemAction: Send)]
pub trait LocalItemAction {
    /// Process message `index`
    ///
    /// `input` is the untouched batch used for field resolution; results are
    /// written into `output`, the copy of that message returned to the caller.
    async fn apply_item(
        &self,
        index: usize,
        input: &Batch,
        output: &mut Message,
        cancel: &CancellationToken,
    ) -> Result<(), ContractError>;
}

/// Action applied to a whole batch
#[trait_variant::make(BatchAction: Send)]
pub trait LocalBatchAction {
    async fn apply_batch(&self, batch: &Batch, cancel: &CancellationToken)
        -> Result<(), ContractError>;
}

/// Runs actions over batches on behalf of one writer
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    name: String,
}

impl BatchDispatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply `action` to every message in order
    ///
    /// The returned batch has the input's length. Failing messages carry an
    /// item error; once `cancel` fires, every message not yet dispatched
    /// carries `ContractError::Cancelled`.
    pub async fn dispatch_items<A: ItemAction>(
        &self,
        action: &A,
        input: Batch,
        cancel: &CancellationToken,
    ) -> Batch {
        let mut output = input.clone();
        let mut cancelled = false;

        for (index, message) in output.iter_mut().enumerate() {
            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                message.set_error(ContractError::Cancelled);
                continue;
            }

            if let Err(e) = action.apply_item(index, &input, message, cancel).await {
                if matches!(e, ContractError::Cancelled) {
                    cancelled = true;
                } else {
                    warn!(sink = %self.name, index, error = %e, "Message dispatch failed");
                }
                message.set_error(e);
            }
        }

        if cancelled {
            debug!(sink = %self.name, "Dispatch cancelled, remaining messages marked");
        }
        output
    }

    /// Apply `action` once to the whole batch
    ///
    /// # Errors
    /// The action's error, or `ContractError::Cancelled`
    pub async fn dispatch_batch<A: BatchAction>(
        &self,
        action: &A,
        batch: Batch,
        cancel: &CancellationToken,
    ) -> Result<Batch, ContractError> {
        if cancel.is_cancelled() {
            return Err(ContractError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ContractError::Cancelled),
            result = action.apply_batch(&batch, cancel) => result,
        }?;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailOn {
        indices: Vec<usize>,
        cancel_at: Option<usize>,
        calls: AtomicUsize,
    }

    impl FailOn {
        fn new(indices: Vec<usize>) -> Self {
            Self {
                indices,
                cancel_at: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ItemAction for FailOn {
        async fn apply_item(
            &self,
            index: usize,
            input: &Batch,
            output: &mut Message,
            cancel: &CancellationToken,
        ) -> Result<(), ContractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel_at == Some(index) {
                cancel.cancel();
                return Err(ContractError::Cancelled);
            }
            if self.indices.contains(&index) {
                return Err(ContractError::external("test", format!("boom {index}")));
            }
            let upper = String::from_utf8_lossy(input.get(index).unwrap().as_bytes()).to_uppercase();
            output.set_bytes(upper);
            Ok(())
        }
    }

    fn batch(n: usize) -> Batch {
        (0..n).map(|i| Message::new(format!("m{i}"))).collect()
    }

    #[tokio::test]
    async fn test_item_failure_isolated() {
        let dispatcher = BatchDispatcher::new("test");
        let action = FailOn::new(vec![1, 3]);

        let out = dispatcher
            .dispatch_items(&action, batch(5), &CancellationToken::new())
            .await;

        assert_eq!(out.len(), 5);
        assert_eq!(out.errored_indices(), vec![1, 3]);
        assert_eq!(action.calls.load(Ordering::SeqCst), 5);
        assert_eq!(out.get(4).unwrap().as_bytes().as_ref(), b"M4");
        assert_eq!(out.get(1).unwrap().as_bytes().as_ref(), b"m1");
    }

    #[tokio::test]
    async fn test_cancel_marks_remaining() {
        let dispatcher = BatchDispatcher::new("test");
        let mut action = FailOn::new(vec![]);
        action.cancel_at = Some(2);

        let out = dispatcher
            .dispatch_items(&action, batch(5), &CancellationToken::new())
            .await;

        assert_eq!(out.len(), 5);
        assert_eq!(out.errored_indices(), vec![2, 3, 4]);
        assert_eq!(action.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            out.get(4).unwrap().error(),
            Some(ContractError::Cancelled)
        ));
    }

    struct CountBatch(AtomicUsize);

    impl BatchAction for CountBatch {
        async fn apply_batch(
            &self,
            batch: &Batch,
            _cancel: &CancellationToken,
        ) -> Result<(), ContractError> {
            self.0.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_batch() {
        let dispatcher = BatchDispatcher::new("test");
        let action = CountBatch(AtomicUsize::new(0));

        let out = dispatcher
            .dispatch_batch(&action, batch(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(action.0.load(Ordering::SeqCst), 3);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dispatcher
            .dispatch_batch(&action, batch(3), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::Cancelled));
        assert_eq!(action.0.load(Ordering::SeqCst), 3);
    }
}
