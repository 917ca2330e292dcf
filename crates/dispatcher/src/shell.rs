//! AsyncWriter - connect/write/close lifecycle around one `BatchWriter`

use std::sync::Arc;
use std::time::Duration;

use contracts::{Batch, BatchWriter, ContractError, FailureGranularity};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Lifecycle state of a shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Unconnected,
    Connected,
    Closing,
    Closed,
}

/// Lifecycle wrapper around a writer
///
/// Writes are serialized: the writer sits behind an async mutex and each
/// batch is processed fully before the next.
pub struct AsyncWriter<W> {
    name: String,
    granularity: FailureGranularity,
    writer: Arc<Mutex<W>>,
    state: Arc<watch::Sender<ShellState>>,
    shutdown: CancellationToken,
    no_cancel: bool,
}

impl<W: BatchWriter + Send + 'static> AsyncWriter<W> {
    pub fn new(writer: W) -> Self {
        let (state, _) = watch::channel(ShellState::Unconnected);
        Self {
            name: writer.name().to_string(),
            granularity: writer.granularity(),
            writer: Arc::new(Mutex::new(writer)),
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            no_cancel: false,
        }
    }

    /// Never interrupt writes on shutdown
    pub fn set_no_cancel(&mut self) {
        self.no_cancel = true;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn granularity(&self) -> FailureGranularity {
        self.granularity
    }

    pub fn state(&self) -> ShellState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<ShellState> {
        self.state.subscribe()
    }

    fn closed_error(&self) -> ContractError {
        ContractError::Closed {
            sink_name: self.name.clone(),
        }
    }

    /// Connect the writer
    ///
    /// No-op when already connected. May be called again after a failure.
    ///
    /// # Errors
    /// The writer's connect error, or `Closed` once shutdown has started
    #[instrument(name = "shell_connect", skip(self), fields(sink = %self.name))]
    pub async fn connect(&self) -> Result<(), ContractError> {
        match self.state() {
            ShellState::Connected => return Ok(()),
            ShellState::Closing | ShellState::Closed => return Err(self.closed_error()),
            ShellState::Unconnected => {}
        }

        let mut writer = self.writer.lock().await;
        if self.state() != ShellState::Unconnected {
            return match self.state() {
                ShellState::Connected => Ok(()),
                _ => Err(self.closed_error()),
            };
        }
        writer.connect().await?;
        let connected = self.state.send_if_modified(|state| {
            if *state == ShellState::Unconnected {
                *state = ShellState::Connected;
                true
            } else {
                false
            }
        });
        if !connected {
            return Err(self.closed_error());
        }
        info!(sink = %self.name, "Output connected");
        Ok(())
    }

    /// Write a batch
    ///
    /// Races the writer against shutdown (unless no-cancel) and against
    /// `deadline` when given. Past the deadline a per-batch writer is
    /// abandoned with `Timeout`; a per-item writer is cancelled and returns
    /// its batch with the unfinished messages marked `Cancelled`.
    ///
    /// # Errors
    /// `NotConnected` before `connect`, `Closed` once shutdown started,
    /// `Timeout` past the deadline, or the writer's error
    pub async fn write(&self, batch: Batch, deadline: Option<Duration>) -> Result<Batch, ContractError> {
        match self.state() {
            ShellState::Connected => {}
            ShellState::Unconnected => {
                return Err(ContractError::NotConnected {
                    sink_name: self.name.clone(),
                })
            }
            ShellState::Closing | ShellState::Closed => return Err(self.closed_error()),
        }

        let cancel = if self.no_cancel {
            CancellationToken::new()
        } else {
            self.shutdown.child_token()
        };

        let run = async {
            let mut writer = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ContractError::Cancelled),
                writer = self.writer.lock() => writer,
            };
            writer.write(batch, &cancel).await
        };

        let Some(limit) = deadline else {
            return run.await;
        };
        tokio::pin!(run);
        tokio::select! {
            biased;
            result = &mut run => result,
            _ = tokio::time::sleep(limit) => {
                let timeout = ContractError::timeout(format!("write to {}", self.name), limit);
                if self.granularity == FailureGranularity::PerBatch {
                    return Err(timeout);
                }
                // Per-item writers stop at the in-flight message and hand
                // back the batch with the rest marked cancelled
                debug!(sink = %self.name, ?limit, "Write deadline reached, cancelling remaining messages");
                cancel.cancel();
                match run.await {
                    Err(ContractError::Cancelled) => Err(timeout),
                    other => other,
                }
            }
        }
    }

    /// Begin shutdown without blocking
    ///
    /// Cancels in-flight writes (unless no-cancel), then closes the writer
    /// once it is free.
    pub fn close_async(&self) {
        let already_closing = !self.state.send_if_modified(|state| match state {
            ShellState::Unconnected | ShellState::Connected => {
                *state = ShellState::Closing;
                true
            }
            ShellState::Closing | ShellState::Closed => false,
        });
        if already_closing {
            return;
        }

        if !self.no_cancel {
            self.shutdown.cancel();
        }

        let writer = Arc::clone(&self.writer);
        let state = Arc::clone(&self.state);
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.close().await {
                error!(sink = %name, error = %e, "Close failed");
            }
            state.send_replace(ShellState::Closed);
            debug!(sink = %name, "Output closed");
        });
    }

    /// Wait up to `timeout` for the writer to close
    ///
    /// # Errors
    /// `Timeout` if it has not closed in time
    pub async fn wait_for_close(&self, timeout: Duration) -> Result<(), ContractError> {
        let mut rx = self.subscribe();
        let closed = tokio::time::timeout(timeout, async {
            rx.wait_for(|state| *state == ShellState::Closed)
                .await
                .map(|_| ())
        })
        .await;
        match closed {
            Ok(_) => Ok(()),
            Err(_) => Err(ContractError::timeout(
                format!("close of {}", self.name),
                timeout,
            )),
        }
    }
}
