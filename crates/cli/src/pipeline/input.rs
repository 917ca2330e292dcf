//! Line-delimited message source grouped into batches.

use contracts::{Batch, Message};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::error::{CliError, Result};

type BoxedInput = Box<dyn AsyncRead + Unpin + Send>;

/// Reads one message per line and groups them into batches
///
/// `next_batch` is cancel safe: lines read before a cancelled call are kept
/// for the next one.
pub struct BatchReader<R> {
    name: String,
    lines: Lines<R>,
    batch_size: usize,
    pending: Vec<Message>,
}

impl BatchReader<BufReader<BoxedInput>> {
    /// Open a file, or stdin for `-`
    pub async fn open(source: &str, batch_size: usize) -> Result<Self> {
        let reader: BoxedInput = if source == "-" {
            Box::new(tokio::io::stdin())
        } else {
            let file = tokio::fs::File::open(source)
                .await
                .map_err(|e| CliError::input(source, e))?;
            Box::new(file)
        };
        Ok(Self::new(source, BufReader::new(reader), batch_size))
    }
}

impl<R: AsyncBufRead + Unpin> BatchReader<R> {
    pub fn new(name: impl Into<String>, reader: R, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            name: name.into(),
            lines: reader.lines(),
            batch_size,
            pending: Vec::with_capacity(batch_size),
        }
    }

    /// Next full batch, or the final partial one at end of input
    ///
    /// Blank lines are skipped.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        while self.pending.len() < self.batch_size {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| CliError::input(self.name.clone(), e))?;
            match line {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => self.pending.push(Message::new(line)),
                None => break,
            }
        }
        Ok(self.take_pending())
    }

    /// Messages read but not yet returned
    pub fn take_pending(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        let messages = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        Some(Batch::new(messages))
    }
}
