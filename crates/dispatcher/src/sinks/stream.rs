//! StreamWriter - frames messages onto a local byte stream

use contracts::{Batch, BatchWriter, Codec, ContractError, FailureGranularity};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Encode a batch into one buffer
pub fn encode(codec: &Codec, batch: &Batch) -> Vec<u8> {
    let suffix: &[u8] = match codec {
        Codec::Lines => b"\n",
        Codec::Delim(delim) => delim,
        Codec::AllBytes => b"",
    };
    let mut buf = Vec::with_capacity(
        batch.iter().map(|m| m.as_bytes().len() + suffix.len()).sum::<usize>() + suffix.len(),
    );
    for message in batch.iter() {
        buf.extend_from_slice(message.as_bytes());
        buf.extend_from_slice(suffix);
    }
    if batch.len() > 1 {
        buf.extend_from_slice(suffix);
    }
    buf
}

/// Writer over any `AsyncWrite`
///
/// Writes ignore cancellation: once started a batch is written in full.
pub struct StreamWriter<W> {
    name: String,
    writer: W,
    codec: Codec,
}

impl<W> StreamWriter<W> {
    pub fn new(name: impl Into<String>, writer: W, codec: Codec) -> Self {
        Self {
            name: name.into(),
            writer,
            codec,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl StreamWriter<tokio::io::Stdout> {
    /// Writer on the process stdout
    pub fn stdout(name: impl Into<String>, codec: Codec) -> Self {
        Self::new(name, tokio::io::stdout(), codec)
    }
}

impl<W: AsyncWrite + Unpin + Send> BatchWriter for StreamWriter<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn granularity(&self) -> FailureGranularity {
        FailureGranularity::PerBatch
    }

    async fn connect(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(
        name = "stream_writer_write",
        skip(self, batch, _cancel),
        fields(sink = %self.name, size = batch.len())
    )]
    async fn write(
        &mut self,
        batch: Batch,
        _cancel: &CancellationToken,
    ) -> Result<Batch, ContractError> {
        if batch.is_empty() {
            return Ok(batch);
        }
        let buf = encode(&self.codec, &batch);
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(batch)
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.writer.flush().await?;
        Ok(())
    }
}
