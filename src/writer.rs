//! Dedicated writer task for the worker's stdin.
//!
//! Callers never touch the pipe directly. Each encoded call is handed to a
//! writer task through an mpsc channel, so concurrent calls cannot interleave
//! partial lines, and lines that queue up are batched into one vectored write.
//!
//! # Architecture
//!
//! ```text
//! chat_turn ─┐
//! feedback  ─┼─► mpsc::Sender<OutboundLine> ─► Writer Task ─► worker stdin
//! transcribe─┘
//! ```

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SimulatorError};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum lines to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded call ready to be written to the worker.
#[derive(Debug, Clone)]
pub struct OutboundLine {
    /// Call id, for diagnostics.
    pub id: u64,
    /// Encoded record including its trailing `\n`.
    pub line: Bytes,
}

impl OutboundLine {
    #[inline]
    pub fn new(id: u64, line: Bytes) -> Self {
        Self { id, line }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.line.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the line queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending lines to the writer task.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundLine>,
}

impl WriterHandle {
    /// Queue a line for writing.
    ///
    /// Fails with `ConnectionClosed` once the writer task has stopped
    /// (worker stdin closed or a write failed).
    pub async fn send(&self, line: OutboundLine) -> Result<()> {
        self.tx
            .send(line)
            .await
            .map_err(|_| SimulatorError::ConnectionClosed)
    }
}

/// Spawn the writer task and return a handle for sending lines.
///
/// The returned `JoinHandle` completes when every handle is dropped or a
/// write fails.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundLine>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(l) => l,
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        let first_id = batch[0].id;
        let last_id = batch[batch.len() - 1].id;
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::warn!(first_id, last_id, error = %e, "Worker stdin writer stopped");
            return Err(e);
        }
        tracing::trace!(first_id, last_id, count = batch.len(), "Wrote call batch");
    }
}

/// Write a batch of lines using scatter/gather I/O, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundLine]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundLine::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(SimulatorError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundLine], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut start = 0;

    for line in batch {
        let end = start + line.size();
        if skip_bytes < end {
            let offset = skip_bytes.saturating_sub(start);
            slices.push(IoSlice::new(&line.line[offset..]));
        }
        start = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    fn line(id: u64, text: &'static str) -> OutboundLine {
        OutboundLine::new(id, Bytes::from_static(text.as_bytes()))
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![line(1, "ab\n"), line(2, "cd\n")];
        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial() {
        let batch = vec![line(1, "ab\n"), line(2, "cd\n")];

        let slices = build_remaining_slices(&batch, 1);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"b\n");

        let slices = build_remaining_slices(&batch, 4);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"d\n");
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch = vec![line(1, "one\n"), line(2, "two\n"), line(3, "three\n")];

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner(), b"one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(line(1, "{\"id\":1}\n")).await.unwrap();
        handle.send(line(2, "{\"id\":2}\n")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"{\"id\":1}\n{\"id\":2}\n");
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_send_after_reader_gone_fails() {
        let (client, server) = duplex(16);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());
        drop(server);

        // The first write hits the closed pipe and stops the task.
        let _ = handle.send(line(1, "{\"id\":1}\n")).await;
        let result = task.await.unwrap();
        assert!(result.is_err());

        let err = handle.send(line(2, "{\"id\":2}\n")).await.unwrap_err();
        assert!(matches!(err, SimulatorError::ConnectionClosed));
    }
}
