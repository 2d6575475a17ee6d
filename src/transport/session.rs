//! Queued session writer.
//!
//! Sealed packets go through a bounded mpsc channel to a dedicated writer
//! task, which batches whatever is ready into vectored writes.
//!
//! ```text
//! AbilityInvoker ─► SessionSender ─► mpsc ─► writer task ─► session stream
//! ```
//!
//! Sending never blocks: a full queue is reported as a rejection.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::DmsTransport;
use crate::codec::u32_to_wire;
use crate::config::DmsConfig;
use crate::error::{DmsError, Result};

/// Size of the length prefix in front of each packet on a stream session.
pub const SESSION_HEADER_SIZE: usize = 4;

/// Maximum packets written in one batch.
const MAX_BATCH_SIZE: usize = 32;

/// A packet with its session length prefix.
#[derive(Debug)]
pub struct SessionPacket {
    pub header: [u8; SESSION_HEADER_SIZE],
    pub packet: Bytes,
}

impl SessionPacket {
    pub fn new(packet: Bytes) -> Result<Self> {
        let len = u32::try_from(packet.len()).map_err(|_| {
            DmsError::TransportRejected(format!("packet of {} bytes too large", packet.len()))
        })?;
        Ok(Self {
            header: u32_to_wire(len),
            packet,
        })
    }

    /// Bytes this packet occupies on the stream.
    #[inline]
    pub fn size(&self) -> usize {
        SESSION_HEADER_SIZE + self.packet.len()
    }
}

/// Cloneable sending half of a session.
#[derive(Clone)]
pub struct SessionSender {
    tx: mpsc::Sender<SessionPacket>,
    /// Packets accepted but not yet written.
    pending: Arc<AtomicUsize>,
}

impl SessionSender {
    fn new(tx: mpsc::Sender<SessionPacket>, pending: Arc<AtomicUsize>) -> Self {
        Self { tx, pending }
    }

    /// Enqueue a packet without waiting.
    pub fn try_send(&self, packet: Bytes) -> Result<()> {
        let packet = SessionPacket::new(packet)?;

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(packet).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!("session queue full, rejecting packet");
                    DmsError::TransportRejected("session queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => DmsError::ConnectionClosed,
            }
        })
    }

    /// Packets accepted but not yet written to the session.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl DmsTransport for SessionSender {
    fn send(&self, packet: Bytes) -> Result<()> {
        self.try_send(packet)
    }
}

/// Spawn the session writer task.
///
/// The queue holds `config.session_queue_capacity` packets. Returns the
/// sender and the task handle. The task ends cleanly once every sender is
/// dropped, or with an error if the stream fails.
pub fn spawn_session_writer<W>(
    writer: W,
    config: &DmsConfig,
) -> (SessionSender, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.session_queue_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));
    let sender = SessionSender::new(tx, pending.clone());
    let task = tokio::spawn(writer_loop(rx, writer, pending));
    (sender, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<SessionPacket>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(packet) => batch.push(packet),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("session write failed: {}", e);
            return Err(e);
        }
        pending.fetch_sub(batch_size, Ordering::Release);
    }
    Ok(())
}

/// Write a batch with vectored writes, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[SessionPacket]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(SessionPacket::size).sum();
    let mut written = 0;

    while written < total_size {
        let slices = remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(DmsError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "session accepted no bytes",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices covering everything after the first `skip` bytes of the batch.
fn remaining_slices(batch: &[SessionPacket], skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for item in batch {
        for part in [&item.header[..], &item.packet[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip < end {
                slices.push(IoSlice::new(&part[skip.saturating_sub(offset)..]));
            }
            offset = end;
        }
    }

    slices
}
