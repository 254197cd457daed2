//! Serial-port backend
// (c) 2025 Ross Younger

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, warn};

use super::LinkBackend;
use crate::error::TransportError;

/// Sizing for the inbound feed; the reader task parks if the consumer
/// falls this far behind.
const FEED_DEPTH: usize = 64;
const READ_BUFFER: usize = 1_024;

#[derive(Debug)]
pub(crate) struct SerialLink {
    writer: AsyncMutex<WriteHalf<SerialStream>>,
    reader_task: tokio::task::JoinHandle<()>,
    port_name: String,
}

/// Open `port` at `baud`, 8-N-1, no flow control, and start the reader
/// task that feeds inbound bytes to the returned receiver.
pub(crate) fn open(
    port: &str,
    baud: u32,
) -> Result<(Arc<dyn LinkBackend>, mpsc::Receiver<Bytes>), TransportError> {
    let stream = tokio_serial::new(port, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()?;
    debug!("opened {port} at {baud}");

    let (read_half, write_half) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(FEED_DEPTH);
    let reader_task = tokio::spawn(read_loop(read_half, tx));

    let link = Arc::new(SerialLink {
        writer: AsyncMutex::new(write_half),
        reader_task,
        port_name: port.to_string(),
    });
    Ok((link, rx))
}

/// Pushes everything the port produces into the feed. Ends (dropping the
/// sender, which the consumer sees as end-of-stream) on EOF or error.
async fn read_loop(mut reader: ReadHalf<SerialStream>, tx: mpsc::Sender<Bytes>) {
    let mut buf = [0u8; READ_BUFFER];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    break; // consumer gone
                }
            }
            Err(e) => {
                warn!("serial read: {e}");
                break;
            }
        }
    }
}

#[async_trait]
impl LinkBackend for SerialLink {
    async fn write_piece(&self, piece: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(piece).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        self.reader_task.abort();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn peer(&self) -> String {
        self.port_name.clone()
    }
}
