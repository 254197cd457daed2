//! Byte-stream transports and the channel facade over them
// (c) 2025 Ross Younger
//!
//! A [`Channel`] owns one connection (serial port or BLE UART bridge)
//! and gives the protocol layers exactly two things: a FIFO-serialized,
//! chunked, paced send path, and a single inbound byte feed. The feed is
//! normally drained by a passive pump task that forwards device output to
//! the observer; a synchronous exchange takes exclusive ownership of the
//! feed for its duration (see [`Channel::suspend_pump`] and the feed
//! acquisition used by the session's exclusive guard).
//!
//! The raw-REPL protocol has no framing length prefixes, so correctness
//! depends on byte-order-preserving delivery: every logical write goes
//! through one fair async mutex, which yields a total order over outgoing
//! bytes no matter how many callers race.

mod ble;
mod serial;
#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::events::{EventSink, LinkStatus, SessionEvent};

/// Which kind of link to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Medium {
    /// A byte-stream serial connection (COM port / tty)
    Serial {
        /// Port path, e.g. `/dev/ttyUSB0` or `COM3`
        port: String,
        /// Baud rate (8-N-1, no flow control, is implied)
        baud: u32,
    },
    /// A BLE UART bridge (Nordic UART Service)
    Ble {
        /// Advertised-name prefix to filter discovery by
        name_prefix: String,
        /// How long to scan before giving up
        scan_timeout: Duration,
        /// Usable payload per write on this link
        mtu: usize,
    },
}

/// Everything needed to open a [`Channel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// The medium and its addressing
    pub medium: Medium,
    /// Bytes per low-level write. For BLE this must not exceed the MTU;
    /// for serial it is a backpressure tuning knob, not a hard limit.
    pub write_chunk: usize,
    /// Pause between low-level writes
    pub pace: Duration,
}

impl TransportConfig {
    fn validate(&self) -> Result<(), TransportError> {
        if self.write_chunk == 0 {
            return Err(TransportError::InvalidConfig(
                "write chunk must be positive".into(),
            ));
        }
        if let Medium::Ble { mtu, .. } = &self.medium {
            if self.write_chunk > *mtu {
                return Err(TransportError::InvalidConfig(format!(
                    "BLE write chunk {} exceeds link MTU {mtu}",
                    self.write_chunk
                )));
            }
        }
        Ok(())
    }
}

/// Capability seam between the channel and a concrete medium.
///
/// A backend performs one low-level write at a time and pushes whatever
/// arrives from the device into the mpsc feed it was created with;
/// dropping the feed sender signals end-of-stream.
#[async_trait]
pub(crate) trait LinkBackend: Send + Sync {
    /// Write one medium-sized piece to the device
    async fn write_piece(&self, piece: &[u8]) -> Result<(), TransportError>;
    /// Release the connection. Best-effort; must not fail.
    async fn close(&self);
    /// Human-readable name of the peer (port path or device name)
    fn peer(&self) -> String;
}

/// The inbound byte feed. Exactly one consumer at a time: either the
/// passive pump or an exclusive exchange.
#[derive(Debug)]
pub(crate) struct ByteFeed {
    rx: mpsc::Receiver<Bytes>,
}

impl ByteFeed {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Next fragment, or None at end-of-stream
    pub(crate) async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Next fragment, bounded by a deadline.
    /// `Err(())` means the deadline expired.
    pub(crate) async fn next_until(&mut self, deadline: Instant) -> Result<Option<Bytes>, ()> {
        tokio::time::timeout_at(deadline, self.rx.recv())
            .await
            .map_err(|_| ())
    }
}

struct Pump {
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// One byte-stream connection plus its send queue and receive pump.
///
/// Created on connect, destroyed on disconnect. Cheap to share via `Arc`.
pub struct Channel {
    backend: Arc<dyn LinkBackend>,
    write_gate: AsyncMutex<()>,
    write_chunk: usize,
    pace: Duration,
    feed: Arc<AsyncMutex<ByteFeed>>,
    pump: std::sync::Mutex<Option<Pump>>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.backend.peer())
            .field("write_chunk", &self.write_chunk)
            .field("pace", &self.pace)
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Establish the link described by `config`.
    ///
    /// Fails with [`TransportError`] if the medium is unavailable or no
    /// matching device is found.
    pub async fn open(
        config: &TransportConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>, TransportError> {
        config.validate()?;
        let (backend, rx) = match &config.medium {
            Medium::Serial { port, baud } => serial::open(port, *baud)?,
            Medium::Ble {
                name_prefix,
                scan_timeout,
                ..
            } => ble::open(name_prefix, *scan_timeout).await?,
        };
        let channel = Arc::new(Self::from_parts(
            backend,
            rx,
            config.write_chunk,
            config.pace,
            sink,
        ));
        channel.sink.event(SessionEvent::Status(LinkStatus::Connected {
            peer: channel.backend.peer(),
        }));
        Ok(channel)
    }

    pub(crate) fn from_parts(
        backend: Arc<dyn LinkBackend>,
        rx: mpsc::Receiver<Bytes>,
        write_chunk: usize,
        pace: Duration,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            backend,
            write_gate: AsyncMutex::new(()),
            write_chunk,
            pace,
            feed: Arc::new(AsyncMutex::new(ByteFeed::new(rx))),
            pump: std::sync::Mutex::new(None),
            sink,
        }
    }

    /// Enqueue one logical write.
    ///
    /// Concurrent callers are serialized: the async mutex here is fair,
    /// so writes go out in request order and are never interleaved at the
    /// byte level. Within one call the bytes are sliced into
    /// `write_chunk`-sized pieces with the configured pace between them.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let _gate = self.write_gate.lock().await;
        trace!("send {} bytes", bytes.len());
        for piece in bytes.chunks(self.write_chunk) {
            self.backend.write_piece(piece).await?;
            if !self.pace.is_zero() {
                tokio::time::sleep(self.pace).await;
            }
        }
        Ok(())
    }

    /// Start the passive receive pump: a background task that decodes
    /// incoming bytes and forwards them to the observer as log text.
    /// No-op if already running.
    pub fn start_pump(&self) {
        let mut slot = self.pump.lock().expect("pump lock poisoned");
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let stop = token.clone();
        let feed = self.feed.clone();
        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            // Hold the feed for the whole pump lifetime; suspend_pump
            // cancels us, which releases it to the exclusive caller.
            let mut feed = feed.lock().await;
            debug!("receive pump started");
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    fragment = feed.next() => match fragment {
                        Some(bytes) => {
                            let text = String::from_utf8_lossy(&bytes).replace('\r', "");
                            if !text.is_empty() {
                                sink.event(SessionEvent::Log(text));
                            }
                        }
                        None => {
                            sink.event(SessionEvent::Status(LinkStatus::Disconnected));
                            break;
                        }
                    }
                }
            }
            debug!("receive pump stopped");
        });
        *slot = Some(Pump { token, task });
    }

    /// Stop the pump and wait until it has fully released the feed.
    /// Returns whether it was running.
    pub async fn suspend_pump(&self) -> bool {
        let pump = self.pump.lock().expect("pump lock poisoned").take();
        match pump {
            Some(p) => {
                p.token.cancel();
                let _ = p.task.await;
                true
            }
            None => false,
        }
    }

    /// Restart the pump after a settle delay. Used when an exclusive
    /// exchange finishes; the delay gives the device time to flush any
    /// bytes belonging to the exchange.
    pub fn resume_pump_after(self: &Arc<Self>, settle: Duration) {
        let channel = Arc::clone(self);
        drop(tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            channel.start_pump();
        }));
    }

    /// Take exclusive ownership of the inbound feed. The pump must be
    /// suspended first, or this will wait for it.
    pub(crate) async fn acquire_feed(&self) -> OwnedMutexGuard<ByteFeed> {
        self.feed.clone().lock_owned().await
    }

    /// Release all resources. Failures are swallowed; after this the
    /// channel is unusable.
    pub async fn close(&self) {
        let _ = self.suspend_pump().await;
        self.backend.close().await;
        self.sink
            .event(SessionEvent::Status(LinkStatus::Disconnected));
    }
}
