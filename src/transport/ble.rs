//! BLE UART-bridge backend (Nordic UART Service)
// (c) 2025 Ross Younger

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::LinkBackend;
use crate::error::TransportError;
use crate::protocol::nus;

const FEED_DEPTH: usize = 64;
/// Poll interval while waiting for a matching advertisement
const SCAN_POLL: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub(crate) struct BleLink {
    peripheral: Peripheral,
    write_char: Characteristic,
    write_type: WriteType,
    notify_task: tokio::task::JoinHandle<()>,
    device_name: String,
}

/// Scan for a device whose advertised name starts with `name_prefix`,
/// connect, resolve the UART-bridge characteristics, subscribe to
/// notifications, and start forwarding them into the returned feed.
pub(crate) async fn open(
    name_prefix: &str,
    scan_timeout: Duration,
) -> Result<(Arc<dyn LinkBackend>, mpsc::Receiver<Bytes>), TransportError> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(TransportError::NoAdapter)?;

    let (peripheral, device_name) = discover(&adapter, name_prefix, scan_timeout).await?;
    debug!("connecting to {device_name}");
    peripheral.connect().await?;
    peripheral.discover_services().await?;

    let chars = peripheral.characteristics();
    let write_char = chars
        .iter()
        .find(|c| c.uuid == nus::WRITE)
        .cloned()
        .ok_or(TransportError::CharacteristicMissing("UART write"))?;
    let notify_char = chars
        .iter()
        .find(|c| c.uuid == nus::NOTIFY)
        .cloned()
        .ok_or(TransportError::CharacteristicMissing("UART notify"))?;
    // Prefer unacknowledged writes when the device supports them; the
    // pacing delay is the flow control on this path.
    let write_type = if write_char
        .properties
        .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
    {
        WriteType::WithoutResponse
    } else {
        WriteType::WithResponse
    };

    peripheral.subscribe(&notify_char).await?;
    let (tx, rx) = mpsc::channel(FEED_DEPTH);
    let notify_task = tokio::spawn(notify_loop(peripheral.clone(), tx));

    let link = Arc::new(BleLink {
        peripheral,
        write_char,
        write_type,
        notify_task,
        device_name,
    });
    Ok((link, rx))
}

/// Poll the adapter's sightings until something matches or time runs out
async fn discover(
    adapter: &Adapter,
    name_prefix: &str,
    scan_timeout: Duration,
) -> Result<(Peripheral, String), TransportError> {
    debug!("scanning for devices matching \"{name_prefix}\"");
    adapter.start_scan(ScanFilter::default()).await?;
    let deadline = tokio::time::Instant::now() + scan_timeout;
    let found = 'scan: loop {
        for peripheral in adapter.peripherals().await? {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let Some(name) = props.local_name else {
                continue;
            };
            if name.starts_with(name_prefix) {
                break 'scan Some((peripheral, name));
            }
        }
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(SCAN_POLL).await;
    };
    let _ = adapter.stop_scan().await;
    found.ok_or_else(|| TransportError::NoDevice(name_prefix.to_string()))
}

/// Forwards notify-characteristic values into the feed until the stream
/// ends (which is how a remote-initiated disconnect surfaces).
async fn notify_loop(peripheral: Peripheral, tx: mpsc::Sender<Bytes>) {
    let mut notifications = match peripheral.notifications().await {
        Ok(n) => n,
        Err(e) => {
            warn!("could not take notification stream: {e}");
            return;
        }
    };
    while let Some(notification) = notifications.next().await {
        if notification.uuid != nus::NOTIFY {
            continue;
        }
        trace!("notify {} bytes", notification.value.len());
        if tx.send(Bytes::from(notification.value)).await.is_err() {
            break; // consumer gone
        }
    }
}

#[async_trait]
impl LinkBackend for BleLink {
    async fn write_piece(&self, piece: &[u8]) -> Result<(), TransportError> {
        self.peripheral
            .write(&self.write_char, piece, self.write_type)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.notify_task.abort();
        let _ = self.peripheral.disconnect().await;
    }

    fn peer(&self) -> String {
        self.device_name.clone()
    }
}
