//! Observer interface decoupling protocol logic from presentation
// (c) 2025 Ross Younger

use crate::session::upload::UploadProgress;

/// Connection status of the underlying link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// The link is up. `peer` names the port or the advertised device.
    Connected {
        /// Port path or BLE device name
        peer: String,
    },
    /// The link is down (locally closed or remote-initiated)
    Disconnected,
}

/// Everything the engine reports to its owner.
///
/// Protocol components never render anything themselves; they publish
/// these and the embedding application decides what to do with them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Device output or engine log text, suitable for a console
    Log(String),
    /// The link came up or went down
    Status(LinkStatus),
    /// Upload progress snapshot, emitted after every chunk
    Progress(UploadProgress),
}

/// The single observer seam. One per coordinator.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Implementations must not block.
    fn event(&self, event: SessionEvent);
}

/// Routes events through `tracing`, which is what the CLI wants
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Log(text) => {
                let trimmed = text.trim_end();
                if !trimmed.is_empty() {
                    tracing::info!(target: "device", "{trimmed}");
                }
            }
            SessionEvent::Status(LinkStatus::Connected { peer }) => {
                tracing::info!("connected to {peer}");
            }
            SessionEvent::Status(LinkStatus::Disconnected) => {
                tracing::info!("disconnected");
            }
            SessionEvent::Progress(p) => {
                tracing::debug!(
                    "progress: {}/{} bytes (file {}/{})",
                    p.written_bytes,
                    p.total_bytes,
                    p.file_index + 1,
                    p.file_count
                );
            }
        }
    }
}

/// Discards everything. Useful for embedding and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn event(&self, _event: SessionEvent) {}
}

/// Records everything, for assertions
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct CollectingSink {
    events: std::sync::Mutex<Vec<SessionEvent>>,
}

#[cfg(test)]
impl CollectingSink {
    pub(crate) fn logs(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Log(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn progress(&self) -> Vec<UploadProgress> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Progress(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl EventSink for CollectingSink {
    fn event(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}
