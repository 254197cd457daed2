//! Error taxonomy for the raw-REPL engine
// (c) 2025 Ross Younger

use thiserror::Error;

/// Failures at the transport layer (serial port or BLE link).
///
/// These are always fatal to the current session; the caller must
/// reconnect before further use.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The serial port could not be opened or driven
    #[error("serial: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// The BLE stack reported a failure
    #[error("bluetooth: {0}")]
    Ble(#[from] btleplug::Error),

    /// An underlying I/O operation failed
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// No Bluetooth adapter was available on this host
    #[error("no Bluetooth adapter found")]
    NoAdapter,

    /// Device discovery ran out of time without a match
    #[error("no device found matching \"{0}\"")]
    NoDevice(String),

    /// The device lacks the expected UART-bridge characteristic
    #[error("device does not expose characteristic {0}")]
    CharacteristicMissing(&'static str),

    /// The link closed underneath us (including remote-initiated disconnects)
    #[error("link closed unexpectedly")]
    Closed,

    /// The transport configuration violates a hard limit of the medium
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

/// Everything that can go wrong when driving the raw REPL.
///
/// Only [`Error::Remote`] leaves the session usable at the prompt; all
/// other variants require the caller to reconnect or explicitly exit raw
/// mode before further use.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure; fatal to the session
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No response within the exchange deadline
    #[error("timed out waiting for device response")]
    Timeout,

    /// Response bytes inconsistent with the control-byte framing.
    /// Implies the session state is desynchronized from the device.
    #[error("protocol desync: {0}")]
    Protocol(String),

    /// The device executed the code and reported a non-empty stderr.
    /// The message is the first line of that text. The session remains
    /// usable at the raw prompt.
    #[error("device reported: {0}")]
    Remote(String),

    /// The post-write parse check failed, indicating the transferred
    /// content is corrupt. Distinct from [`Error::Remote`] so callers can
    /// choose whether to continue with the remaining files.
    #[error("verification failed for {path}: {detail}")]
    Validation {
        /// Destination path of the corrupt file
        path: String,
        /// First line of the device's complaint
        detail: String,
    },

    /// The caller requested cancellation. The device is left in raw mode;
    /// exiting or resetting it is the caller's responsibility.
    #[error("upload aborted")]
    Aborted,
}

impl Error {
    /// True if the session can keep being used without reconnecting
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Remote(_) | Error::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability() {
        assert!(Error::Remote("x".into()).is_recoverable());
        assert!(Error::Validation {
            path: "/main.py".into(),
            detail: "SyntaxError".into()
        }
        .is_recoverable());
        assert!(!Error::Timeout.is_recoverable());
        assert!(!Error::Transport(TransportError::Closed).is_recoverable());
        assert!(!Error::Aborted.is_recoverable());
    }

    #[test]
    fn display_remote_is_short() {
        let e = Error::Remote("NameError: name 'foo' isn't defined".into());
        assert_eq!(
            e.to_string(),
            "device reported: NameError: name 'foo' isn't defined"
        );
    }
}
