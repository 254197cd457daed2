//! Raw-REPL wire protocol definitions
// (c) 2025 Ross Younger
//!
//! The protocol is hand-framed: there are no length prefixes. Framing
//! relies entirely on single control bytes and text sentinels, so delivery
//! must be byte-order-preserving (see [`crate::transport`], which
//! serializes all writes through one FIFO queue).
//!
//! ## Driving the interpreter
//!
//! * Host ➡️ Device: [`CTRL_INTERRUPT`]: abort any running program.
//! * Host ➡️ Device: [`CTRL_ENTER_RAW`]: switch to raw mode. The device
//!   answers with a banner ending in the [`RAW_PROMPT`] byte.
//! * Host ➡️ Device: code buffer, then [`CTRL_EXECUTE`].
//! * Device ➡️ Host: optional `OK` acknowledgment, stdout text,
//!   [`CTRL_EXECUTE`] (as a section terminator), stderr text,
//!   [`CTRL_EXECUTE`] again, then [`RAW_PROMPT`] when ready for the next
//!   command. [`parser::ResponseParser`] demultiplexes this stream.
//! * Host ➡️ Device: [`CTRL_EXIT_RAW`]: back to the interactive prompt.
//!
//! ## Transports
//!
//! The same byte protocol runs over a serial port (115200-8-N-1 by
//! default) or a BLE UART bridge exposing the Nordic UART Service
//! ([`nus`]): one write characteristic (host→device) and one notify
//! characteristic (device→host).

pub mod parser;

/// Enter raw execution mode (CTRL-A)
pub const CTRL_ENTER_RAW: u8 = 0x01;

/// Exit raw mode, return to the interactive prompt (CTRL-B)
pub const CTRL_EXIT_RAW: u8 = 0x02;

/// Interrupt running code / cancel a pending raw entry (CTRL-C)
pub const CTRL_INTERRUPT: u8 = 0x03;

/// In raw mode: execute the buffered code (CTRL-D).
/// In the response stream: section terminator (stdout→stderr, then
/// stderr→prompt-wait).
pub const CTRL_EXECUTE: u8 = 0x04;

/// Raw-mode ready prompt, observed after the second terminator
pub const RAW_PROMPT: u8 = b'>';

/// Banner the interpreter prints when raw mode is entered
pub const RAW_BANNER: &str = "raw REPL; CTRL-B to exit";

/// Acknowledgment token the device prefixes to the stdout section
pub const ACK_TOKEN: &str = "OK";

/// Sentinel line printed by device-side code after a completed upload.
/// Not parsed by the protocol engine; surfaced to log observers only.
pub const DONE_SENTINEL: &str = "[FLASH_DONE]";

/// Nordic UART Service identifiers for the BLE UART bridge
pub mod nus {
    use uuid::{uuid, Uuid};

    /// The UART-bridge GATT service
    pub const SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");
    /// Write characteristic (host ➡️ device)
    pub const WRITE: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");
    /// Notify characteristic (device ➡️ host)
    pub const NOTIFY: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");
}
