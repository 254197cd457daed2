// (c) 2025 Ross Younger

//! `replup` pushes MicroPython source files and commands into a
//! microcontroller over its raw REPL, via a serial port or a BLE UART
//! bridge (Nordic UART Service).
//!
//! ## Overview
//!
//! - 🔌 One [transport] facade over two very different links: serial
//!   (larger-buffer writes) and BLE (small-MTU writes with pacing).
//! - 🧵 A [session] driver for the raw-REPL control protocol: enter/exit
//!   raw mode, execute a code buffer, demultiplex the device's
//!   stdout/stderr/prompt response ([protocol]).
//! - 📦 A chunked uploader ([`session::upload`]) that turns files into
//!   base64-wrapped write statements with batching, idempotent directory
//!   creation, progress tracking, post-write verification and abort
//!   handling.
//! - 🎛️ A thin [client] coordinator tying it together behind one
//!   observer interface ([events]), plus a thin CLI built on it.
//!
//! The protocol is hand-framed (no length prefixes, only control bytes
//! and text sentinels), so all writes are serialized through one FIFO
//! queue and the inbound byte feed has exactly one consumer at a time.
//! See [protocol] for the wire details.
//!
//! ## What replup is not
//!
//! * A firmware flasher (no ROM bootloader support; this writes to the
//!   MicroPython filesystem).
//! * A client for the line-based `PUT`/`DATA`/`DONE` upload protocol
//!   found in some custom firmware builds; that is a different profile.

pub(crate) mod cli;
pub use cli::cli;

pub mod client;
pub mod config;
mod error;
pub use error::{Error, TransportError};
pub mod events;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod util;
