//! Tunable configuration
// (c) 2025 Ross Younger
//!
//! Timeout and pacing constants observed in the field vary between boards
//! and firmware builds with no single right answer, so everything here is
//! a default that can be overridden, in ascending priority, by a TOML
//! config file, `REPLUP_*` environment variables, and command-line flags.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides (e.g. `REPLUP_BAUD=9600`)
const ENV_PREFIX: &str = "REPLUP_";

/// Config file looked for in the working directory when none is given
const DEFAULT_CONFIG_FILE: &str = "replup.toml";

/// All tunables in one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial baud rate
    pub baud: u32,
    /// Advertised-name prefix used to discover the BLE device
    pub name_prefix: String,
    /// How long to scan for a matching BLE device (ms)
    pub scan_timeout_ms: u64,

    /// Bytes per low-level serial write
    pub serial_chunk: usize,
    /// Delay between serial write slices (ms)
    pub serial_pace_ms: u64,
    /// Bytes per BLE write; must not exceed `ble_mtu`
    pub ble_chunk: usize,
    /// Delay between BLE write slices (ms)
    pub ble_pace_ms: u64,
    /// Usable payload per BLE write on this link
    pub ble_mtu: usize,

    /// Source bytes per upload write statement
    pub chunk_size: usize,
    /// Write statements combined into one execute call
    pub batch_size: usize,

    /// Deadline for one execute exchange (ms)
    pub exec_timeout_ms: u64,
    /// Deadline for the raw-mode banner after CTRL-A (ms)
    pub raw_entry_timeout_ms: u64,
    /// Deadline for a reset exchange; expiry is treated as success (ms)
    pub reset_timeout_ms: u64,
    /// Settle time between interrupt and raw entry (ms)
    pub interrupt_settle_ms: u64,
    /// Settle time before the receive pump restarts after an exclusive
    /// exchange (ms)
    pub resume_settle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud: 115_200,
            name_prefix: "MEBLOCK-".into(),
            scan_timeout_ms: 10_000,
            serial_chunk: 128,
            serial_pace_ms: 3,
            ble_chunk: 100,
            ble_pace_ms: 3,
            ble_mtu: 180,
            chunk_size: 512,
            batch_size: 1,
            exec_timeout_ms: 6_000,
            raw_entry_timeout_ms: 2_000,
            reset_timeout_ms: 1_500,
            interrupt_settle_ms: 30,
            resume_settle_ms: 150,
        }
    }
}

impl Config {
    /// Layer defaults ← config file ← environment.
    ///
    /// If `file` is None, `replup.toml` in the working directory is used
    /// when present.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let toml = match file {
            Some(f) => Toml::file_exact(f),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        config.validate()
    }

    /// Sanity-check the hard limits of each medium
    pub fn validate(self) -> anyhow::Result<Self> {
        anyhow::ensure!(self.baud > 0, "baud must be positive");
        anyhow::ensure!(
            self.serial_chunk > 0,
            "serial_chunk must be positive"
        );
        anyhow::ensure!(
            self.ble_chunk > 0 && self.ble_chunk <= self.ble_mtu,
            "ble_chunk must be within 1..={} (the link MTU)",
            self.ble_mtu
        );
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        Ok(self)
    }

    /// Deadline for one execute exchange
    #[must_use]
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    /// Deadline for a reset exchange
    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}
