//! General utility code
// (c) 2025 Ross Younger

pub(crate) mod path;
mod tracing;

pub use tracing::setup_tracing;
