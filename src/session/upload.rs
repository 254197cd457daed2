//! Chunked file upload over the raw REPL
// (c) 2025 Ross Younger
//!
//! Files go to the device as a sequence of executable write statements:
//! each chunk of source bytes is base64-encoded and wrapped in a call to
//! the byte-append helper defined once at the start of the upload. A file
//! of length N with chunk size C produces exactly `ceil(N / C)`
//! statements: every one before the last carries exactly C bytes, the
//! last carries the remainder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use human_repr::HumanCount as _;
use tracing::debug;

use super::python::{self, WriteMode};
use super::{ExecOptions, RawRepl, ReplSession};
use crate::config::Config;
use crate::error::Error;
use crate::events::{EventSink, SessionEvent};
use crate::util::path;

/// How destination paths are derived from source paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FolderLayout {
    /// Keep each file's relative directory structure
    #[default]
    Preserve,
    /// Drop directories; every file lands in the destination root
    Flatten,
}

/// Everything the uploader can be told, in one record
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Source bytes per write statement
    pub chunk_size: usize,
    /// Write statements combined into one execute call. Amortizes
    /// per-exchange overhead against the device's code-buffer limits.
    pub batch_size: usize,
    /// Destination path derivation
    pub layout: FolderLayout,
    /// Destination root prefix; empty or `/` means the filesystem root
    pub base_path: String,
    /// Hard-reset the device after the upload
    pub auto_reset: bool,
    /// Issue a filesystem sync before finishing
    pub sync_after_write: bool,
    /// Read back and parse-check each `.py` file after its last chunk
    pub verify_after_write: bool,
    /// Deadline per execute exchange
    pub exec_timeout: Duration,
    /// Deadline for the reset exchange (expiry is success)
    pub reset_timeout: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl UploadOptions {
    /// Take the tunable defaults from a [`Config`]
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            batch_size: config.batch_size,
            layout: FolderLayout::default(),
            base_path: "/".into(),
            auto_reset: false,
            sync_after_write: true,
            verify_after_write: true,
            exec_timeout: config.exec_timeout(),
            reset_timeout: config.reset_timeout(),
        }
    }
}

/// One file to push
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Source-relative path; decides the destination (see
    /// [`FolderLayout`])
    pub path: String,
    /// Raw content
    pub contents: Vec<u8>,
}

/// Progress snapshot, published after every chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadProgress {
    /// Sum of all files' sizes
    pub total_bytes: u64,
    /// Cumulative bytes written across all files
    pub written_bytes: u64,
    /// Number of files in this upload
    pub file_count: usize,
    /// Index of the file currently being written
    pub file_index: usize,
    /// Size of the current file
    pub file_total: u64,
    /// Bytes of the current file written so far
    pub file_written: u64,
}

/// What a completed upload did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Files written
    pub files: usize,
    /// Payload bytes written
    pub bytes: u64,
}

/// Cooperative cancellation flag, polled between chunks.
///
/// An in-flight chunk's write statement always completes before the
/// abort takes effect.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// Request cancellation of the upload in progress
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Is cancellation requested?
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Forget a previous request
    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Splits files into write statements and executes them via a session.
///
/// One instance per upload call; progress is published through the sink.
pub struct ChunkedUploader {
    options: UploadOptions,
    abort: AbortFlag,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ChunkedUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedUploader")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ChunkedUploader {
    /// New uploader. The abort flag is shared with whoever may want to
    /// cancel; it is not cleared here, so a pre-set flag aborts before
    /// the first chunk.
    #[must_use]
    pub fn new(options: UploadOptions, abort: AbortFlag, sink: Arc<dyn EventSink>) -> Self {
        Self {
            options,
            abort,
            sink,
        }
    }

    fn check_abort(&self) -> Result<(), Error> {
        if self.abort.is_set() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    /// Push `files` to the device, in input order.
    ///
    /// On [`Error::Aborted`] the device is left in raw mode; exiting or
    /// resetting it is the caller's responsibility.
    pub async fn upload(
        &self,
        session: &mut ReplSession,
        files: &[SourceFile],
    ) -> Result<UploadOutcome, Error> {
        let chunk_size = self.options.chunk_size.max(1);
        let exec = ExecOptions::with_timeout(self.options.exec_timeout);
        let total: u64 = files.iter().map(|f| f.contents.len() as u64).sum();
        self.sink.event(SessionEvent::Log(format!(
            "--- FLASH START ({} files, {}) ---",
            files.len(),
            total.human_count_bytes()
        )));

        let needs_dirs =
            self.options.layout == FolderLayout::Preserve || !is_root(&self.options.base_path);

        let mut raw = session.exclusive().await?;
        raw.enter_raw(true).await?;
        raw.execute(&python::helper_preamble(needs_dirs), &exec)
            .await?;

        let mut progress = UploadProgress {
            total_bytes: total,
            file_count: files.len(),
            ..UploadProgress::default()
        };

        for (index, file) in files.iter().enumerate() {
            self.check_abort()?;
            let dest = path::derive_destination(&file.path, self.options.layout, &self.options.base_path);
            progress.file_index = index;
            progress.file_total = file.contents.len() as u64;
            progress.file_written = 0;
            debug!("file {}/{}: {} -> {dest}", index + 1, files.len(), file.path);
            self.sink.event(SessionEvent::Log(format!(
                "[FILE {}/{}] {} -> {dest}",
                index + 1,
                files.len(),
                file.path
            )));

            if needs_dirs {
                if let Some(dir) = path::device_dir(&dest) {
                    raw.execute(&python::mkdir_stmt(&dir), &exec).await?;
                }
            }

            let mut batch: Vec<String> = Vec::new();
            let mut batch_sizes: Vec<u64> = Vec::new();
            for (chunk_index, chunk) in file.contents.chunks(chunk_size).enumerate() {
                self.check_abort()?;
                let mode = if chunk_index == 0 {
                    WriteMode::Create
                } else {
                    WriteMode::Append
                };
                batch.push(python::write_stmt(&dest, &BASE64_STANDARD.encode(chunk), mode));
                batch_sizes.push(chunk.len() as u64);
                if batch.len() >= self.options.batch_size.max(1) {
                    self.flush(&mut raw, &exec, &mut batch, &mut batch_sizes, &mut progress)
                        .await?;
                }
            }
            self.flush(&mut raw, &exec, &mut batch, &mut batch_sizes, &mut progress)
                .await?;

            if self.options.verify_after_write && dest.ends_with(".py") {
                match raw.execute(&python::check_stmt(&dest), &exec).await {
                    Ok(_) => (),
                    Err(Error::Remote(detail)) => {
                        return Err(Error::Validation { path: dest, detail });
                    }
                    Err(e) => return Err(e),
                }
            }
            self.sink
                .event(SessionEvent::Log(format!("[OK] {dest}")));
        }

        if self.options.sync_after_write {
            raw.execute(&python::sync_and_sentinel(), &exec).await?;
        }

        if self.options.auto_reset {
            debug!("auto reset");
            let _ = raw
                .execute(python::RESET, &ExecOptions::tolerant(self.options.reset_timeout))
                .await?;
        } else {
            raw.exit_raw().await;
        }

        Ok(UploadOutcome {
            files: files.len(),
            bytes: total,
        })
    }

    /// Execute the pending batch as one exchange, then account for its
    /// chunks.
    async fn flush(
        &self,
        raw: &mut RawRepl<'_>,
        exec: &ExecOptions,
        batch: &mut Vec<String>,
        batch_sizes: &mut Vec<u64>,
        progress: &mut UploadProgress,
    ) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let buffer = batch.join("\n");
        batch.clear();
        raw.execute(&buffer, exec).await?;
        for size in batch_sizes.drain(..) {
            progress.written_bytes += size;
            progress.file_written += size;
            self.sink.event(SessionEvent::Progress(progress.clone()));
        }
        Ok(())
    }
}

fn is_root(base: &str) -> bool {
    let base = base.trim();
    base.is_empty() || base == "/"
}
