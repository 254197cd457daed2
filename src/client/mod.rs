//! Top-level session lifecycle
// (c) 2025 Ross Younger

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::error::{Error, TransportError};
use crate::events::EventSink;
use crate::session::upload::{
    AbortFlag, ChunkedUploader, SourceFile, UploadOptions, UploadOutcome,
};
use crate::session::{python, ExecOptions, ExecOutput, ReplSession, SessionTimings};
use crate::transport::{Channel, TransportConfig};

/// Owns one transport channel and one REPL session, and sequences the
/// operations an application needs: connect, run code, upload files,
/// stop, reset, abort. All log text, status changes and progress flow
/// through the single observer given at construction; protocol
/// components never know about presentation.
pub struct Coordinator {
    config: Config,
    sink: Arc<dyn EventSink>,
    channel: Option<Arc<Channel>>,
    session: Option<ReplSession>,
    abort: AbortFlag,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("connected", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// New coordinator; does not connect yet
    #[must_use]
    pub fn new(config: Config, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            channel: None,
            session: None,
            abort: AbortFlag::default(),
        }
    }

    /// Open the link and start the passive receive pump.
    ///
    /// Any previous connection is discarded first: session state is not
    /// resumable across a disconnect.
    pub async fn connect(&mut self, transport: &TransportConfig) -> Result<(), Error> {
        self.close().await;
        let channel = Channel::open(transport, self.sink.clone()).await?;
        channel.start_pump();
        self.attach(channel);
        Ok(())
    }

    /// Adopt an already-open channel (connect() ends here too)
    pub(crate) fn attach(&mut self, channel: Arc<Channel>) {
        self.session = Some(ReplSession::new(
            channel.clone(),
            self.sink.clone(),
            SessionTimings::from(&self.config),
        ));
        self.channel = Some(channel);
    }

    /// Is there a live link?
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    fn session_mut(&mut self) -> Result<&mut ReplSession, Error> {
        self.session
            .as_mut()
            .ok_or_else(|| TransportError::Closed.into())
    }

    /// Run a code buffer on the device and return its output.
    /// Enters raw mode, executes, and drops back to the interactive
    /// prompt regardless of the outcome.
    pub async fn run_code(&mut self, code: &str) -> Result<ExecOutput, Error> {
        let options = ExecOptions::with_timeout(self.config.exec_timeout());
        let session = self.session_mut()?;
        let mut raw = session.exclusive().await?;
        raw.enter_raw(false).await?;
        let result = raw.execute(code, &options).await;
        raw.exit_raw().await;
        result
    }

    /// Upload a file set. Clears any stale abort request first; use
    /// [`Coordinator::abort_upload`] from another task to cancel.
    pub async fn upload_files(
        &mut self,
        files: &[SourceFile],
        options: UploadOptions,
    ) -> Result<UploadOutcome, Error> {
        self.abort.clear();
        let uploader = ChunkedUploader::new(options, self.abort.clone(), self.sink.clone());
        let session = self.session_mut()?;
        uploader.upload(session, files).await
    }

    /// Interrupt whatever the device is running (no mode change)
    pub async fn stop(&mut self) -> Result<(), Error> {
        self.session_mut()?.interrupt().await
    }

    /// Hard-reset the device. The connection legitimately drops, so the
    /// exchange runs with timeout-as-success.
    pub async fn reset(&mut self) -> Result<(), Error> {
        let options = ExecOptions::tolerant(self.config.reset_timeout());
        let session = self.session_mut()?;
        let mut raw = session.exclusive().await?;
        raw.enter_raw(true).await?;
        debug!("resetting device");
        let _ = raw.execute(python::RESET, &options).await?;
        Ok(())
    }

    /// Request cancellation of the upload in progress. Takes effect at
    /// the next chunk boundary; the device is left in raw mode.
    pub fn abort_upload(&self) {
        self.abort.trigger();
    }

    /// A handle that cancels uploads, for wiring to a signal handler
    #[must_use]
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Tear the connection down. Best-effort, idempotent.
    pub async fn close(&mut self) {
        self.session = None;
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::events::NullSink;
    use crate::protocol::{CTRL_EXIT_RAW, CTRL_INTERRUPT};
    use crate::transport::mock::{ExecReply, FakeDevice, MockLink};

    fn coordinator_with(device: FakeDevice) -> (Coordinator, Arc<MockLink>) {
        let sink: Arc<dyn EventSink> = Arc::new(NullSink);
        let (link, rx) = MockLink::with_device(device);
        let channel = Arc::new(Channel::from_parts(
            link.clone(),
            rx,
            4_096,
            Duration::ZERO,
            sink.clone(),
        ));
        let config = Config {
            interrupt_settle_ms: 1,
            resume_settle_ms: 1,
            ..Config::default()
        };
        let mut coordinator = Coordinator::new(config, sink);
        coordinator.attach(channel);
        (coordinator, link)
    }

    fn print_device() -> FakeDevice {
        FakeDevice::new(Box::new(|code| {
            if code.contains("machine.reset()") {
                ExecReply {
                    hangup: true,
                    ..ExecReply::default()
                }
            } else if code.trim() == "print(1+1)" {
                ExecReply {
                    stdout: "2\r\n".into(),
                    ..ExecReply::default()
                }
            } else {
                ExecReply::default()
            }
        }))
    }

    #[tokio::test]
    async fn run_code_round_trip() {
        let (mut coordinator, link) = coordinator_with(print_device());
        let out = coordinator.run_code("print(1+1)").await.unwrap();
        assert_eq!(out.stdout, "2\n");
        // run_code always drops back to the interactive prompt
        assert_eq!(link.written().last(), Some(&CTRL_EXIT_RAW));
    }

    #[tokio::test]
    async fn stop_sends_interrupt_only() {
        let (mut coordinator, link) = coordinator_with(print_device());
        coordinator.stop().await.unwrap();
        assert_eq!(link.written(), vec![CTRL_INTERRUPT]);
    }

    #[tokio::test]
    async fn reset_tolerates_the_dropped_link() {
        let (mut coordinator, _link) = coordinator_with(print_device());
        coordinator.reset().await.unwrap();
    }

    #[tokio::test]
    async fn operations_require_a_connection() {
        let config = Config::default();
        let mut coordinator = Coordinator::new(config, Arc::new(NullSink));
        assert!(!coordinator.is_connected());
        let err = coordinator.run_code("print(1)").await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Closed)));
    }
}
