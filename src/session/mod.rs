//! Raw-REPL session driver
// (c) 2025 Ross Younger
//!
//! [`ReplSession`] owns the protocol state machine over one
//! [`Channel`]. Multi-step sequences (entering raw mode plus one or more
//! executes) must not race the channel's passive receive pump, so they
//! run against a [`RawRepl`] guard obtained from
//! [`ReplSession::exclusive`]: taking the guard suspends the pump and
//! acquires the inbound feed; dropping it releases the feed and restarts
//! the pump after a settle delay.

pub(crate) mod python;
pub mod upload;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, TransportError};
use crate::events::{EventSink, SessionEvent};
use crate::protocol::parser::{strip_ack, PromptWatcher, ResponseParser};
use crate::protocol::{CTRL_ENTER_RAW, CTRL_EXECUTE, CTRL_EXIT_RAW, CTRL_INTERRUPT};
use crate::transport::{ByteFeed, Channel};

pub use crate::protocol::parser::ExecOutput;

/// If this much device output arrives after enter-raw without the
/// banner/prompt showing up, whatever is on the other end is not a raw
/// REPL.
const RAW_ENTRY_WINDOW: usize = 4_096;

/// Where the session currently believes the interpreter is
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    /// No usable transport
    Disconnected,
    /// Interactive prompt
    Normal,
    /// Interrupt sent, waiting for it to take effect
    Interrupting,
    /// Enter-raw sent, waiting for the banner
    EnteringRaw,
    /// At the raw-mode prompt, ready for a code buffer
    RawReady,
    /// Code submitted, response pending
    Executing,
    /// Exit-raw sent
    ExitingRaw,
}

/// Per-exchange controls
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    /// Deadline, measured from send time
    pub timeout: Duration,
    /// Treat deadline expiry (or a dropped link) as an empty success.
    /// Used for operations, like reset, that intentionally sever the
    /// connection.
    pub allow_timeout_as_success: bool,
}

impl ExecOptions {
    /// Normal exchange with the given deadline
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            allow_timeout_as_success: false,
        }
    }

    /// Exchange where no answer is the expected outcome
    #[must_use]
    pub fn tolerant(timeout: Duration) -> Self {
        Self {
            timeout,
            allow_timeout_as_success: true,
        }
    }
}

/// Delay/deadline knobs for the session state machine
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    /// Settle time between interrupt and raw entry
    pub interrupt_settle: Duration,
    /// Deadline for the raw-mode banner after enter-raw
    pub raw_entry_timeout: Duration,
    /// Settle time before the pump restarts after an exclusive exchange
    pub resume_settle: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionTimings {
    fn from(config: &Config) -> Self {
        Self {
            interrupt_settle: Duration::from_millis(config.interrupt_settle_ms),
            raw_entry_timeout: Duration::from_millis(config.raw_entry_timeout_ms),
            resume_settle: Duration::from_millis(config.resume_settle_ms),
        }
    }
}

/// Drives the raw-REPL control protocol on top of one channel.
///
/// Valid only while its channel is connected; any transport error resets
/// the state to [`SessionState::Disconnected`] and the session must be
/// discarded.
pub struct ReplSession {
    channel: Arc<Channel>,
    sink: Arc<dyn EventSink>,
    timings: SessionTimings,
    state: SessionState,
}

impl fmt::Debug for ReplSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplSession")
            .field("state", &self.state)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl ReplSession {
    /// New session over an open channel
    #[must_use]
    pub fn new(channel: Arc<Channel>, sink: Arc<dyn EventSink>, timings: SessionTimings) -> Self {
        Self {
            channel,
            sink,
            timings,
            state: SessionState::Normal,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Send an interrupt (abort whatever the device is running). Does
    /// not need the exclusive feed: the echo is ordinary pump traffic.
    pub async fn interrupt(&mut self) -> Result<(), Error> {
        self.state = SessionState::Interrupting;
        if let Err(e) = self.channel.send(&[CTRL_INTERRUPT]).await {
            self.state = SessionState::Disconnected;
            return Err(e.into());
        }
        self.state = SessionState::Normal;
        Ok(())
    }

    /// Suspend the pump and take exclusive ownership of the inbound
    /// feed. All request/response sequences run against the returned
    /// guard.
    pub async fn exclusive(&mut self) -> Result<RawRepl<'_>, Error> {
        if self.state == SessionState::Disconnected {
            return Err(TransportError::Closed.into());
        }
        let was_pumping = self.channel.suspend_pump().await;
        let feed = self.channel.acquire_feed().await;
        trace!("exclusive feed acquired (pump was running: {was_pumping})");
        Ok(RawRepl {
            session: self,
            feed,
            was_pumping,
        })
    }
}

/// Exclusive access to the session's request/response protocol.
///
/// Dropping the guard hands the feed back and, if the pump was running
/// before, restarts it after the settle delay. The session state is left
/// wherever the last operation put it; in particular, an aborted upload
/// legitimately leaves the device in raw mode.
pub struct RawRepl<'a> {
    session: &'a mut ReplSession,
    feed: OwnedMutexGuard<ByteFeed>,
    was_pumping: bool,
}

impl fmt::Debug for RawRepl<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRepl")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Drop for RawRepl<'_> {
    fn drop(&mut self) {
        if self.was_pumping && self.session.state != SessionState::Disconnected {
            self.session
                .channel
                .resume_pump_after(self.session.timings.resume_settle);
        }
    }
}

impl RawRepl<'_> {
    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state
    }

    fn set(&mut self, state: SessionState) {
        trace!("session state {} -> {state}", self.session.state);
        self.session.state = state;
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        match self.session.channel.send(bytes).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.set(SessionState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Put the interpreter into raw mode: interrupt, settle, enter-raw,
    /// then wait for the banner/prompt.
    ///
    /// No-op if the session already believes it is at the raw prompt,
    /// unless `force` is set; an upload forces re-entry to guarantee a
    /// clean state regardless of prior bookkeeping.
    pub async fn enter_raw(&mut self, force: bool) -> Result<(), Error> {
        if self.session.state == SessionState::RawReady && !force {
            return Ok(());
        }
        debug!("entering raw mode (force: {force})");
        self.set(SessionState::Interrupting);
        self.send(&[CTRL_INTERRUPT]).await?;
        tokio::time::sleep(self.session.timings.interrupt_settle).await;
        self.set(SessionState::EnteringRaw);
        self.send(&[CTRL_ENTER_RAW]).await?;

        let deadline = Instant::now() + self.session.timings.raw_entry_timeout;
        let mut watcher = PromptWatcher::new();
        loop {
            match self.feed.next_until(deadline).await {
                Ok(Some(fragment)) => {
                    if watcher.push(&fragment) {
                        break;
                    }
                    if watcher.buffered() > RAW_ENTRY_WINDOW {
                        return Err(Error::Protocol(
                            "device output shows no raw-mode prompt".into(),
                        ));
                    }
                }
                Ok(None) => {
                    self.set(SessionState::Disconnected);
                    return Err(TransportError::Closed.into());
                }
                Err(()) => return Err(Error::Timeout),
            }
        }
        self.set(SessionState::RawReady);
        Ok(())
    }

    /// Leave raw mode. Best-effort: never reports an error.
    pub async fn exit_raw(&mut self) {
        self.set(SessionState::ExitingRaw);
        match self.session.channel.send(&[CTRL_EXIT_RAW]).await {
            Ok(()) => self.set(SessionState::Normal),
            Err(_) => self.set(SessionState::Disconnected),
        }
    }

    /// Submit a code buffer for execution and parse the two-terminator
    /// response.
    ///
    /// On success the device's stdout (acknowledgment token stripped) is
    /// forwarded to the log sink and returned. A non-empty stderr is
    /// forwarded too, and becomes an [`Error::Remote`] carrying its first
    /// line; the session stays usable at the prompt.
    pub async fn execute(&mut self, code: &str, options: &ExecOptions) -> Result<ExecOutput, Error> {
        self.set(SessionState::Executing);
        let mut buffer = code.to_string();
        if !buffer.ends_with('\n') {
            buffer.push('\n');
        }
        self.send(buffer.as_bytes()).await?;
        self.send(&[CTRL_EXECUTE]).await?;

        let deadline = Instant::now() + options.timeout;
        let mut parser = ResponseParser::new();
        loop {
            match self.feed.next_until(deadline).await {
                Ok(Some(fragment)) => {
                    if parser.feed(&fragment) {
                        break;
                    }
                }
                Ok(None) => {
                    // End-of-stream mid-exchange. For a tolerated
                    // exchange (reset) this is the expected outcome.
                    self.set(SessionState::Disconnected);
                    if options.allow_timeout_as_success {
                        return Ok(ExecOutput::default());
                    }
                    return Err(TransportError::Closed.into());
                }
                Err(()) => {
                    if options.allow_timeout_as_success {
                        self.set(SessionState::RawReady);
                        return Ok(ExecOutput::default());
                    }
                    return Err(Error::Timeout);
                }
            }
        }

        let output = parser.finish();
        if !output.stderr.trim().is_empty() {
            self.session
                .sink
                .event(SessionEvent::Log(output.stderr.clone()));
            // The prompt was seen, so the device is back at raw-ready;
            // this error is recoverable.
            self.set(SessionState::RawReady);
            let first = output
                .stderr
                .trim()
                .lines()
                .next()
                .unwrap_or("remote error")
                .to_string();
            return Err(Error::Remote(first));
        }

        let stdout = strip_ack(&output.stdout).to_string();
        if !stdout.trim().is_empty() {
            self.session.sink.event(SessionEvent::Log(stdout.clone()));
        }
        self.set(SessionState::RawReady);
        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Shared wiring for session-level tests
    use std::sync::Arc;
    use std::time::Duration;

    use crate::events::EventSink;
    use crate::transport::mock::{FakeDevice, MockLink};
    use crate::transport::Channel;

    use super::{ReplSession, SessionTimings};

    /// Session over a mock link, with fast test timings
    pub(crate) fn session_with(
        device: FakeDevice,
        sink: Arc<dyn EventSink>,
    ) -> (ReplSession, Arc<MockLink>) {
        let (link, rx) = MockLink::with_device(device);
        let channel = Arc::new(Channel::from_parts(
            link.clone(),
            rx,
            4_096,
            Duration::ZERO,
            sink.clone(),
        ));
        let timings = SessionTimings {
            interrupt_settle: Duration::from_millis(1),
            raw_entry_timeout: Duration::from_millis(200),
            resume_settle: Duration::from_millis(1),
        };
        (ReplSession::new(channel, sink, timings), link)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::testkit::session_with;
    use super::*;
    use crate::events::{CollectingSink, NullSink};
    use crate::transport::mock::{ExecReply, FakeDevice};

    fn echo_device() -> FakeDevice {
        FakeDevice::new(Box::new(|code| {
            if code.trim() == "print(1+1)" {
                ExecReply {
                    stdout: "2\r\n".into(),
                    ..ExecReply::default()
                }
            } else if code.contains("raise") {
                ExecReply {
                    stderr: "Traceback (most recent call last):\r\nValueError: boom\r\n".into(),
                    ..ExecReply::default()
                }
            } else if code.contains("machine.reset()") {
                ExecReply {
                    hangup: true,
                    ..ExecReply::default()
                }
            } else {
                ExecReply::default()
            }
        }))
    }

    #[tokio::test]
    async fn execute_returns_stdout() {
        let sink = Arc::new(CollectingSink::default());
        let (mut session, _link) = session_with(echo_device(), sink.clone());
        let mut raw = session.exclusive().await.unwrap();
        raw.enter_raw(false).await.unwrap();
        let out = raw
            .execute("print(1+1)", &ExecOptions::with_timeout(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(out.stdout, "2\n");
        assert_eq!(out.stderr, "");
        assert_eq!(raw.state(), SessionState::RawReady);
        drop(raw);
        assert!(sink.logs().iter().any(|l| l.contains('2')));
    }

    #[tokio::test]
    async fn remote_error_is_first_stderr_line() {
        let (mut session, _link) = session_with(echo_device(), Arc::new(NullSink));
        let mut raw = session.exclusive().await.unwrap();
        raw.enter_raw(false).await.unwrap();
        let err = raw
            .execute("raise ValueError", &ExecOptions::with_timeout(Duration::from_secs(1)))
            .await
            .unwrap_err();
        match err {
            Error::Remote(msg) => assert_eq!(msg, "Traceback (most recent call last):"),
            other => panic!("unexpected error {other:?}"),
        }
        // Recoverable: the session is still at the raw prompt.
        assert_eq!(raw.state(), SessionState::RawReady);
    }

    #[tokio::test]
    async fn babbling_device_is_a_protocol_error() {
        let (mut session, _link) = session_with(FakeDevice::babbling(), Arc::new(NullSink));
        let mut raw = session.exclusive().await.unwrap();
        let err = raw.enter_raw(false).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let (mut session, _link) = session_with(FakeDevice::silent(), Arc::new(NullSink));
        let mut raw = session.exclusive().await.unwrap();
        let err = raw.enter_raw(false).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn tolerated_timeout_is_empty_success() {
        let (mut session, _link) = session_with(FakeDevice::silent(), Arc::new(NullSink));
        let mut raw = session.exclusive().await.unwrap();
        let out = raw
            .execute(
                "anything",
                &ExecOptions::tolerant(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        assert_eq!(out, ExecOutput::default());
    }

    #[tokio::test]
    async fn reset_hangup_tolerated() {
        let (mut session, _link) = session_with(echo_device(), Arc::new(NullSink));
        let mut raw = session.exclusive().await.unwrap();
        raw.enter_raw(true).await.unwrap();
        // The device drops the link instead of answering; with the
        // tolerant flag that is still a success.
        let out = raw
            .execute(
                python::RESET,
                &ExecOptions::tolerant(Duration::from_millis(200)),
            )
            .await
            .unwrap();
        assert_eq!(out, ExecOutput::default());
        assert_eq!(raw.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn enter_raw_is_idempotent_unless_forced() {
        let (mut session, link) = session_with(echo_device(), Arc::new(NullSink));
        let mut raw = session.exclusive().await.unwrap();
        raw.enter_raw(false).await.unwrap();
        let written = link.written().len();
        raw.enter_raw(false).await.unwrap(); // no-op
        assert_eq!(link.written().len(), written);
        raw.enter_raw(true).await.unwrap(); // forced: goes to the wire
        assert!(link.written().len() > written);
    }

    #[tokio::test]
    async fn exit_raw_is_best_effort() {
        let (mut session, link) = session_with(echo_device(), Arc::new(NullSink));
        let mut raw = session.exclusive().await.unwrap();
        raw.enter_raw(false).await.unwrap();
        raw.exit_raw().await;
        assert_eq!(raw.state(), SessionState::Normal);
        assert_eq!(link.written().last(), Some(&CTRL_EXIT_RAW));
    }
}
