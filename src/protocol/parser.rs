//! Byte-at-a-time parsers for device responses
// (c) 2025 Ross Younger

use super::{ACK_TOKEN, CTRL_EXECUTE, RAW_BANNER, RAW_PROMPT};

/// Which section of the execute response we are currently collecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Collecting stdout, up to the first terminator
    Stdout,
    /// Collecting stderr, up to the second terminator
    Stderr,
    /// Both sections seen; waiting for the ready prompt
    Prompt,
    /// Prompt seen; the device is ready for the next command
    Done,
}

/// Decoded result of one execute exchange
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Device stdout, carriage returns stripped
    pub stdout: String,
    /// Device stderr, carriage returns stripped
    pub stderr: String,
}

/// Incremental parser for the two-terminator execute response.
///
/// Feed it incoming fragments as they arrive; the reconstructed output is
/// identical no matter how the stream was fragmented. Bytes after the
/// ready prompt are ignored.
#[derive(Debug)]
pub struct ResponseParser {
    phase: Phase,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    /// New parser, positioned at the start of the stdout section
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Stdout,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Consume a fragment. Returns true once the ready prompt has been
    /// seen, i.e. the response is complete.
    pub fn feed(&mut self, fragment: &[u8]) -> bool {
        for &b in fragment {
            match self.phase {
                Phase::Stdout => {
                    if b == CTRL_EXECUTE {
                        self.phase = Phase::Stderr;
                    } else {
                        self.stdout.push(b);
                    }
                }
                Phase::Stderr => {
                    if b == CTRL_EXECUTE {
                        self.phase = Phase::Prompt;
                    } else {
                        self.stderr.push(b);
                    }
                }
                Phase::Prompt => {
                    if b == RAW_PROMPT {
                        self.phase = Phase::Done;
                        break;
                    }
                }
                Phase::Done => break,
            }
        }
        self.phase == Phase::Done
    }

    /// True once the ready prompt has been seen
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Decode the collected sections. Carriage returns are stripped, as
    /// the interpreter emits CRLF line endings.
    #[must_use]
    pub fn finish(self) -> ExecOutput {
        fn decode(raw: &[u8]) -> String {
            String::from_utf8_lossy(raw).replace('\r', "")
        }
        ExecOutput {
            stdout: decode(&self.stdout),
            stderr: decode(&self.stderr),
        }
    }
}

/// Strip the leading acknowledgment token, if present, from a stdout
/// section.
#[must_use]
pub fn strip_ack(stdout: &str) -> &str {
    stdout.strip_prefix(ACK_TOKEN).unwrap_or(stdout)
}

/// Watches the byte stream for evidence that the interpreter has entered
/// raw mode: the raw-mode banner, or a bare ready prompt at the end of
/// whatever text has arrived.
#[derive(Debug, Default)]
pub struct PromptWatcher {
    buf: String,
}

impl PromptWatcher {
    /// Fresh watcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a fragment; true once the device looks ready
    pub fn push(&mut self, fragment: &[u8]) -> bool {
        self.buf.push_str(&String::from_utf8_lossy(fragment));
        if self.buf.contains(RAW_BANNER) && self.buf.contains(char::from(RAW_PROMPT)) {
            return true;
        }
        self.buf.trim_end().ends_with(char::from(RAW_PROMPT))
    }

    /// How much unmatched text has accumulated. A device that talks a
    /// lot without ever showing the prompt is not speaking this
    /// protocol.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
