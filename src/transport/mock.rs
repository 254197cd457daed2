//! In-memory transport plumbing for tests
// (c) 2025 Ross Younger
//!
//! [`MockLink`] records every low-level write and hands the bytes to a
//! [`FakeDevice`], a small emulation of the interpreter's raw-REPL side:
//! it honours the control bytes, buffers code, and answers an execute
//! with `OK` + stdout + terminator + stderr + terminator + prompt. What
//! "executing" means is a pluggable closure; [`FakeFs`] implements the
//! uploader's helper statements against an in-memory filesystem.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bytes::Bytes;
use tokio::sync::mpsc;

use super::LinkBackend;
use crate::error::TransportError;
use crate::protocol::{CTRL_ENTER_RAW, CTRL_EXECUTE, CTRL_EXIT_RAW, CTRL_INTERRUPT, RAW_PROMPT};

/// What one emulated execute produced
#[derive(Debug, Default)]
pub(crate) struct ExecReply {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    /// Drop the link instead of answering (a device reset does this)
    pub(crate) hangup: bool,
}

type ExecFn = Box<dyn FnMut(&str) -> ExecReply + Send>;

/// Emulates the device side of the raw-REPL control protocol
pub(crate) struct FakeDevice {
    raw_mode: bool,
    buffer: Vec<u8>,
    muted: bool,
    banner: Vec<u8>,
    exec: ExecFn,
}

impl FakeDevice {
    /// Device whose execute behaviour is `exec`
    pub(crate) fn new(exec: ExecFn) -> Self {
        Self {
            raw_mode: false,
            buffer: Vec::new(),
            muted: false,
            banner: b"\r\nraw REPL; CTRL-B to exit\r\n>".to_vec(),
            exec,
        }
    }

    /// Device that accepts everything and never replies (for timeout
    /// paths)
    pub(crate) fn silent() -> Self {
        let mut d = Self::new(Box::new(|_| ExecReply::default()));
        d.muted = true;
        d
    }

    /// Device that answers raw entry with endless chatter and never a
    /// prompt (for desync paths)
    pub(crate) fn babbling() -> Self {
        let mut d = Self::new(Box::new(|_| ExecReply::default()));
        d.banner = vec![b'x'; 8_192];
        d
    }

    /// Consume host bytes; returns (reply bytes, hangup)
    fn accept(&mut self, piece: &[u8]) -> (Vec<u8>, bool) {
        let mut reply = Vec::new();
        for &b in piece {
            match b {
                CTRL_INTERRUPT => self.buffer.clear(),
                CTRL_ENTER_RAW => {
                    self.raw_mode = true;
                    self.buffer.clear();
                    if !self.muted {
                        reply.extend_from_slice(&self.banner);
                    }
                }
                CTRL_EXIT_RAW => {
                    self.raw_mode = false;
                    if !self.muted {
                        reply.extend_from_slice(b"\r\nMicroPython v1.22.0\r\n>>> ");
                    }
                }
                CTRL_EXECUTE if self.raw_mode => {
                    let code = String::from_utf8_lossy(&std::mem::take(&mut self.buffer))
                        .into_owned();
                    let result = (self.exec)(&code);
                    if result.hangup {
                        return (reply, true);
                    }
                    if !self.muted {
                        reply.extend_from_slice(b"OK");
                        reply.extend_from_slice(result.stdout.as_bytes());
                        reply.push(CTRL_EXECUTE);
                        reply.extend_from_slice(result.stderr.as_bytes());
                        reply.push(CTRL_EXECUTE);
                        reply.push(RAW_PROMPT);
                    }
                }
                _ => self.buffer.push(b),
            }
        }
        (reply, false)
    }
}

/// Test backend: records writes, replies via the fake device
pub(crate) struct MockLink {
    pieces: StdMutex<Vec<Vec<u8>>>,
    device: StdMutex<FakeDevice>,
    tx: StdMutex<Option<mpsc::Sender<Bytes>>>,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink").finish_non_exhaustive()
    }
}

impl MockLink {
    pub(crate) fn with_device(device: FakeDevice) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(256);
        let link = Arc::new(Self {
            pieces: StdMutex::new(Vec::new()),
            device: StdMutex::new(device),
            tx: StdMutex::new(Some(tx)),
        });
        (link, rx)
    }

    /// A link to a device that never says anything
    pub(crate) fn muted() -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        Self::with_device(FakeDevice::silent())
    }

    /// Every low-level write, in order
    pub(crate) fn pieces(&self) -> Vec<Vec<u8>> {
        self.pieces.lock().unwrap().clone()
    }

    /// The outgoing byte stream, reassembled
    pub(crate) fn written(&self) -> Vec<u8> {
        self.pieces.lock().unwrap().concat()
    }
}

#[async_trait]
impl LinkBackend for MockLink {
    async fn write_piece(&self, piece: &[u8]) -> Result<(), TransportError> {
        self.pieces.lock().unwrap().push(piece.to_vec());
        let (reply, hangup) = self.device.lock().unwrap().accept(piece);
        let tx = self.tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            if !reply.is_empty() {
                let _ = tx.send(Bytes::from(reply)).await;
            }
        }
        if hangup {
            // Severs the feed: the consumer sees end-of-stream.
            *self.tx.lock().unwrap() = None;
        }
        Ok(())
    }

    async fn close(&self) {
        *self.tx.lock().unwrap() = None;
    }

    fn peer(&self) -> String {
        "mock".into()
    }
}

/// One observed `__fw` write statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WriteRecord {
    pub(crate) path: String,
    pub(crate) len: usize,
    pub(crate) mode: String,
}

/// In-memory filesystem implementing the uploader's device-side helpers
#[derive(Debug, Default)]
pub(crate) struct FakeFs {
    pub(crate) files: HashMap<String, Vec<u8>>,
    pub(crate) mkdirs: Vec<String>,
    /// Every write statement, in arrival order
    pub(crate) writes: Vec<WriteRecord>,
    /// Number of write statements in each execute call that carried any
    pub(crate) write_batches: Vec<usize>,
    /// Destinations whose post-write check should fail
    pub(crate) fail_check: HashSet<String>,
}

impl FakeFs {
    /// Wrap shared state into an exec closure for [`FakeDevice`]
    pub(crate) fn handler(fs: &Arc<StdMutex<FakeFs>>) -> ExecFn {
        let fs = Arc::clone(fs);
        Box::new(move |code| fs.lock().unwrap().exec(code))
    }

    fn exec(&mut self, code: &str) -> ExecReply {
        let mut reply = ExecReply::default();
        let mut writes_this_call = 0;
        for line in code.lines() {
            let line = line.trim();
            if let Some(args) = call_args(line, "__fw") {
                let [path, b64, mode] = &args[..] else {
                    reply.stderr = "TypeError: __fw takes 3 arguments\n".to_string();
                    return reply;
                };
                let data = BASE64_STANDARD.decode(b64).expect("payload was not base64");
                self.writes.push(WriteRecord {
                    path: path.clone(),
                    len: data.len(),
                    mode: mode.clone(),
                });
                writes_this_call += 1;
                match mode.as_str() {
                    "wb" => {
                        let _ = self.files.insert(path.clone(), data);
                    }
                    "ab" => self.files.entry(path.clone()).or_default().extend(data),
                    other => {
                        reply.stderr = format!("OSError: bad mode {other}\n");
                        return reply;
                    }
                }
            } else if let Some(args) = call_args(line, "__mkdir_p") {
                self.mkdirs.push(args[0].clone());
            } else if let Some(args) = call_args(line, "__check") {
                if self.fail_check.contains(&args[0]) {
                    reply.stderr = format!(
                        "Traceback (most recent call last):\nSyntaxError: invalid syntax in {}\n",
                        args[0]
                    );
                    return reply;
                }
            } else if line.contains("machine.reset()") {
                reply.hangup = true;
                return reply;
            } else if line == "print('[FLASH_DONE]')" {
                reply.stdout.push_str("[FLASH_DONE]\n");
            }
            // imports, helper definitions and the sync guard are silent
        }
        if writes_this_call > 0 {
            self.write_batches.push(writes_this_call);
        }
        reply
    }
}

/// Parse `name('a', 'b', ...)`, undoing the Python string quoting
fn call_args(line: &str, name: &str) -> Option<Vec<String>> {
    let rest = line.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(
        inner
            .split(", ")
            .map(|arg| {
                arg.trim()
                    .trim_matches('\'')
                    .replace("\\'", "'")
                    .replace("\\\\", "\\")
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn device_answers_execute() {
        let mut device = FakeDevice::new(Box::new(|code| ExecReply {
            stdout: format!("ran {} bytes", code.len()),
            ..ExecReply::default()
        }));
        let (reply, _) = device.accept(&[CTRL_ENTER_RAW]);
        assert!(reply.ends_with(b">"));
        let (reply, hangup) = device.accept(b"print(1)\n\x04");
        assert!(!hangup);
        let expected = b"OKran 9 bytes\x04\x04>";
        assert_eq!(reply, expected.to_vec());
    }

    #[test]
    fn call_args_unquotes() {
        let args = call_args("__fw('/main.py', 'aGk=', 'wb')", "__fw").unwrap();
        assert_eq!(args, vec!["/main.py", "aGk=", "wb"]);
        assert_eq!(
            call_args(r"__mkdir_p('/it\'s/dir')", "__mkdir_p").unwrap(),
            vec!["/it's/dir"]
        );
        assert!(call_args("not_a_call", "__fw").is_none());
    }

    #[test]
    fn fake_fs_create_then_append() {
        let mut fs = FakeFs::default();
        let _ = fs.exec("__fw('/a.py', 'aGVs', 'wb')"); // "hel"
        let _ = fs.exec("__fw('/a.py', 'bG8=', 'ab')"); // "lo"
        assert_eq!(fs.files["/a.py"], b"hello");
        let _ = fs.exec("__fw('/a.py', 'eA==', 'wb')"); // "x": truncates
        assert_eq!(fs.files["/a.py"], b"x");
    }
}
