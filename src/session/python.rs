//! Device-side Python snippets executed over the raw REPL
// (c) 2025 Ross Younger
//!
//! The uploader never sends file bytes directly; it sends code that calls
//! a small set of helpers defined once per upload. `__fw` appends
//! base64-decoded bytes to a file, `__mkdir_p` creates a directory chain
//! tolerating "already exists" (the target tree state is unknown, so
//! creation must be idempotent), `__check` re-reads a file and compiles
//! it as a corruption check.

use crate::protocol::DONE_SENTINEL;

/// Byte-append write primitive and parse-check primitive
const FILE_HELPERS: &str = "\
import ubinascii, os
def __fw(p,b64,m):
    f=open(p,m)
    f.write(ubinascii.a2b_base64(b64))
    f.close()
def __check(p):
    s=open(p,'r').read()
    compile(s, p, 'exec')
";

/// Recursive directory creation, silently ignoring existing entries
const MKDIR_HELPER: &str = "\
def __mkdir_p(d):
    if not d: return
    if d[0] != '/': d='/' + d
    parts=[p for p in d.split('/') if p]
    cur='/'
    for p in parts:
        cur = cur + p
        try: os.mkdir(cur)
        except OSError: pass
        cur = cur + '/'
";

/// Statement that resets the board. The connection legitimately drops
/// before a response arrives.
pub(crate) const RESET: &str = "import machine\nmachine.reset()";

/// Write mode for a file chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// First chunk: create/truncate
    Create,
    /// Subsequent chunks
    Append,
}

impl WriteMode {
    fn as_py(self) -> &'static str {
        match self {
            WriteMode::Create => "wb",
            WriteMode::Append => "ab",
        }
    }
}

/// Quote a string as a single-quoted Python literal
pub(crate) fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// The one-time helper definitions for an upload
pub(crate) fn helper_preamble(with_dirs: bool) -> String {
    if with_dirs {
        format!("{FILE_HELPERS}{MKDIR_HELPER}")
    } else {
        FILE_HELPERS.to_string()
    }
}

/// One chunk's write statement
pub(crate) fn write_stmt(dest: &str, b64: &str, mode: WriteMode) -> String {
    format!(
        "__fw({}, {}, {})",
        quote(dest),
        quote(b64),
        quote(mode.as_py())
    )
}

/// Idempotent directory creation for all ancestors of `dir`
pub(crate) fn mkdir_stmt(dir: &str) -> String {
    format!("__mkdir_p({})", quote(dir))
}

/// Read-back-and-compile check for a written file
pub(crate) fn check_stmt(dest: &str) -> String {
    format!("__check({})", quote(dest))
}

/// Sync the filesystem (where the port supports it) and print the
/// completion sentinel for log consumers
pub(crate) fn sync_and_sentinel() -> String {
    format!(
        "import os\ntry:\n    os.sync()\nexcept Exception:\n    pass\nprint('{DONE_SENTINEL}')\n"
    )
}
