//! Target-tagged diagnostic logging with optional in-memory capture.
//!
//! A fixed-size capture buffer guarded by a critical section, addressed by a
//! `target` tag (`"arena"`, `"broker"`, ...). There is no serial port or VGA
//! screen to write to here, so the only backend is an optional sink function
//! pointer the caller installs with [`set_sink`]. With no sink installed,
//! `logln` is capture-only (or a no-op if capture is also disabled) rather
//! than silently failing to compile without a console.

use core::cell::UnsafeCell;
use core::fmt::{self, Write as _};

const CAPTURE_BUF_SIZE: usize = 4 * 1024;

/// Receives one fully formatted log line (without trailing newline).
pub type LogSink = fn(target: &str, line: &str);

struct LogState {
    sink: Option<LogSink>,
    capture_enabled: bool,
    capture_len: usize,
    capture_overflow: bool,
    capture_buf: [u8; CAPTURE_BUF_SIZE],
}

struct GlobalLogger {
    inner: UnsafeCell<LogState>,
}

impl GlobalLogger {
    const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(LogState {
                sink: None,
                capture_enabled: false,
                capture_len: 0,
                capture_overflow: false,
                capture_buf: [0; CAPTURE_BUF_SIZE],
            }),
        }
    }
}

// SAFETY: the crate's concurrency model is single-threaded cooperative;
// there is no second core racing `LOGGER`.
unsafe impl Sync for GlobalLogger {}

static LOGGER: GlobalLogger = GlobalLogger::new();

fn with_logger<R>(f: impl FnOnce(&mut LogState) -> R) -> R {
    // SAFETY: see `GlobalLogger`'s `Sync` impl above.
    unsafe { f(&mut *LOGGER.inner.get()) }
}

struct LineWriter<'a> {
    target: &'a str,
    buf: [u8; 256],
    len: usize,
}

impl fmt::Write for LineWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len().saturating_sub(self.len);
        let write_len = remaining.min(bytes.len());
        let start = self.len;
        self.buf[start..start + write_len].copy_from_slice(&bytes[..write_len]);
        self.len += write_len;
        Ok(())
    }
}

/// Installs (or clears, with `None`) the log sink.
pub fn set_sink(sink: Option<LogSink>) {
    with_logger(|state| state.sink = sink);
}

/// Enables or disables capture and clears the capture buffer.
pub fn set_capture_enabled(enabled: bool) {
    with_logger(|state| {
        state.capture_enabled = enabled;
        state.capture_len = 0;
        state.capture_overflow = false;
    });
}

/// Central target-tagged log entry point.
pub fn logln(target: &str, args: fmt::Arguments<'_>) {
    let mut line = LineWriter {
        target,
        buf: [0; 256],
        len: 0,
    };
    let _ = fmt::write(&mut line, args);
    // SAFETY: `LineWriter::write_str` only ever copies valid UTF-8 byte
    // slices taken from `&str` arguments, truncated at a byte boundary is the
    // one risk; truncation can only occur at the buffer's capacity, and we
    // re-validate with `from_utf8` rather than assume it.
    let text = core::str::from_utf8(&line.buf[..line.len]).unwrap_or("");

    with_logger(|state| {
        if let Some(sink) = state.sink {
            sink(target, text);
        }
        if state.capture_enabled {
            capture_line(state, target, text);
        }
    });
}

fn capture_line(state: &mut LogState, target: &str, text: &str) {
    let mut write = |s: &str| {
        let bytes = s.as_bytes();
        let remaining = state.capture_buf.len().saturating_sub(state.capture_len);
        let write_len = remaining.min(bytes.len());
        if write_len > 0 {
            let start = state.capture_len;
            state.capture_buf[start..start + write_len].copy_from_slice(&bytes[..write_len]);
            state.capture_len += write_len;
        }
        if write_len < bytes.len() {
            state.capture_overflow = true;
        }
    };
    write(target);
    write("|");
    write(text);
    write("\n");
}

/// Returns the captured log text so far (empty if capture was never enabled).
pub fn with_captured(f: impl FnOnce(&str, bool)) {
    with_logger(|state| {
        let text = core::str::from_utf8(&state.capture_buf[..state.capture_len]).unwrap_or("");
        f(text, state.capture_overflow);
    });
}

#[macro_export]
macro_rules! logln {
    ($target:expr, $($arg:tt)*) => {
        $crate::logging::logln($target, format_args!($($arg)*))
    };
}
