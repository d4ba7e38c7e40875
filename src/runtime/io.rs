//! Output capture for the shared interpreter.
//!
//! The runtime owns one pair of accumulators. A [`CaptureSession`] points the
//! interpreter's stdout/stderr at them for the duration of a single run and
//! puts the previous target back when it is dropped.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// A writer that captures output to a shared buffer.
#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    /// Create a new captured output buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the captured output as a string.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// Append bytes to the buffer.
    pub fn append(&self, bytes: &[u8]) {
        self.buffer.lock().extend_from_slice(bytes);
    }

    /// Clear the buffer.
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    /// Get the length of captured data.
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Where interpreter output currently goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTarget {
    /// The original target. Nobody is listening, so output is dropped.
    Host,
    /// The runtime's accumulators.
    Capture,
}

/// The interpreter's standard output and error streams.
#[derive(Debug)]
pub struct OutputStreams {
    stdout: CapturedOutput,
    stderr: CapturedOutput,
    target: Mutex<StreamTarget>,
}

impl Default for OutputStreams {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStreams {
    /// Create streams pointing at the host target.
    pub fn new() -> Self {
        Self {
            stdout: CapturedOutput::new(),
            stderr: CapturedOutput::new(),
            target: Mutex::new(StreamTarget::Host),
        }
    }

    /// The current target.
    pub fn target(&self) -> StreamTarget {
        *self.target.lock()
    }

    /// Write to standard output.
    pub fn write_stdout(&self, bytes: &[u8]) {
        self.write(&self.stdout, "stdout", bytes);
    }

    /// Write to standard error.
    pub fn write_stderr(&self, bytes: &[u8]) {
        self.write(&self.stderr, "stderr", bytes);
    }

    fn write(&self, buffer: &CapturedOutput, stream: &'static str, bytes: &[u8]) {
        // Hold the target lock so a redirect cannot land between check and append.
        let target = self.target.lock();
        match *target {
            StreamTarget::Capture => buffer.append(bytes),
            StreamTarget::Host => debug!(stream, len = bytes.len(), "discarding uncaptured output"),
        }
    }
}

/// Scoped capture of the interpreter's output.
///
/// Opening a session clears both accumulators and redirects the streams to
/// them. Dropping it restores the target that was active before.
#[must_use = "output is only captured while the session is alive"]
pub struct CaptureSession<'a> {
    streams: &'a OutputStreams,
    previous: StreamTarget,
}

impl<'a> CaptureSession<'a> {
    /// Reset the accumulators and start capturing.
    pub fn open(streams: &'a OutputStreams) -> Self {
        let previous = {
            let mut target = streams.target.lock();
            streams.stdout.clear();
            streams.stderr.clear();
            std::mem::replace(&mut *target, StreamTarget::Capture)
        };
        Self { streams, previous }
    }

    /// Everything written to stdout so far in this session.
    pub fn stdout(&self) -> String {
        self.streams.stdout.to_string_lossy()
    }

    /// Everything written to stderr so far in this session.
    pub fn stderr(&self) -> String {
        self.streams.stderr.to_string_lossy()
    }
}

impl Drop for CaptureSession<'_> {
    fn drop(&mut self) {
        *self.streams.target.lock() = self.previous;
    }
}
